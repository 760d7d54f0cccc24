use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::engine::state::PatchPhase;

/// Receives progress of a patch request. The engine only ever talks to this trait.
pub trait ProgressSink: Send + Sync {
    fn phase(&self, phase: PatchPhase);

    /// Overall progress in percent, estimated from declared file sizes.
    fn set_progress(&self, percent: f32);

    /// Name of the entry currently being processed.
    fn current_file(&self, _name: &str) {}
}

/// Interactive terminal progress bar, drawn only while a patch is running.
///
/// Log output should go through the same `MultiProgress` (see `logging::init`) so lines
/// are printed above the bar instead of through it.
pub struct ConsoleProgress {
    bars: MultiProgress,
    bar: Mutex<Option<ProgressBar>>,
}

impl ConsoleProgress {
    pub fn new(bars: MultiProgress) -> Self {
        Self {
            bars,
            bar: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_bar(&self) -> ProgressBar {
        let bar = self.bars.add(ProgressBar::new(100));
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    }
}

impl ProgressSink for ConsoleProgress {
    fn phase(&self, phase: PatchPhase) {
        let mut slot = self.slot();
        match phase {
            PatchPhase::Idle => {
                if let Some(bar) = slot.take() {
                    bar.finish_and_clear();
                }
            }
            PatchPhase::Done | PatchPhase::UpToDate => {
                if let Some(bar) = slot.take() {
                    bar.set_position(100);
                    bar.finish_with_message(phase.label());
                }
            }
            PatchPhase::Cancelled | PatchPhase::Failed => {
                if let Some(bar) = slot.take() {
                    bar.abandon_with_message(phase.label());
                }
            }
            _ => slot
                .get_or_insert_with(|| self.start_bar())
                .set_message(phase.label()),
        }
    }

    fn set_progress(&self, percent: f32) {
        if let Some(bar) = self.slot().as_ref() {
            bar.set_position(percent.clamp(0.0, 100.0) as u64);
        }
    }

    fn current_file(&self, name: &str) {
        if let Some(bar) = self.slot().as_ref() {
            bar.set_message(name.to_owned());
        }
    }
}

/// Headless sink: phases at info, progress in 10% steps at debug.
#[derive(Default)]
pub struct LogProgress {
    last_step: AtomicU8,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressSink for LogProgress {
    fn phase(&self, phase: PatchPhase) {
        info!("patch: {}", phase.label());
        if phase.is_terminal() {
            self.last_step.store(0, Ordering::Relaxed);
        }
    }

    fn set_progress(&self, percent: f32) {
        let step = (percent.clamp(0.0, 100.0) / 10.0) as u8;
        if self.last_step.swap(step, Ordering::Relaxed) != step {
            debug!("patch progress: {:.0}%", percent);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_progress_tracks_steps() {
        let sink = LogProgress::new();
        sink.phase(PatchPhase::FetchingManifest);
        sink.set_progress(5.0);
        assert_eq!(sink.last_step.load(Ordering::Relaxed), 0);
        sink.set_progress(42.0);
        assert_eq!(sink.last_step.load(Ordering::Relaxed), 4);
        sink.set_progress(250.0);
        assert_eq!(sink.last_step.load(Ordering::Relaxed), 10);
        sink.phase(PatchPhase::Done);
        assert_eq!(sink.last_step.load(Ordering::Relaxed), 0);
    }

    use indicatif::ProgressDrawTarget;

    fn hidden_console() -> ConsoleProgress {
        ConsoleProgress::new(MultiProgress::with_draw_target(
            ProgressDrawTarget::hidden(),
        ))
    }

    #[test]
    fn console_bar_exists_only_during_a_patch() {
        let sink = hidden_console();
        sink.set_progress(40.0);
        sink.phase(PatchPhase::Idle);
        assert!(sink.slot().is_none());

        sink.phase(PatchPhase::FetchingManifest);
        let bar = sink.slot().clone().unwrap();
        sink.phase(PatchPhase::Done);
        assert!(bar.is_finished());
        assert!(sink.slot().is_none());
    }

    #[test]
    fn console_progress_clamps_position() {
        let sink = hidden_console();
        sink.phase(PatchPhase::Reconciling);
        sink.set_progress(150.0);
        assert_eq!(sink.slot().as_ref().unwrap().position(), 100);
        sink.set_progress(-3.0);
        assert_eq!(sink.slot().as_ref().unwrap().position(), 0);
    }
}
