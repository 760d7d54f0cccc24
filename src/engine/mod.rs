use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::LauncherConfig;
use crate::engine::models::{PatchReport, SelfUpdateOutcome};
use crate::engine::state::{PatchPhase, UserAction};
use crate::error::{PatchError, Result};
use crate::manifest;
use crate::networking::Fetcher;
use crate::patch::{ArchiveBundle, PatchTarget, ReconciliationEngine};
use crate::process::{GameLauncher, LaunchError};
use crate::progress::ProgressSink;
use crate::storage::{self, SeedOutcome};
use crate::updater::SelfUpdater;
use crate::util::CancellationToken;

pub mod models;
pub mod state;

/// Pause between a patch that changed files and starting the game.
const LAUNCH_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Holds the "a patch is running" flag for as long as it lives.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct LauncherEngine {
    target: PatchTarget,
    app_name: String,
    config: Mutex<LauncherConfig>,
    fetcher: Arc<dyn Fetcher>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    running: AtomicBool,
    self_exe: Option<PathBuf>,
    launch_delay: Duration,
}

impl LauncherEngine {
    pub fn new(
        target: PatchTarget,
        app_name: &str,
        config: LauncherConfig,
        fetcher: Arc<dyn Fetcher>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            app_name: app_name.to_owned(),
            config: Mutex::new(config),
            fetcher,
            progress,
            cancel,
            running: AtomicBool::new(false),
            self_exe: std::env::current_exe().ok(),
            launch_delay: LAUNCH_DELAY,
        }
    }

    /// Executable replaced by the self-update step. `None` skips it.
    pub fn with_self_exe(mut self, exe: Option<PathBuf>) -> Self {
        self.self_exe = exe;
        self
    }

    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub async fn handle_action(&self, action: UserAction) -> std::result::Result<(), ActionError> {
        debug!("action: {action:?}");
        match action {
            UserAction::AutoPlay => self.auto_play().await,
            UserAction::Patch => self.patch().await.map(|_| ()).map_err(ActionError::from),
            UserAction::Play => self.play().await.map(|_| ()).map_err(ActionError::from),
        }
    }

    /// Bring the install up to date with the patch server, then update the launcher itself.
    ///
    /// A missing or unreadable filelist skips reconciliation without failing the request.
    pub async fn patch(&self) -> Result<PatchReport> {
        let Some(_running) = RunningGuard::acquire(&self.running) else {
            warn!("Patch already in progress");
            return Err(PatchError::AlreadyRunning);
        };
        let start = Instant::now();
        self.cancel.reset();
        self.progress.phase(PatchPhase::Idle);
        info!("Starting patch...");

        let root = self.target.root.clone();
        let cancel = self.cancel.clone();
        let seeded = tokio::task::spawn_blocking(move || storage::prepare_install(&root, &cancel))
            .await
            .map_err(|e| PatchError::io("prepatch", &self.target.root, io::Error::other(e)))
            .and_then(|outcome| outcome);
        match seeded {
            Ok(SeedOutcome::Copied { from, files }) => {
                debug!("patch: seeded {files} files from {}", from.display());
            }
            Ok(_) => {}
            Err(PatchError::Cancelled) => {
                self.progress.phase(PatchPhase::Cancelled);
                return Err(PatchError::Cancelled);
            }
            Err(err) => {
                error!("prepatch: {err}");
                self.progress.phase(PatchPhase::Failed);
                return Err(err);
            }
        }

        self.check_cancel()?;
        self.progress.phase(PatchPhase::FetchingManifest);
        let fetched = manifest::fetch_manifest(
            self.fetcher.as_ref(),
            &self.target.patcher_url,
            &self.target.client_tag,
        )
        .await;
        let reconciliation = match fetched {
            Ok(manifest) => {
                let mut config = self.config.lock().await;
                let mut engine = ReconciliationEngine::new(
                    self.target.clone(),
                    self.fetcher.clone(),
                    self.progress.clone(),
                    self.cancel.clone(),
                )
                .with_bundle(ArchiveBundle::default());
                Some(engine.reconcile(&manifest, &mut *config).await?)
            }
            Err(err) if err.is_manifest_unavailable() => {
                warn!("Failed fetch file list, skipping: {err}");
                None
            }
            Err(err) => {
                self.progress.phase(PatchPhase::Failed);
                return Err(err);
            }
        };

        self.check_cancel()?;
        let self_update = match &self.self_exe {
            Some(exe) => {
                SelfUpdater::new(self.fetcher.clone(), &self.target.patcher_url, &self.app_name)
                    .with_cancel(self.cancel.clone())
                    .run(exe)
                    .await
            }
            None => SelfUpdateOutcome::Failed("launcher location unknown".into()),
        };
        self.check_cancel()?;

        match &reconciliation {
            Some(result) if !result.up_to_date => {
                info!("{}", result.summary);
                debug!(
                    "patch: {} fetched, {} deleted, {} rejected, version saved: {}",
                    result.files_fetched,
                    result.files_deleted,
                    result.entries_rejected,
                    result.version_saved
                );
            }
            Some(_) => {}
            None => self.progress.phase(PatchPhase::Done),
        }
        let elapsed = start.elapsed();
        info!("Finished in {:.2} seconds", elapsed.as_secs_f64());

        Ok(PatchReport {
            reconciliation,
            self_update,
            elapsed,
        })
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.progress.phase(PatchPhase::Cancelled);
            return Err(PatchError::Cancelled);
        }
        Ok(())
    }

    /// Start the game client. Returns its process id.
    pub async fn play(&self) -> std::result::Result<u32, LaunchError> {
        GameLauncher::new(&self.target.root).launch().await
    }

    /// Patch and/or play as the config switches say.
    ///
    /// A failed patch is logged and the launch is still attempted.
    pub async fn auto_play(&self) -> std::result::Result<(), ActionError> {
        let (auto_patch, auto_play) = {
            let config = self.config.lock().await;
            (config.auto_patch, config.auto_play)
        };

        let mut files_changed = false;
        if auto_patch {
            match self.patch().await {
                Ok(report) => files_changed = report.files_changed(),
                Err(PatchError::Cancelled) => {
                    warn!("auto: patch cancelled, not launching");
                    return Ok(());
                }
                Err(err) => error!("Failed to patch: {err}"),
            }
        }
        if !auto_play {
            info!("auto_play is off, not launching");
            return Ok(());
        }
        if files_changed && !self.launch_delay.is_zero() {
            info!(
                "Launching in {} seconds...",
                self.launch_delay.as_secs_f64()
            );
            if !self.cancel.sleep(self.launch_delay).await {
                warn!("auto: launch cancelled");
                return Ok(());
            }
        }
        if self.cancel.is_cancelled() {
            warn!("auto: launch cancelled");
            return Ok(());
        }
        self.play().await?;
        Ok(())
    }

    #[cfg(test)]
    async fn applied_version(&self) -> String {
        self.config.lock().await.version.clone()
    }
}
