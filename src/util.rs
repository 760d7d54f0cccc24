use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How often a cancellable wait looks at the flag.
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Cooperative cancellation flag shared between the patch pass and whoever may stop it.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Check whether cancellation has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation. Returns false when cancelled.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + duration;
        while !self.is_cancelled() {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(CANCEL_POLL)).await;
        }
        false
    }
}

/// Render a byte count the way the patch log reports sizes.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{:.2} bytes", bytes as f64);
    }
    let mut value = bytes as f64 / 1024.0;
    for unit in ["KB", "MB", "GB"] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} TB")
}

/// Compute progress as a percentage of a declared total.
#[must_use]
pub fn progress_percent(done: u64, total: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0) as f32
}

/// First eight characters of a version token, used for display.
#[must_use]
pub fn short_version(version: &str) -> Option<&str> {
    version.get(..8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes_human_readable() {
        assert_eq!(format_size(0), "0.00 bytes");
        assert_eq!(format_size(512), "512.00 bytes");
        assert_eq!(format_size(2_048), "2.00 KB");
        assert_eq!(format_size(5_242_880), "5.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
        assert_eq!(format_size(2 * 1024u64.pow(4)), "2.00 TB");
        assert_eq!(format_size(4096 * 1024u64.pow(4)), "4096.00 TB");
    }

    #[test]
    fn calculates_progress_percent() {
        assert_eq!(progress_percent(0, 10), 0.0);
        assert_eq!(progress_percent(5, 10), 50.0);
        assert_eq!(progress_percent(10, 10), 100.0);
        assert_eq!(progress_percent(5, 0), 0.0);
        assert_eq!(progress_percent(20, 10), 100.0);
    }

    #[test]
    fn shortens_versions_for_display() {
        assert_eq!(short_version("abc12345deadbeef"), Some("abc12345"));
        assert_eq!(short_version("abc12345"), Some("abc12345"));
        assert_eq!(short_version("v1"), None);
    }

    #[test]
    fn cancellation_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
        observer.reset();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancellable_sleep_wakes_early() {
        let token = CancellationToken::new();
        assert!(token.sleep(Duration::ZERO).await);

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let started = std::time::Instant::now();
        assert!(!token.sleep(Duration::from_secs(30)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
