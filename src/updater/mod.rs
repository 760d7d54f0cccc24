use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;
use tokio::fs;

use crate::engine::models::SelfUpdateOutcome;
use crate::networking::{FetchError, Fetcher};
use crate::util::CancellationToken;
use crate::verify;

/// Served in place of a digest when the patch site has no launcher build.
const REMOTE_NOT_FOUND: &str = "Not Found";

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("downloaded launcher has digest {actual}, expected {expected}")]
    DigestMismatch { expected: String, actual: String },
    #[error("{} has no parent directory", .0.display())]
    NoParent(PathBuf),
    #[error("self update cancelled")]
    Cancelled,
}

fn io_err(action: &'static str, path: &Path) -> impl FnOnce(io::Error) -> UpdateError {
    let path = path.to_path_buf();
    move |source| UpdateError::Io {
        action,
        path,
        source,
    }
}

/// Replaces the running launcher with the build published next to the filelist.
///
/// The new binary takes effect on the next launch.
pub struct SelfUpdater {
    fetcher: Arc<dyn Fetcher>,
    patcher_url: String,
    app_name: String,
    cancel: CancellationToken,
}

impl SelfUpdater {
    pub fn new(fetcher: Arc<dyn Fetcher>, patcher_url: &str, app_name: &str) -> Self {
        Self {
            fetcher,
            patcher_url: patcher_url.trim_end_matches('/').to_owned(),
            app_name: app_name.to_owned(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop before downloading or swapping the binary once `cancel` is raised.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Check for and apply a launcher update. Never fails the caller.
    pub async fn run(&self, exe: &Path) -> SelfUpdateOutcome {
        match self.try_update(exe).await {
            Ok(outcome) => outcome,
            Err(UpdateError::Cancelled) => {
                warn!("Self update cancelled");
                SelfUpdateOutcome::Cancelled
            }
            Err(err) => {
                warn!("Failed self update, skipping: {err}");
                SelfUpdateOutcome::Failed(err.to_string())
            }
        }
    }

    async fn try_update(&self, exe: &Path) -> Result<SelfUpdateOutcome, UpdateError> {
        let dir = exe
            .parent()
            .ok_or_else(|| UpdateError::NoParent(exe.to_path_buf()))?;
        let file_name = exe
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.exe", self.app_name));
        let old_path = dir.join(format!(".{file_name}.old"));
        let new_path = dir.join(format!(".{file_name}.new"));

        remove_leftover(&dir.join(format!("{}.bat", self.app_name))).await;
        remove_leftover(&old_path).await;

        let local_hash = verify::digest(exe).map_err(io_err("md5", exe))?;
        let hash_url = format!("{}/{}-hash.txt", self.patcher_url, self.app_name);
        info!("Checking for self update at {hash_url}");
        let body = self.fetcher.fetch_bytes(&hash_url).await?;
        let remote_hash = String::from_utf8_lossy(&body).trim().to_owned();

        if remote_hash == REMOTE_NOT_FOUND {
            info!("Remote site down, ignoring self update");
            return Ok(SelfUpdateOutcome::RemoteUnavailable);
        }
        if verify::matches(&local_hash, &remote_hash) {
            info!("Self update not needed");
            return Ok(SelfUpdateOutcome::NotNeeded);
        }

        info!(
            "Updating {}... {local_hash} vs {remote_hash}",
            self.app_name
        );
        self.check_cancel()?;
        let exe_url = format!("{}/{}.exe", self.patcher_url, self.app_name);
        let binary = self.fetcher.fetch_bytes(&exe_url).await?;
        let actual = verify::digest_bytes(&binary);
        if !verify::matches(&actual, &remote_hash) {
            return Err(UpdateError::DigestMismatch {
                expected: remote_hash,
                actual,
            });
        }

        fs::write(&new_path, &binary)
            .await
            .map_err(io_err("write", &new_path))?;
        mark_executable(&new_path).await?;
        if let Err(err) = self.check_cancel() {
            remove_leftover(&new_path).await;
            return Err(err);
        }
        fs::rename(exe, &old_path)
            .await
            .map_err(io_err("rename", exe))?;
        if let Err(source) = fs::rename(&new_path, exe).await {
            if let Err(err) = fs::rename(&old_path, exe).await {
                warn!("self-update: could not restore {}: {err}", exe.display());
            }
            return Err(UpdateError::Io {
                action: "replace",
                path: exe.to_path_buf(),
                source,
            });
        }

        info!("Updated {}, restart to use the new version", self.app_name);
        Ok(SelfUpdateOutcome::Applied)
    }

    fn check_cancel(&self) -> Result<(), UpdateError> {
        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }
}

async fn remove_leftover(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => info!("Removed {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove {}: {err}", path.display()),
    }
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<(), UpdateError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .await
        .map_err(io_err("chmod", path))
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<(), UpdateError> {
    Ok(())
}
