use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use log::{debug, info, warn};
use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::PersistedState;
use crate::engine::models::ReconciliationResult;
use crate::engine::state::PatchPhase;
use crate::error::{PatchError, Result};
use crate::manifest::{FileEntry, Manifest};
use crate::networking::{Fetcher, entry_url};
use crate::progress::ProgressSink;
use crate::util::{CancellationToken, format_size, progress_percent};
use crate::verify;

pub mod archive;

pub use archive::ArchiveBundle;

/// Where and for which client a pass runs.
#[derive(Clone, Debug)]
pub struct PatchTarget {
    pub root: PathBuf,
    pub patcher_url: String,
    pub client_tag: String,
}

#[derive(Debug, Default)]
struct PassStats {
    processed_size: u64,
    bytes_downloaded: u64,
    files_fetched: usize,
    files_deleted: usize,
    entries_rejected: usize,
    files_changed: bool,
}

/// Converges the install root towards a manifest.
///
/// Built fresh for every patch request; everything it remembers lives on the instance.
/// Each entry is decided from what is on disk right now, so an interrupted pass is
/// finished correctly by simply running again.
pub struct ReconciliationEngine {
    fetcher: Arc<dyn Fetcher>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    target: PatchTarget,
    bundle: Option<ArchiveBundle>,
    bundle_fetched: bool,
    stats: PassStats,
}

impl ReconciliationEngine {
    pub fn new(
        target: PatchTarget,
        fetcher: Arc<dyn Fetcher>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            progress,
            cancel,
            target,
            bundle: None,
            bundle_fetched: false,
            stats: PassStats::default(),
        }
    }

    pub fn with_bundle(mut self, bundle: ArchiveBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Apply `manifest` unless `state` says it already was.
    ///
    /// The new version is recorded only when every entry was handled without a fatal
    /// error and without cancellation.
    pub async fn reconcile(
        &mut self,
        manifest: &Manifest,
        state: &mut dyn PersistedState,
    ) -> Result<ReconciliationResult> {
        let start = Instant::now();
        self.stats = PassStats::default();
        self.progress.phase(PatchPhase::ComparingVersion);

        let applied = state.applied_version().to_owned();
        if !manifest.version.is_empty() && applied == manifest.version {
            let summary = match manifest.display_version() {
                Some(short) => format!("We are up to date latest patch {short}"),
                None => "We are up to date".to_owned(),
            };
            info!("{summary}");
            self.progress.set_progress(100.0);
            self.progress.phase(PatchPhase::UpToDate);
            return Ok(ReconciliationResult {
                version: manifest.version.clone(),
                up_to_date: true,
                version_saved: true,
                elapsed: start.elapsed(),
                summary,
                ..Default::default()
            });
        }

        let total = manifest.total_download_size();
        match manifest.display_version() {
            Some(short) => info!("Total patch size: {}, version: {short}", format_size(total)),
            None => info!("Total patch size: {}", format_size(total)),
        }
        debug!(
            "patch: applied version {:?}, target {:?}",
            applied, manifest.version
        );

        self.progress.phase(PatchPhase::Reconciling);
        self.progress.set_progress(0.0);
        if let Err(err) = self.run_pass(manifest, total).await {
            let phase = match err {
                PatchError::Cancelled => PatchPhase::Cancelled,
                _ => PatchPhase::Failed,
            };
            warn!("patch: pass stopped: {err}");
            self.progress.phase(phase);
            return Err(err);
        }
        self.progress.set_progress(100.0);

        self.progress.phase(PatchPhase::Finalizing);
        let version_saved = match state.record_applied_version(&manifest.version) {
            Ok(()) => true,
            Err(err) => {
                warn!("Failed to save version: {err}");
                false
            }
        };

        let elapsed = start.elapsed();
        let summary = if self.stats.bytes_downloaded == 0 {
            format!("Finished patch in {:.2} seconds", elapsed.as_secs_f64())
        } else {
            format!(
                "Finished patch of {} in {:.2} seconds",
                format_size(self.stats.bytes_downloaded),
                elapsed.as_secs_f64()
            )
        };
        self.progress.phase(PatchPhase::Done);

        Ok(ReconciliationResult {
            version: manifest.version.clone(),
            up_to_date: false,
            files_changed: self.stats.files_changed,
            bytes_downloaded: self.stats.bytes_downloaded,
            files_fetched: self.stats.files_fetched,
            files_deleted: self.stats.files_deleted,
            entries_rejected: self.stats.entries_rejected,
            version_saved,
            elapsed,
            summary,
        })
    }

    async fn run_pass(&mut self, manifest: &Manifest, total: u64) -> Result<()> {
        for entry in &manifest.downloads {
            self.check_cancel(&entry.name)?;
            self.apply_download(entry, manifest).await?;
            self.stats.processed_size += entry.size;
            self.progress
                .set_progress(progress_percent(self.stats.processed_size, total));
        }

        for entry in &manifest.deletes {
            self.check_cancel(&entry.name)?;
            self.apply_delete(entry);
        }
        Ok(())
    }

    fn check_cancel(&self, next: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("patch: cancelled before {next}");
            return Err(PatchError::Cancelled);
        }
        Ok(())
    }

    async fn apply_download(&mut self, entry: &FileEntry, manifest: &Manifest) -> Result<()> {
        let path = match entry.local_path(&self.target.root) {
            Ok(path) => path,
            Err(err) => {
                warn!("Skipping {}", err);
                self.stats.entries_rejected += 1;
                return Ok(());
            }
        };
        self.progress.current_file(&entry.name);

        if let Some(parent) = path.parent()
            && parent != self.target.root
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PatchError::io("mkdir", parent, e))?;
        }

        if is_current(entry, &path).await? {
            info!("{} skipped (up to date)", entry.name);
            return Ok(());
        }

        if let Some(bundle) = self.pending_bundle(entry) {
            self.fetch_bundle(&bundle, &manifest.downloads).await?;
            if is_current(entry, &path).await? {
                return Ok(());
            }
        }

        info!("{} ({})", entry.name, format_size(entry.size));
        let url = entry_url(
            &manifest.download_prefix,
            &self.target.client_tag,
            &entry.name,
        );
        let (written, digest) = self.download_to(&url, &path).await?;
        self.stats.bytes_downloaded += written;
        self.stats.files_changed = true;
        if !verify::matches(&digest, &entry.digest) {
            return Err(PatchError::DigestMismatch {
                name: entry.name.clone(),
                expected: entry.digest.clone(),
                actual: digest,
            });
        }
        self.stats.files_fetched += 1;
        Ok(())
    }

    fn pending_bundle(&self, entry: &FileEntry) -> Option<ArchiveBundle> {
        if self.bundle_fetched {
            return None;
        }
        self.bundle
            .as_ref()
            .filter(|bundle| entry.has_prefix(&bundle.prefix))
            .cloned()
    }

    /// Download and unpack the bundle. Members whose filelist entry already matches on
    /// disk are not rewritten.
    async fn fetch_bundle(
        &mut self,
        bundle: &ArchiveBundle,
        downloads: &[FileEntry],
    ) -> Result<()> {
        let url = format!(
            "{}/{}",
            self.target.patcher_url.trim_end_matches('/'),
            bundle.archive
        );
        let archive_path = self.target.root.join(&bundle.archive);
        info!("Downloading {}...", bundle.archive);
        let (written, _) = self.download_to(&url, &archive_path).await?;
        self.bundle_fetched = true;
        self.stats.bytes_downloaded += written;
        self.stats.files_changed = true;

        let expected: HashMap<String, String> = downloads
            .iter()
            .filter(|entry| entry.has_prefix(&bundle.prefix))
            .map(|entry| (member_key(&entry.name), entry.digest.clone()))
            .collect();
        let root = self.target.root.clone();
        let archive_file = archive_path.clone();
        let unpacked = tokio::task::spawn_blocking(move || {
            archive::unpack(&archive_file, &root, |relative| {
                let Some(digest) = expected.get(&member_key(&relative.to_string_lossy())) else {
                    return false;
                };
                let current = root.join(relative);
                current.is_file()
                    && verify::digest(&current)
                        .is_ok_and(|actual| verify::matches(&actual, digest))
            })
        })
        .await
        .map_err(|e| PatchError::io("unpack", &archive_path, io::Error::other(e)))??;
        info!("{} unpacked ({unpacked} files)", bundle.archive);
        if let Err(err) = fs::remove_file(&archive_path) {
            warn!("Failed to remove {}: {err}", archive_path.display());
        }
        Ok(())
    }

    /// Stream `url` into `dest`, returning the bytes written and their MD5.
    ///
    /// The request is answered before `dest` is touched, so a refused download keeps the
    /// previous file.
    async fn download_to(&self, url: &str, dest: &Path) -> Result<(u64, String)> {
        let mut stream = self.fetcher.fetch(url).await?;
        let mut file = File::create(dest)
            .await
            .map_err(|e| PatchError::io("create", dest, e))?;
        let mut hasher = Md5::new();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| PatchError::io("write", dest, e))?;
            hasher.update(&chunk);
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| PatchError::io("flush", dest, e))?;
        Ok((written, format!("{:x}", hasher.finalize())))
    }

    fn apply_delete(&mut self, entry: &FileEntry) {
        let path = match entry.local_path(&self.target.root) {
            Ok(path) => path,
            Err(err) => {
                warn!("Skipping {}", err);
                self.stats.entries_rejected += 1;
                return;
            }
        };
        match fs::symlink_metadata(&path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("{} already gone", entry.name);
            }
            Err(err) => warn!("Failed to stat {}: {err}", entry.name),
            Ok(meta) if meta.is_dir() => {
                info!("Skipping deleting {}, it is a directory", entry.name);
            }
            Ok(_) => match fs::remove_file(&path) {
                Ok(()) => {
                    info!("{} removed", entry.name);
                    self.stats.files_deleted += 1;
                    self.stats.files_changed = true;
                }
                Err(err) => warn!("Failed to delete {}: {err}", entry.name),
            },
        }
    }
}

/// Whether the file at `path` already has the entry's content.
async fn is_current(entry: &FileEntry, path: &Path) -> Result<bool> {
    let path = path.to_path_buf();
    let expected = entry.digest.clone();
    tokio::task::spawn_blocking(move || match fs::metadata(&path) {
        Ok(_) => {
            let actual = verify::digest(&path).map_err(|e| PatchError::io("md5", &path, e))?;
            Ok(verify::matches(&actual, &expected))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(PatchError::io("stat", &path, err)),
    })
    .await
    .map_err(|e| PatchError::io("md5", &entry.name, io::Error::other(e)))?
}

/// Lookup key shared by filelist names and archive members.
fn member_key(name: &str) -> String {
    name.replace('\\', "/").to_ascii_lowercase()
}
