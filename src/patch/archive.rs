use std::fs;
use std::io;
use std::path::Path;

use log::{debug, warn};
use zip::read::ZipArchive;

use crate::error::{PatchError, Result};

/// A bulk archive served next to the filelist that replaces many small downloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveBundle {
    /// Entries under this prefix (case-insensitive) come from the archive.
    pub prefix: String,
    /// File name of the archive under the patcher URL.
    pub archive: String,
}

impl Default for ArchiveBundle {
    fn default() -> Self {
        Self {
            prefix: "maps/".into(),
            archive: "maps.zip".into(),
        }
    }
}

/// Extract the files of a zip archive under `dest`. Returns the number of files written.
///
/// Members whose names would land outside `dest` are skipped, as are members for which
/// `keep_existing` returns true when given their path relative to `dest`.
pub fn unpack(
    archive_path: &Path,
    dest: &Path,
    keep_existing: impl Fn(&Path) -> bool,
) -> Result<usize> {
    let archive_err = |reason: String| PatchError::Archive {
        path: archive_path.to_path_buf(),
        reason,
    };
    let file = fs::File::open(archive_path).map_err(|e| PatchError::io("open", archive_path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| archive_err(e.to_string()))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| archive_err(format!("entry {i}: {e}")))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping {} in {}, has .. inside it", entry.name(), archive_path.display());
            continue;
        };
        let out_path = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| PatchError::io("mkdir", &out_path, e))?;
            continue;
        }
        if keep_existing(&relative) {
            debug!("{} up to date, not unpacked", out_path.display());
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(|e| PatchError::io("mkdir", parent, e))?;
        }
        let mut out_file =
            fs::File::create(&out_path).map_err(|e| PatchError::io("create", &out_path, e))?;
        io::copy(&mut entry, &mut out_file).map_err(|e| PatchError::io("write", &out_path, e))?;
        debug!("unpacked {}", out_path.display());
        written += 1;
    }
    Ok(written)
}
