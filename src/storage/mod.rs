use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::env;
use crate::error::{PatchError, Result};
use crate::util::CancellationToken;

/// Destination files within this many bytes of the source count as the same file.
const SIZE_TOLERANCE: u64 = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeedOutcome {
    /// The game binary is already in the install root.
    Present,
    Copied { from: PathBuf, files: usize },
    /// No seed install was found next to the root.
    Missing,
}

/// Make sure the install root holds a game client before patching.
///
/// When the game binary is missing, the first seed install that has one is copied over.
/// Blocking; the copy stops between files once `cancel` is raised.
pub fn prepare_install(root: &Path, cancel: &CancellationToken) -> Result<SeedOutcome> {
    if env::game_executable(root).exists() {
        return Ok(SeedOutcome::Present);
    }

    for seed in env::seed_install_dirs(root) {
        if !env::game_executable(&seed).is_file() {
            debug!("seed: no {} in {}", env::GAME_EXECUTABLE, seed.display());
            continue;
        }
        info!("Copying files from {}...", seed.display());
        let files = copy_seed(&seed, root, cancel)?;
        info!("Copied {files} files from {}", seed.display());
        return Ok(SeedOutcome::Copied { from: seed, files });
    }

    warn!(
        "{} was not found here or in {}; download the client manually",
        env::GAME_EXECUTABLE,
        env::SEED_INSTALL_DIR
    );
    Ok(SeedOutcome::Missing)
}

/// Copy every file under `seed` into `root`, keeping the relative layout.
pub fn copy_seed(seed: &Path, root: &Path, cancel: &CancellationToken) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(seed).follow_links(false) {
        if cancel.is_cancelled() {
            warn!("seed: cancelled after {copied} files");
            return Err(PatchError::Cancelled);
        }
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(seed).to_path_buf();
            PatchError::io("walk", path, io::Error::from(err))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(seed) else {
            continue;
        };
        let dest = root.join(relative);
        let source_meta = entry
            .metadata()
            .map_err(|err| PatchError::io("stat", entry.path(), io::Error::from(err)))?;
        if is_newer_copy(&dest, &source_meta) {
            debug!("seed: keeping {}", dest.display());
            continue;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| PatchError::io("mkdir", parent, e))?;
        }
        fs::copy(entry.path(), &dest).map_err(|e| PatchError::io("copy", &dest, e))?;
        copied += 1;
    }
    Ok(copied)
}

/// A destination that is newer than the source and about the same size is kept.
fn is_newer_copy(dest: &Path, source: &fs::Metadata) -> bool {
    let Ok(existing) = fs::metadata(dest) else {
        return false;
    };
    let newer = match (existing.modified(), source.modified()) {
        (Ok(dest_time), Ok(source_time)) => dest_time > source_time,
        _ => false,
    };
    newer && existing.len().abs_diff(source.len()) < SIZE_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn set_mtime(path: &Path, time: SystemTime) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    fn seed_layout(seed: &Path) {
        fs::create_dir_all(seed.join("Resources")).unwrap();
        fs::write(seed.join(env::GAME_EXECUTABLE), b"game").unwrap();
        fs::write(seed.join("Resources/skills.txt"), b"skills").unwrap();
    }

    #[test]
    fn existing_install_is_left_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(env::GAME_EXECUTABLE), b"game").unwrap();
        seed_layout(&dir.path().join(env::SEED_INSTALL_DIR));

        let outcome = prepare_install(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(outcome, SeedOutcome::Present);
        assert!(!dir.path().join("Resources").exists());
    }

    #[test]
    fn copies_seed_inside_root() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join(env::SEED_INSTALL_DIR);
        seed_layout(&seed);

        let outcome = prepare_install(dir.path(), &CancellationToken::new()).unwrap();
        assert_eq!(
            outcome,
            SeedOutcome::Copied {
                from: seed,
                files: 2
            }
        );
        assert_eq!(
            fs::read(dir.path().join(env::GAME_EXECUTABLE)).unwrap(),
            b"game"
        );
        assert_eq!(
            fs::read(dir.path().join("Resources/skills.txt")).unwrap(),
            b"skills"
        );
    }

    #[test]
    fn falls_back_to_sibling_seed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("eq");
        fs::create_dir(&root).unwrap();
        seed_layout(&dir.path().join(env::SEED_INSTALL_DIR));

        let outcome = prepare_install(&root, &CancellationToken::new()).unwrap();
        assert!(matches!(outcome, SeedOutcome::Copied { files: 2, .. }));
        assert!(root.join(env::GAME_EXECUTABLE).is_file());
    }

    #[test]
    fn missing_seed_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("eq");
        fs::create_dir(&root).unwrap();
        let outcome = prepare_install(&root, &CancellationToken::new()).unwrap();
        assert_eq!(outcome, SeedOutcome::Missing);
    }

    #[test]
    fn cancelled_copy_stops_before_next_file() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("eq");
        fs::create_dir(&root).unwrap();
        seed_layout(&dir.path().join(env::SEED_INSTALL_DIR));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = prepare_install(&root, &cancel).unwrap_err();

        assert!(matches!(err, PatchError::Cancelled));
        assert!(!root.join(env::GAME_EXECUTABLE).exists());
        assert!(!root.join("Resources").exists());
    }

    #[test]
    fn keeps_newer_destination_of_similar_size() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed");
        let root = dir.path().join("root");
        fs::create_dir_all(&seed).unwrap();
        fs::create_dir_all(&root).unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        fs::write(seed.join("kept.txt"), b"seed copy").unwrap();
        fs::write(root.join("kept.txt"), b"live copy").unwrap();
        set_mtime(&seed.join("kept.txt"), base);
        set_mtime(&root.join("kept.txt"), base + Duration::from_secs(60));

        fs::write(seed.join("stale.txt"), b"fresh").unwrap();
        fs::write(root.join("stale.txt"), b"stale").unwrap();
        set_mtime(&seed.join("stale.txt"), base + Duration::from_secs(60));
        set_mtime(&root.join("stale.txt"), base);

        fs::write(seed.join("grown.txt"), vec![b'x'; 500]).unwrap();
        fs::write(root.join("grown.txt"), b"tiny").unwrap();
        set_mtime(&seed.join("grown.txt"), base);
        set_mtime(&root.join("grown.txt"), base + Duration::from_secs(60));

        let copied = copy_seed(&seed, &root, &CancellationToken::new()).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(fs::read(root.join("kept.txt")).unwrap(), b"live copy");
        assert_eq!(fs::read(root.join("stale.txt")).unwrap(), b"fresh");
        assert_eq!(fs::read(root.join("grown.txt")).unwrap().len(), 500);
    }
}
