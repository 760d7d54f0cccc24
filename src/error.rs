use std::path::PathBuf;

use thiserror::Error;

use crate::networking::FetchError;

pub type Result<T> = std::result::Result<T, PatchError>;

/// Failures of a patch request. Whether one is fatal depends on where it happens.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    FetchFailed(#[from] FetchError),

    #[error("decode filelist: {0}")]
    MalformedManifest(String),

    #[error("{action} {}: {source}", path.display())]
    LocalIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} has .. inside it or is not relative")]
    UnsafePath(String),

    #[error("{name} downloaded with digest {actual}, filelist says {expected}")]
    DigestMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("unpack {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("patch cancelled")]
    Cancelled,

    #[error("patch already in progress")]
    AlreadyRunning,
}

impl PatchError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::LocalIo {
            action,
            path: path.into(),
            source,
        }
    }

    /// Errors that mean "no manifest this run" rather than a broken pass.
    pub fn is_manifest_unavailable(&self) -> bool {
        matches!(
            self,
            PatchError::FetchFailed(_) | PatchError::MalformedManifest(_)
        )
    }
}
