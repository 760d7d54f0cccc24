use std::fmt;

// Where a patch request currently is. Reported to the progress sink on every change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchPhase {
    Idle,
    FetchingManifest,
    ComparingVersion,
    UpToDate,
    Reconciling,
    Finalizing,
    Done,
    Cancelled,
    Failed,
}

impl PatchPhase {
    pub fn label(self) -> &'static str {
        match self {
            PatchPhase::Idle => "Idle",
            PatchPhase::FetchingManifest => "Fetching file list",
            PatchPhase::ComparingVersion => "Comparing versions",
            PatchPhase::UpToDate => "Up to date",
            PatchPhase::Reconciling => "Patching",
            PatchPhase::Finalizing => "Finalizing",
            PatchPhase::Done => "Done",
            PatchPhase::Cancelled => "Cancelled",
            PatchPhase::Failed => "Failed",
        }
    }

    /// Phases after which no further work happens in this request.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PatchPhase::UpToDate | PatchPhase::Done | PatchPhase::Cancelled | PatchPhase::Failed
        )
    }
}

impl fmt::Display for PatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// Requests coming from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserAction {
    /// Patch and/or play according to the config switches.
    AutoPlay,
    Patch,
    Play,
}
