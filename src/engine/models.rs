use std::time::Duration;

/// Outcome of one reconciliation pass. Owned by the caller for display, then dropped.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconciliationResult {
    pub version: String,
    pub up_to_date: bool,
    pub files_changed: bool,
    /// Bytes actually written to disk, bundle archives included.
    pub bytes_downloaded: u64,
    pub files_fetched: usize,
    pub files_deleted: usize,
    pub entries_rejected: usize,
    pub version_saved: bool,
    pub elapsed: Duration,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelfUpdateOutcome {
    NotNeeded,
    RemoteUnavailable,
    Applied,
    Cancelled,
    Failed(String),
}

/// What a patch request did, reported back to the front-end.
#[derive(Clone, Debug, PartialEq)]
pub struct PatchReport {
    /// `None` when no manifest was available this run.
    pub reconciliation: Option<ReconciliationResult>,
    pub self_update: SelfUpdateOutcome,
    pub elapsed: Duration,
}

impl PatchReport {
    pub fn files_changed(&self) -> bool {
        self.reconciliation
            .as_ref()
            .is_some_and(|result| result.files_changed)
    }
}
