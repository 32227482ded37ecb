//! Per-change-set run state.

use serde::Serialize;

/// Lifecycle of a change set within a run.
///
/// `Unplanned → Planned → Applying → Applied`, or `Applying → Failed`.
/// `Applied` and `Failed` are terminal; a failed change set is rolled back and
/// planned again on the next run. A dry run never enters `Applying`: a
/// previewed change set stays `Planned`, or goes `Planned → Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetStatus {
    /// Not yet considered by the planner.
    Unplanned,
    /// Selected for this run.
    Planned,
    /// Operations are being applied.
    Applying,
    /// Committed and recorded in the ledger.
    Applied,
    /// Rolled back after a failure.
    Failed,
}

impl std::fmt::Display for ChangeSetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeSetStatus::Unplanned => write!(f, "unplanned"),
            ChangeSetStatus::Planned => write!(f, "planned"),
            ChangeSetStatus::Applying => write!(f, "applying"),
            ChangeSetStatus::Applied => write!(f, "applied"),
            ChangeSetStatus::Failed => write!(f, "failed"),
        }
    }
}

/// State of one change set in a run or status report.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeSetState {
    /// Change set identifier.
    pub change_set_id: String,
    /// Current status.
    pub status: ChangeSetStatus,
    /// When it was applied (microseconds since epoch).
    pub applied_at: Option<u64>,
    /// Error message if it failed.
    pub error: Option<String>,
}

impl ChangeSetState {
    /// Create an unplanned state.
    pub fn new(change_set_id: impl Into<String>) -> Self {
        Self {
            change_set_id: change_set_id.into(),
            status: ChangeSetStatus::Unplanned,
            applied_at: None,
            error: None,
        }
    }

    /// State of a change set already found in the ledger.
    pub fn already_applied(change_set_id: impl Into<String>, applied_at: u64) -> Self {
        Self {
            status: ChangeSetStatus::Applied,
            applied_at: Some(applied_at),
            ..Self::new(change_set_id)
        }
    }

    /// Mark as selected by the planner.
    pub fn plan(&mut self) {
        self.status = ChangeSetStatus::Planned;
    }

    /// Mark as being applied.
    pub fn start(&mut self) {
        self.status = ChangeSetStatus::Applying;
    }

    /// Mark as applied.
    pub fn complete(&mut self, applied_at: u64) {
        self.status = ChangeSetStatus::Applied;
        self.applied_at = Some(applied_at);
    }

    /// Mark as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ChangeSetStatus::Failed;
        self.error = Some(error.into());
    }
}
