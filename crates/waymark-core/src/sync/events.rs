//! Sync lifecycle events

use serde::Serialize;

/// Counts from one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    /// Whether the pass stopped early because connectivity was lost
    pub interrupted: bool,
}

/// Counts from one pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// Remote records written locally
    pub merged: usize,
    /// Remote records where the local copy won
    pub skipped: usize,
}

/// Notifications emitted by the sync manager, in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    DrainStart,
    DrainEnd {
        delivered: usize,
        failed: usize,
        interrupted: bool,
    },
    PullComplete {
        merged: usize,
        skipped: usize,
    },
    /// A live remote change was written locally
    RemoteApplied {
        record_id: String,
    },
    /// A background failure; `context` names the step that failed
    Error {
        context: String,
        message: String,
    },
}

impl SyncEvent {
    pub(crate) fn error(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Error {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

impl From<DrainReport> for SyncEvent {
    fn from(report: DrainReport) -> Self {
        Self::DrainEnd {
            delivered: report.delivered,
            failed: report.failed,
            interrupted: report.interrupted,
        }
    }
}

impl From<PullReport> for SyncEvent {
    fn from(report: PullReport) -> Self {
        Self::PullComplete {
            merged: report.merged,
            skipped: report.skipped,
        }
    }
}

/// Result of [`super::SyncManager::drain_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Not online; nothing was attempted
    Offline,
    /// Another drain was already running
    AlreadyRunning,
    /// No subject has been started
    NotStarted,
    Completed(DrainReport),
}
