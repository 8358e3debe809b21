//! Shared sync status types.

use serde::Serialize;

/// Coarse sync state for status indicators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}

/// Point-in-time view of the sync manager.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub online: bool,
    pub draining: bool,
    /// Outbox entries still eligible for delivery
    pub pending: usize,
    /// Outbox entries at the retry ceiling
    pub dead_letters: usize,
    pub last_pull_at: Option<String>,
    pub last_drain_at: Option<String>,
}

impl SyncStatus {
    pub const fn state(&self) -> SyncState {
        if self.dead_letters > 0 {
            SyncState::Error
        } else if !self.online {
            SyncState::Offline
        } else if self.draining || self.pending > 0 {
            SyncState::Syncing
        } else {
            SyncState::Synced
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_prefers_dead_letters_then_connectivity() {
        let mut status = SyncStatus {
            online: true,
            ..SyncStatus::default()
        };
        assert_eq!(status.state(), SyncState::Synced);

        status.pending = 2;
        assert_eq!(status.state(), SyncState::Syncing);

        status.online = false;
        assert_eq!(status.state(), SyncState::Offline);

        status.dead_letters = 1;
        assert_eq!(status.state(), SyncState::Error);
    }
}
