//! Error types for waymark-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::remote::RemoteError;
use crate::store::Collection;

/// Result type alias using waymark-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in waymark-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or row not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Required collections could not be created when opening the store.
    #[error(
        "Local store self-heal failed after {attempts} attempts; missing collections: {}",
        format_collections(.missing)
    )]
    SelfHealFailed {
        attempts: u32,
        missing: Vec<Collection>,
    },

    /// Another process holds the store open and blocks the schema upgrade.
    #[error(
        "Local store upgrade is blocked by another open connection (version {version}); close other instances and retry"
    )]
    UpgradeBlocked { version: i64 },

    /// Remote API error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Invite validation error
    #[error(transparent)]
    Invite(#[from] InviteError),

    /// Operation requires connectivity
    #[error("This action requires a connection to the server")]
    Offline,

    /// No subject is signed in / the sync manager has not been started
    #[error("Sync manager has not been started for a subject")]
    NotStarted,

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// A remote rejection that retrying will not change.
    pub const fn is_permanent_remote(&self) -> bool {
        matches!(self, Self::Remote(error) if !error.is_transient())
    }
}

/// User-facing invite validation failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
    #[error("Invite code must be 6 characters from the invite alphabet")]
    Malformed,
    #[error("Invite code was not found")]
    NotFound,
    #[error("Invite code has expired")]
    Expired,
    #[error("Invite code has no remaining uses")]
    Exhausted,
}

fn format_collections(collections: &[Collection]) -> String {
    collections
        .iter()
        .map(|collection| collection.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_non_transient_remote_errors_are_permanent() {
        assert!(Error::from(RemoteError::Unauthorized("no".to_string())).is_permanent_remote());
        assert!(Error::from(RemoteError::Server {
            status: 404,
            message: "missing".to_string(),
        })
        .is_permanent_remote());
        assert!(!Error::from(RemoteError::Server {
            status: 503,
            message: "down".to_string(),
        })
        .is_permanent_remote());
        assert!(!Error::from(RemoteError::Transport("reset".to_string())).is_permanent_remote());
        assert!(!Error::Offline.is_permanent_remote());
    }

    #[test]
    fn self_heal_error_names_missing_collections() {
        let error = Error::SelfHealFailed {
            attempts: 3,
            missing: vec![Collection::Packs, Collection::Outbox],
        };
        let message = error.to_string();
        assert!(message.contains("3 attempts"));
        assert!(message.contains("packs, outbox"));
    }

    #[test]
    fn invite_errors_are_distinct() {
        assert_ne!(
            Error::from(InviteError::Expired).to_string(),
            Error::from(InviteError::Exhausted).to_string()
        );
    }
}
