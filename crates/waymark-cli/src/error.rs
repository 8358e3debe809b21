use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] waymark_core::Error),
    #[error(transparent)]
    Config(#[from] waymark_core::ConfigError),
    #[error(transparent)]
    Remote(#[from] waymark_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Record ID cannot be empty")]
    EmptyRecordId,
    #[error("Label cannot be empty")]
    EmptyLabel,
    #[error("Invalid field `{0}`; expected NAME=VALUE")]
    InvalidField(String),
    #[error("Record not found: {0}")]
    RecordNotFound(String),
    #[error("No subject given. Pass --subject or set WAYMARK_SUBJECT.")]
    SubjectRequired,
    #[error("Sync is not configured. Set WAYMARK_API_URL (and WAYMARK_API_TOKEN) to enable `waymark sync`.")]
    SyncNotConfigured,
    #[error("Backend is unreachable; queued operations will be delivered on the next sync")]
    Unreachable,
}
