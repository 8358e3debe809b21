//! Remote store interfaces
//!
//! [`RemoteApi`] is the authoritative backend; [`ChangeFeed`] delivers its
//! live mutations. Both are traits so the sync manager can run against the
//! HTTP/WebSocket implementations here or against in-memory doubles.

mod feed;
mod http;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::connectivity::HealthProbe;
use crate::models::{Invite, Membership, Record};
use crate::store::Collection;

pub use feed::{
    BroadcastChangeFeed, ChangeFeed, ChangeKind, FeedSubscription, RemoteChangeEvent, WsChangeFeed,
};
pub use http::HttpRemoteApi;

/// Failures talking to the remote store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, timeout or unreachable host
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Server error: {message} ({status})")]
    Server { status: u16, message: String },
    /// The caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

impl RemoteError {
    /// Whether retrying later may succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized(_) | Self::InvalidPayload(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidPayload(error.to_string())
        } else if let Some(status) = error.status() {
            Self::Server {
                status: status.as_u16(),
                message: error.to_string(),
            }
        } else {
            Self::Transport(error.to_string())
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// The authoritative remote store.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Lightweight reachability check.
    async fn health(&self) -> RemoteResult<()>;

    /// Insert or fully replace a record.
    async fn upsert_record(&self, collection: Collection, record: &Record) -> RemoteResult<()>;

    /// Delete a record on behalf of `subject_id`.
    async fn delete_record(
        &self,
        collection: Collection,
        record_id: &str,
        subject_id: &str,
    ) -> RemoteResult<()>;

    async fn update_label(
        &self,
        collection: Collection,
        record_id: &str,
        label: &str,
    ) -> RemoteResult<()>;

    /// Records owned by `subject_id`.
    async fn list_owned(&self, collection: Collection, subject_id: &str)
        -> RemoteResult<Vec<Record>>;

    /// Records shared with `subject_id` through a membership.
    async fn list_by_membership(
        &self,
        collection: Collection,
        subject_id: &str,
    ) -> RemoteResult<Vec<Record>>;

    async fn list_memberships(&self, subject_id: &str) -> RemoteResult<Vec<Membership>>;

    async fn add_membership(&self, membership: &Membership) -> RemoteResult<()>;

    async fn create_invite(&self, invite: &Invite) -> RemoteResult<()>;

    /// Look up an invite by normalized code. `None` when it does not exist.
    async fn find_invite(&self, code: &str) -> RemoteResult<Option<Invite>>;

    /// Count one redemption and return the new use count.
    async fn increment_invite_uses(&self, code: &str) -> RemoteResult<u32>;
}

/// Health probe backed by [`RemoteApi::health`]. Any successful call
/// counts as reachable.
#[derive(Clone)]
pub struct RemoteHealthProbe {
    remote: Arc<dyn RemoteApi>,
}

impl RemoteHealthProbe {
    pub fn new(remote: Arc<dyn RemoteApi>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl HealthProbe for RemoteHealthProbe {
    async fn probe(&self) -> bool {
        match self.remote.health().await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("Health check failed: {error}");
                false
            }
        }
    }
}
