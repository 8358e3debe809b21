//! Outbox operation model

use serde::{Deserialize, Serialize};

use super::Invite;

/// Discriminant of an [`OutboxOperation`], used for filtering and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Upsert,
    Delete,
    LabelUpdate,
    InviteCreate,
    InviteRedeem,
}

impl OpKind {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Upsert => "upsert",
            Self::Delete => "delete",
            Self::LabelUpdate => "label_update",
            Self::InviteCreate => "invite_create",
            Self::InviteRedeem => "invite_redeem",
        }
    }
}

/// A queued remote intent with its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxOperation {
    /// Push the current local copy of the record
    Upsert,
    /// Delete the record remotely
    Delete,
    /// Rename the record
    LabelUpdate { label: String },
    /// Register an invite code
    InviteCreate { invite: Invite },
    /// Count one redemption of an invite code
    InviteRedeem { code: String },
}

impl OutboxOperation {
    pub const fn kind(&self) -> OpKind {
        match self {
            Self::Upsert => OpKind::Upsert,
            Self::Delete => OpKind::Delete,
            Self::LabelUpdate { .. } => OpKind::LabelUpdate,
            Self::InviteCreate { .. } => OpKind::InviteCreate,
            Self::InviteRedeem { .. } => OpKind::InviteRedeem,
        }
    }
}

/// A persisted outbox entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxOp {
    /// Auto-incremented store key, assigned on enqueue
    #[serde(skip)]
    pub id: i64,
    pub record_id: String,
    pub op: OutboxOperation,
    /// Enqueue time (fixed-width RFC 3339)
    pub created_at: String,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl OutboxOp {
    pub const fn kind(&self) -> OpKind {
        self.op.kind()
    }

    pub const fn is_dead(&self, max_retries: u32) -> bool {
        self.retries >= max_retries
    }
}
