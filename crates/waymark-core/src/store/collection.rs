//! Fixed set of local collections

use std::fmt;

use serde::{Deserialize, Serialize};

/// A named, independently keyed partition of the local store.
///
/// Every variant maps to one `SQLite` table; the store creates any that are
/// missing when it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Primary records, keyed by record id
    Plans,
    /// Small scalars such as the active record pointer
    Meta,
    /// Per-record sub-documents keyed `"{record_id}:{kind}"`
    Packs,
    /// Locally cached blobs keyed `"{record_id}:{name}"`
    Attachments,
    /// Cached membership relation keyed `"{record_id}:{subject_id}"`
    Memberships,
    /// Pending remote operations, auto-increment keyed
    Outbox,
}

impl Collection {
    /// Collections the store guarantees before any operation runs.
    pub const ALL: [Self; 6] = [
        Self::Plans,
        Self::Meta,
        Self::Packs,
        Self::Attachments,
        Self::Memberships,
        Self::Outbox,
    ];

    /// Table name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plans => "plans",
            Self::Meta => "meta",
            Self::Packs => "packs",
            Self::Attachments => "attachments",
            Self::Memberships => "memberships",
            Self::Outbox => "outbox",
        }
    }

    /// Whether keys are assigned by the store instead of the caller.
    pub const fn is_auto_increment(self) -> bool {
        matches!(self, Self::Outbox)
    }

    pub(crate) const fn create_statements(self) -> &'static [&'static str] {
        match self {
            Self::Plans => &["CREATE TABLE IF NOT EXISTS plans (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )"],
            Self::Meta => &["CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )"],
            Self::Packs => &["CREATE TABLE IF NOT EXISTS packs (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )"],
            Self::Attachments => &["CREATE TABLE IF NOT EXISTS attachments (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )"],
            Self::Memberships => &["CREATE TABLE IF NOT EXISTS memberships (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL
            )"],
            Self::Outbox => &[
                "CREATE TABLE IF NOT EXISTS outbox (
                    key INTEGER PRIMARY KEY AUTOINCREMENT,
                    created_at TEXT NOT NULL,
                    value TEXT NOT NULL
                )",
                "CREATE INDEX IF NOT EXISTS idx_outbox_created_at ON outbox(created_at)",
            ],
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Prefix shared by every key that belongs to `record_id`.
pub fn record_prefix(record_id: &str) -> String {
    format!("{record_id}:")
}

/// Key of a per-record pack row.
pub fn pack_key(record_id: &str, kind: &str) -> String {
    format!("{record_id}:{kind}")
}

/// Key of a cached attachment row.
pub fn attachment_key(record_id: &str, name: &str) -> String {
    format!("{record_id}:{name}")
}
