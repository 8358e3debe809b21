//! Record model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::util::{format_timestamp, parse_timestamp};

/// Field-name prefix marking payload fields that never leave the device
/// (cached blobs, UI state). They are stripped before upload.
pub const LOCAL_ONLY_PREFIX: char = '_';

/// Payload field updated by label-update operations.
pub const LABEL_FIELD: &str = "label";

/// An opaque, versioned document stored in a collection.
///
/// Writes are always full-record replacements; payload fields beyond the
/// well-known ones are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Collection-unique identifier
    pub id: String,
    /// Authorization subject that owns the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Authoritative last-modified timestamp (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Shadow timestamp of the last local save, used only when `updated_at`
    /// is missing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_saved_at: Option<String>,
    /// Arbitrary payload fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record with the given id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner_id: None,
            updated_at: None,
            local_saved_at: None,
            fields: Map::new(),
        }
    }

    /// Create an empty record with a fresh time-sortable id.
    #[must_use]
    pub fn with_generated_id() -> Self {
        Self::new(Uuid::now_v7().to_string())
    }

    #[must_use]
    pub fn owned_by(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn updated(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn label(&self) -> Option<&str> {
        self.field(LABEL_FIELD).and_then(Value::as_str)
    }

    /// Authoritative timestamp, if present and well-formed.
    pub fn remote_timestamp(&self) -> Option<DateTime<Utc>> {
        self.updated_at.as_deref().and_then(parse_timestamp)
    }

    /// Best-known freshness: `updated_at`, falling back to `local_saved_at`.
    pub fn best_timestamp(&self) -> Option<DateTime<Utc>> {
        self.remote_timestamp().or_else(|| {
            self.local_saved_at
                .as_deref()
                .and_then(parse_timestamp)
        })
    }

    /// Stamp a local edit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        let stamp = format_timestamp(now);
        self.updated_at = Some(stamp.clone());
        self.local_saved_at = Some(stamp);
    }

    pub fn is_owned_by(&self, subject_id: &str) -> bool {
        self.owner_id.as_deref() == Some(subject_id)
    }

    /// Copy suitable for upload: no shadow timestamp, no local-only fields.
    #[must_use]
    pub fn for_remote(&self) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|(name, _)| !name.starts_with(LOCAL_ONLY_PREFIX))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            updated_at: self.updated_at.clone(),
            local_saved_at: None,
            fields,
        }
    }
}
