//! Membership model

use serde::{Deserialize, Serialize};

/// Access level a subject holds on a record it does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    #[default]
    Editor,
    Viewer,
}

/// Grants `subject_id` access to `record_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub record_id: String,
    pub subject_id: String,
    #[serde(default)]
    pub role: Role,
}

impl Membership {
    pub fn new(record_id: impl Into<String>, subject_id: impl Into<String>, role: Role) -> Self {
        Self {
            record_id: record_id.into(),
            subject_id: subject_id.into(),
            role,
        }
    }

    /// Local store key: `"{record_id}:{subject_id}"`.
    pub fn key(&self) -> String {
        membership_key(&self.record_id, &self.subject_id)
    }
}

pub fn membership_key(record_id: &str, subject_id: &str) -> String {
    format!("{record_id}:{subject_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_to_editor_when_missing() {
        let membership: Membership =
            serde_json::from_str(r#"{"record_id":"p1","subject_id":"u2"}"#).unwrap();
        assert_eq!(membership.role, Role::Editor);
        assert_eq!(membership.key(), "p1:u2");
    }
}
