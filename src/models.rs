//! Shared data types for the sync core.
//!
//! These mirror the server's wire shapes: execution processes arrive over the
//! patch stream keyed by id, follow-up drafts are fetched and saved through
//! the HTTP API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single execution process as streamed by the server.
///
/// Only `id` and `created_at` are load-bearing for the sync core (identity
/// and display ordering); everything else the server sends is carried
/// opaquely in `extra` so patches never drop fields this crate doesn't model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProcess {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub run_reason: String,
    #[serde(default)]
    pub dropped: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The authoritative server copy of a follow-up draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpDraft {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub image_ids: Vec<String>,
    /// Opaque server-side version marker, incremented on every write.
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub queued: bool,
}

/// The locally editable subset of a draft, as held by the view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftFields {
    pub prompt: String,
    pub variant: Option<String>,
    pub image_ids: Vec<String>,
}

impl DraftFields {
    /// Extracts the editable fields from a server draft.
    pub fn from_draft(draft: &FollowUpDraft) -> Self {
        Self {
            prompt: draft.prompt.clone(),
            variant: draft.variant.clone(),
            image_ids: draft.image_ids.clone(),
        }
    }
}

/// A changed-fields-only save payload.
///
/// Absent fields are omitted from the serialized body entirely; a present
/// `variant` of `None` serializes as an explicit `null` (clearing the label
/// on the server is a real edit).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DraftPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ids: Option<Vec<String>>,
}

impl DraftPatch {
    /// Returns true if no field differs, i.e. nothing needs saving.
    pub fn is_empty(&self) -> bool {
        self.prompt.is_none() && self.variant.is_none() && self.image_ids.is_none()
    }
}

/// Draft save status, as displayed by the view.
///
/// Transitions are driven solely by the autosave coordinator except `Sent`,
/// which the view sets when a queued draft is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Idle,
    Saving,
    Saved,
    Offline,
    Sent,
}

impl fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SaveStatus::Idle => write!(f, "idle"),
            SaveStatus::Saving => write!(f, "saving"),
            SaveStatus::Saved => write!(f, "saved"),
            SaveStatus::Offline => write!(f, "offline"),
            SaveStatus::Sent => write!(f, "sent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_patch_empty_serializes_to_empty_object() {
        let patch = DraftPatch::default();
        assert!(patch.is_empty());
        assert_eq!(serde_json::to_string(&patch).unwrap(), "{}");
    }

    #[test]
    fn test_draft_patch_variant_null_is_explicit() {
        let patch = DraftPatch {
            variant: Some(None),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"variant":null}"#);
    }

    #[test]
    fn test_draft_patch_omits_unchanged_fields() {
        let patch = DraftPatch {
            prompt: Some("hello".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&patch).unwrap(),
            r#"{"prompt":"hello"}"#
        );
    }

    #[test]
    fn test_execution_process_carries_unknown_fields() {
        let json = r#"{
            "id": "p1",
            "created_at": "2025-01-01T00:00:00Z",
            "status": "running",
            "exit_code": 0
        }"#;
        let process: ExecutionProcess = serde_json::from_str(json).unwrap();
        assert_eq!(process.id, "p1");
        assert_eq!(process.status, "running");
        assert!(process.extra.contains_key("exit_code"));

        let back = serde_json::to_value(&process).unwrap();
        assert_eq!(back["exit_code"], 0);
    }

    #[test]
    fn test_draft_fields_from_draft() {
        let draft = FollowUpDraft {
            prompt: "p".to_string(),
            variant: Some("fast".to_string()),
            image_ids: vec!["a".to_string()],
            version: 3,
            queued: false,
        };
        let fields = DraftFields::from_draft(&draft);
        assert_eq!(fields.prompt, "p");
        assert_eq!(fields.variant.as_deref(), Some("fast"));
        assert_eq!(fields.image_ids, vec!["a".to_string()]);
    }
}
