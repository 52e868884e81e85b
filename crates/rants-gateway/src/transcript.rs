//! Canonical transcript and session data model.
//!
//! The transcript is the context `C` presented to the generator: system,
//! user input, a digest of the tool schemas visible to the session, and an
//! ordered list of steps. Everything here is owned by the transcript store;
//! handlers only ever hold short-lived snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::tools::ToolSchema;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One orchestration instance: own transcript, depth, and deadline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecursiveSession {
    pub session_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub tenant_id: String,
    pub depth: u32,
    pub created_at: DateTime<Utc>,
    pub deadline_at: DateTime<Utc>,
    pub status: SessionStatus,
}

impl RecursiveSession {
    pub fn root(tenant_id: impl Into<String>, max_wallclock_seconds: u64) -> Self {
        let created_at = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            parent_id: None,
            tenant_id: tenant_id.into(),
            depth: 0,
            created_at,
            deadline_at: created_at + chrono::Duration::seconds(max_wallclock_seconds as i64),
            status: SessionStatus::Running,
        }
    }

    /// Child sessions inherit the parent's remaining wallclock; they never
    /// extend it.
    pub fn child_of(parent: &RecursiveSession) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            parent_id: Some(parent.session_id),
            tenant_id: parent.tenant_id.clone(),
            depth: parent.depth + 1,
            created_at: Utc::now(),
            deadline_at: parent.deadline_at,
            status: SessionStatus::Running,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: Uuid,
    pub tool: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub call_id: Uuid,
    pub ok: bool,
    pub output: Value,
    pub error_kind: Option<ErrorKind>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub bytes_truncated: u64,
}

/// One generation cycle. Finalized steps satisfy
/// `tool_calls.len() == tool_results.len()`, and a step without an intent
/// carries neither calls nor results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub generator_output: String,
    pub tool_intent: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub tool_results: Vec<ToolResultRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn begin() -> Self {
        Self {
            generator_output: String::new(),
            tool_intent: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTranscript {
    pub system: Option<String>,
    pub user: String,
    pub tool_schema_digest: String,
    pub steps: Vec<Step>,
}

impl CanonicalTranscript {
    pub fn new(system: Option<String>, user: impl Into<String>, schemas: &[ToolSchema]) -> Self {
        Self {
            system,
            user: user.into(),
            tool_schema_digest: tool_schema_digest(schemas),
            steps: Vec::new(),
        }
    }

    /// Last non-empty generator output, newest first. Used to condense a
    /// child session into a `task` tool result.
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.steps
            .iter()
            .rev()
            .map(|step| step.generator_output.trim())
            .find(|text| !text.is_empty())
    }
}

/// Append-only record of one tool execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub tenant_id: String,
    pub session_id: Uuid,
    pub step_index: u32,
    pub call_id: Uuid,
    pub tool: String,
    pub ok: bool,
    pub error_kind: Option<ErrorKind>,
    pub timestamp: DateTime<Utc>,
    pub size_before: u64,
    pub size_after: u64,
}

/// SHA-256 over the canonical JSON encoding of the schema list, sorted by
/// tool name so registration order does not change the digest.
pub fn tool_schema_digest(schemas: &[ToolSchema]) -> String {
    let mut sorted: Vec<&ToolSchema> = schemas.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let serialized = serde_json::to_string(&sorted).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: format!("{name} tool"),
            schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn digest_is_stable_under_registration_order() {
        let forward = tool_schema_digest(&[schema("bash"), schema("read")]);
        let reverse = tool_schema_digest(&[schema("read"), schema("bash")]);
        assert_eq!(forward, reverse);
        assert_eq!(forward.len(), 64);
    }

    #[test]
    fn digest_changes_when_a_schema_changes() {
        let one = tool_schema_digest(&[schema("bash")]);
        let mut changed = schema("bash");
        changed.schema = json!({"type": "object", "properties": {"command": {"type": "string"}}});
        let two = tool_schema_digest(&[changed]);
        assert_ne!(one, two);
    }

    #[test]
    fn child_session_inherits_deadline_and_increments_depth() {
        let parent = RecursiveSession::root("tenant-a", 120);
        let child = RecursiveSession::child_of(&parent);
        assert_eq!(child.parent_id, Some(parent.session_id));
        assert_eq!(child.depth, 1);
        assert_eq!(child.deadline_at, parent.deadline_at);
        assert_eq!(child.tenant_id, parent.tenant_id);
    }

    #[test]
    fn last_assistant_text_skips_empty_outputs() {
        let mut transcript = CanonicalTranscript::new(None, "hi", &[]);
        let mut first = Step::begin();
        first.generator_output = "earlier".to_string();
        let mut second = Step::begin();
        second.generator_output = "   ".to_string();
        transcript.steps = vec![first, second];
        assert_eq!(transcript.last_assistant_text(), Some("earlier"));
    }
}
