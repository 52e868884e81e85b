//! Tool registry and sandboxed executor contract.
//!
//! The registered set is fixed at startup and identical across sessions of
//! a tenant; its canonical digest is recorded on every transcript. Executors
//! never fail the session: every internal failure maps to an `ok=false`
//! result carrying an [`ErrorKind`].

mod bash;
mod batch;
mod edit;
mod glob;
mod grep;
mod ls;
mod multiedit;
mod patch;
mod read;
mod task;
pub mod workspace;
mod write;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::Instant;
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::transcript::{tool_schema_digest, ToolCallRecord, ToolResultRecord};

pub const BASH_TOOL: &str = "bash";
pub const READ_TOOL: &str = "read";
pub const WRITE_TOOL: &str = "write";
pub const EDIT_TOOL: &str = "edit";
pub const MULTIEDIT_TOOL: &str = "multiedit";
pub const PATCH_TOOL: &str = "patch";
pub const LS_TOOL: &str = "ls";
pub const GLOB_TOOL: &str = "glob";
pub const GREP_TOOL: &str = "grep";
pub const BATCH_TOOL: &str = "batch";
pub const TASK_TOOL: &str = "task";

pub const TRUNCATION_MARKER: &str = "[output truncated:";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub schema: Value,
}

/// Outcome of one executor invocation, before it becomes a stored
/// [`ToolResultRecord`].
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    pub ok: bool,
    pub output: Value,
    pub error_kind: Option<ErrorKind>,
}

impl ToolOutcome {
    pub fn success(output: Value) -> Self {
        Self {
            ok: true,
            output,
            error_kind: None,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: json!({ "error": message.into() }),
            error_kind: Some(kind),
        }
    }
}

/// Execution context handed to every tool: sandbox root, budget, identity.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub workspace_root: PathBuf,
    pub deadline: Instant,
    pub tenant_id: String,
    pub session_id: Uuid,
    pub output_max_bytes: usize,
}

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;
pub type ToolExecutor = Arc<dyn Fn(Value, ToolContext) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredTool {
    pub schema: ToolSchema,
    pub executor: ToolExecutor,
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn register(&mut self, tool: RegisteredTool) {
        self.tools.insert(tool.schema.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|tool| tool.schema.clone())
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn digest(&self) -> String {
        tool_schema_digest(&self.schemas())
    }

    /// Run one validated call to completion. Never returns an error: unknown
    /// tools, executor failures, and deadline overruns all become `ok=false`
    /// results the next generation can observe.
    pub async fn execute(&self, call: &ToolCallRecord, ctx: ToolContext) -> ToolResultRecord {
        let started_at = Utc::now();
        let max_bytes = ctx.output_max_bytes;
        let deadline = ctx.deadline;

        let outcome = match self.get(&call.tool) {
            None => ToolOutcome::failure(
                ErrorKind::ToolExecError,
                format!("unknown tool: {}", call.tool),
            ),
            Some(registered) => {
                let future = (registered.executor)(call.parameters.clone(), ctx);
                match tokio::time::timeout_at(deadline, future).await {
                    Ok(outcome) => outcome,
                    Err(_) => ToolOutcome::failure(
                        ErrorKind::DeadlineExceeded,
                        "tool execution exceeded the session deadline",
                    ),
                }
            }
        };

        let (output, bytes_truncated) = truncate_output(outcome.output, max_bytes);
        ToolResultRecord {
            call_id: call.id,
            ok: outcome.ok,
            output,
            error_kind: outcome.error_kind,
            started_at,
            finished_at: Utc::now(),
            bytes_truncated,
        }
    }
}

/// Fixed tool set exposed to every session.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(bash::bash_tool());
    registry.register(read::read_tool());
    registry.register(write::write_tool());
    registry.register(edit::edit_tool());
    registry.register(multiedit::multiedit_tool());
    registry.register(patch::patch_tool());
    registry.register(ls::ls_tool());
    registry.register(glob::glob_tool());
    registry.register(grep::grep_tool());
    registry.register(batch::batch_tool());
    registry.register(task::task_tool());
    registry
}

/// Clip an output payload to the configured byte cap. String payloads are
/// clipped in place; structured payloads that serialize over the cap are
/// replaced by their clipped serialization. Output exactly at the cap is
/// left untouched.
pub fn truncate_output(output: Value, max_bytes: usize) -> (Value, u64) {
    let text = match &output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    if text.len() <= max_bytes {
        return (output, 0);
    }

    let removed = (text.len() - max_bytes) as u64;
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let clipped = format!("{}\n{} {} bytes removed]", &text[..end], TRUNCATION_MARKER, removed);
    (Value::String(clipped), removed)
}

/// Structural JSON-schema validation: object root, required keys, property
/// type checks, and `additionalProperties: false` enforcement.
pub fn validate_parameters(schema: &Value, parameters: &Value) -> Result<(), String> {
    let object = parameters
        .as_object()
        .ok_or_else(|| "tool parameters must be a JSON object".to_string())?;
    let schema_object = schema
        .as_object()
        .ok_or_else(|| "tool schema root must be a JSON object".to_string())?;

    if schema_object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|schema_type| schema_type != "object")
    {
        return Err("tool schema root type must be 'object'".to_string());
    }

    if let Some(required) = schema_object.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required parameter '{key}'"));
            }
        }
    }

    let empty = serde_json::Map::new();
    let properties = schema_object
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let additional_allowed = schema_object
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    for (key, value) in object {
        let Some(property) = properties.get(key) else {
            if additional_allowed {
                continue;
            }
            return Err(format!("unexpected parameter '{key}'"));
        };
        let Some(expected) = property.get("type").and_then(Value::as_str) else {
            continue;
        };
        let matches = match expected {
            "string" => value.is_string(),
            "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true,
        };
        if !matches {
            return Err(format!(
                "parameter '{key}' expected type '{expected}' but received '{}'",
                json_type_name(value)
            ));
        }
    }

    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn required_str<'a>(parameters: &'a Value, key: &str) -> Result<&'a str, ToolOutcome> {
    parameters.get(key).and_then(Value::as_str).ok_or_else(|| {
        ToolOutcome::failure(
            ErrorKind::ToolExecError,
            format!("missing required parameter '{key}'"),
        )
    })
}

fn optional_str<'a>(parameters: &'a Value, key: &str) -> Option<&'a str> {
    parameters.get(key).and_then(Value::as_str)
}

fn optional_u64(parameters: &Value, key: &str) -> Option<u64> {
    parameters.get(key).and_then(Value::as_u64)
}

fn optional_bool(parameters: &Value, key: &str) -> Option<bool> {
    parameters.get(key).and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_digest_matches_schema_digest() {
        let registry = default_registry();
        assert_eq!(registry.digest(), tool_schema_digest(&registry.schemas()));
        assert!(registry.contains(BASH_TOOL));
        assert!(registry.contains(PATCH_TOOL));
        assert!(registry.contains(TASK_TOOL));
        assert_eq!(registry.names().len(), 11);
    }

    #[test]
    fn truncation_boundary_is_exact() {
        let at_cap = Value::String("x".repeat(100));
        let (kept, removed) = truncate_output(at_cap.clone(), 100);
        assert_eq!(kept, at_cap);
        assert_eq!(removed, 0);

        let over_cap = Value::String("x".repeat(101));
        let (clipped, removed) = truncate_output(over_cap, 100);
        assert_eq!(removed, 1);
        let text = clipped.as_str().expect("clipped output is a string");
        assert!(text.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn structured_output_over_cap_becomes_clipped_string() {
        let value = json!({ "stdout": "y".repeat(64) });
        let (clipped, removed) = truncate_output(value, 16);
        assert!(removed > 0);
        assert!(clipped.is_string());
    }

    #[test]
    fn validate_parameters_enforces_required_and_types() {
        let schema = json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": { "type": "string" },
                "timeout": { "type": "integer" }
            }
        });
        assert!(validate_parameters(&schema, &json!({"command": "ls"})).is_ok());
        assert!(validate_parameters(&schema, &json!({})).is_err());
        assert!(validate_parameters(&schema, &json!({"command": 3})).is_err());
        assert!(validate_parameters(&schema, &json!({"command": "ls", "timeout": "soon"})).is_err());
    }

    #[test]
    fn validate_parameters_rejects_unknown_keys_when_closed() {
        let schema = json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "additionalProperties": false
        });
        assert!(validate_parameters(&schema, &json!({"path": "."})).is_ok());
        assert!(validate_parameters(&schema, &json!({"other": 1})).is_err());
    }
}
