use std::sync::Arc;

use serde_json::json;

use super::{RegisteredTool, ToolOutcome, ToolSchema, TASK_TOOL};
use crate::errors::ErrorKind;

/// Schema-only registration for the recursion primitive. The orchestrator
/// intercepts `task` and runs a child session; the registry fallback exists
/// so the tool still resolves and validates like any other.
pub(super) fn task_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: TASK_TOOL.to_string(),
            description: "Run a sub-task in a child session and return its summary".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "description": { "type": "string" },
                    "prompt": { "type": "string" }
                },
                "required": ["prompt"]
            }),
        },
        executor: Arc::new(|_params, _ctx| {
            Box::pin(async move {
                ToolOutcome::failure(
                    ErrorKind::ToolExecError,
                    "task must be executed by the orchestrator",
                )
            })
        }),
    }
}
