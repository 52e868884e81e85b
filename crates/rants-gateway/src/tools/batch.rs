use std::sync::Arc;

use serde_json::json;

use super::{RegisteredTool, ToolOutcome, ToolSchema, BATCH_TOOL};
use crate::errors::ErrorKind;

/// Schema-only registration. The orchestrator intercepts `batch` before
/// dispatch and runs the children concurrently itself; this executor only
/// fires if something calls the registry directly.
pub(super) fn batch_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: BATCH_TOOL.to_string(),
            description: "Execute several tools concurrently and wait for all of them"
                .to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "tool_uses": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "recipient_name": { "type": "string" },
                                "parameters": { "type": "object" }
                            },
                            "required": ["recipient_name", "parameters"]
                        }
                    }
                },
                "required": ["tool_uses"]
            }),
        },
        executor: Arc::new(|_params, _ctx| {
            Box::pin(async move {
                ToolOutcome::failure(
                    ErrorKind::ToolExecError,
                    "batch must be executed by the orchestrator",
                )
            })
        }),
    }
}
