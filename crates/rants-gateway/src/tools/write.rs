use std::sync::Arc;

use serde_json::json;

use super::{optional_str, required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, WRITE_TOOL};
use crate::errors::ErrorKind;

pub(super) fn write_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: WRITE_TOOL.to_string(),
            description: "Write a file inside the workspace, creating parent directories"
                .to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["filePath", "content"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let file_path = match required_str(&params, "filePath") {
                    Ok(path) => path.to_string(),
                    Err(outcome) => return outcome,
                };
                let content = optional_str(&params, "content").unwrap_or_default().to_string();

                let path = match workspace::resolve_path(&ctx.workspace_root, &file_path) {
                    Ok(path) => path,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                    }
                };
                if let Some(parent) = path.parent() {
                    if let Err(error) = tokio::fs::create_dir_all(parent).await {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("failed to create parent directories: {error}"),
                        );
                    }
                }
                match tokio::fs::write(&path, content).await {
                    Ok(()) => ToolOutcome::success(json!({ "ok": true })),
                    Err(error) => ToolOutcome::failure(
                        ErrorKind::ToolExecError,
                        format!("failed to write {file_path}: {error}"),
                    ),
                }
            })
        }),
    }
}
