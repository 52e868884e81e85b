use std::sync::Arc;

use serde_json::json;

use super::{optional_u64, required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, READ_TOOL};
use crate::errors::ErrorKind;

const DEFAULT_LINE_LIMIT: u64 = 2000;

pub(super) fn read_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: READ_TOOL.to_string(),
            description: "Read a file from the workspace. Returns line-numbered content"
                .to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "offset": { "type": "integer" },
                    "limit": { "type": "integer" }
                },
                "required": ["filePath"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let file_path = match required_str(&params, "filePath") {
                    Ok(path) => path.to_string(),
                    Err(outcome) => return outcome,
                };
                let offset = optional_u64(&params, "offset").unwrap_or(0) as usize;
                let limit = optional_u64(&params, "limit").unwrap_or(DEFAULT_LINE_LIMIT) as usize;

                let path = match workspace::resolve_path(&ctx.workspace_root, &file_path) {
                    Ok(path) => path,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                    }
                };
                let content = match tokio::fs::read_to_string(&path).await {
                    Ok(content) => content,
                    Err(error) => {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("failed to read {file_path}: {error}"),
                        )
                    }
                };

                let numbered: Vec<String> = content
                    .lines()
                    .skip(offset)
                    .take(limit)
                    .enumerate()
                    .map(|(index, line)| format!("{:05}| {line}", index + 1 + offset))
                    .collect();
                ToolOutcome::success(json!({ "file": numbered.join("\n") }))
            })
        }),
    }
}
