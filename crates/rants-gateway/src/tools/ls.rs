use std::sync::Arc;

use serde_json::json;

use super::{optional_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, LS_TOOL};
use crate::errors::ErrorKind;

pub(super) fn ls_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: LS_TOOL.to_string(),
            description: "List directory entries inside the workspace".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                }
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let requested = optional_str(&params, "path").unwrap_or(".").to_string();
                let path = match workspace::resolve_path(&ctx.workspace_root, &requested) {
                    Ok(path) => path,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                    }
                };

                let mut reader = match tokio::fs::read_dir(&path).await {
                    Ok(reader) => reader,
                    Err(error) => {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("failed to list {requested}: {error}"),
                        )
                    }
                };
                let mut entries = Vec::new();
                loop {
                    match reader.next_entry().await {
                        Ok(Some(entry)) => {
                            entries.push(entry.file_name().to_string_lossy().to_string())
                        }
                        Ok(None) => break,
                        Err(error) => {
                            return ToolOutcome::failure(
                                ErrorKind::ToolExecError,
                                format!("failed to list {requested}: {error}"),
                            )
                        }
                    }
                }
                entries.sort_unstable();
                ToolOutcome::success(json!({ "entries": entries }))
            })
        }),
    }
}
