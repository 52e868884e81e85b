use std::sync::Arc;

use serde_json::json;

use super::{optional_str, required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, GLOB_TOOL};
use crate::errors::ErrorKind;

pub(super) fn glob_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: GLOB_TOOL.to_string(),
            description: "Match file paths under the workspace with a glob pattern".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" }
                },
                "required": ["pattern"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let pattern = match required_str(&params, "pattern") {
                    Ok(pattern) => pattern.to_string(),
                    Err(outcome) => return outcome,
                };
                let base = match optional_str(&params, "path") {
                    Some(path) => match workspace::resolve_path(&ctx.workspace_root, path) {
                        Ok(base) => base,
                        Err(message) => {
                            return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                        }
                    },
                    None => ctx.workspace_root.clone(),
                };
                let root = ctx.workspace_root.clone();

                let matched = tokio::task::spawn_blocking(move || {
                    let root = std::fs::canonicalize(&root).unwrap_or(root);
                    let full_pattern = base.join(&pattern).to_string_lossy().to_string();
                    let mut matches = Vec::new();
                    let paths = glob::glob(&full_pattern)
                        .map_err(|error| format!("invalid glob pattern: {error}"))?;
                    for entry in paths.flatten() {
                        let relative = entry.strip_prefix(&root).unwrap_or(&entry);
                        matches.push(relative.to_string_lossy().to_string());
                    }
                    matches.sort_unstable();
                    Ok::<_, String>(matches)
                })
                .await;

                match matched {
                    Ok(Ok(matches)) => ToolOutcome::success(json!({ "matches": matches })),
                    Ok(Err(message)) => ToolOutcome::failure(ErrorKind::ToolExecError, message),
                    Err(error) => ToolOutcome::failure(
                        ErrorKind::ToolExecError,
                        format!("glob task failed: {error}"),
                    ),
                }
            })
        }),
    }
}
