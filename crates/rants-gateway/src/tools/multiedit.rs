use std::sync::Arc;

use serde_json::{json, Value};

use super::edit::apply_replacement;
use super::{required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, MULTIEDIT_TOOL};
use crate::errors::ErrorKind;

pub(super) fn multiedit_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: MULTIEDIT_TOOL.to_string(),
            description: "Apply a sequence of string replacements to one file".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "edits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "oldString": { "type": "string" },
                                "newString": { "type": "string" },
                                "replaceAll": { "type": "boolean" }
                            },
                            "required": ["oldString", "newString"]
                        }
                    }
                },
                "required": ["filePath", "edits"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let file_path = match required_str(&params, "filePath") {
                    Ok(path) => path.to_string(),
                    Err(outcome) => return outcome,
                };
                let Some(edits) = params.get("edits").and_then(Value::as_array) else {
                    return ToolOutcome::failure(
                        ErrorKind::ToolExecError,
                        "missing required parameter 'edits'",
                    );
                };

                let path = match workspace::resolve_path(&ctx.workspace_root, &file_path) {
                    Ok(path) => path,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                    }
                };
                let mut content = match tokio::fs::read_to_string(&path).await {
                    Ok(content) => content,
                    Err(error) => {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("failed to read {file_path}: {error}"),
                        )
                    }
                };

                for (index, edit) in edits.iter().enumerate() {
                    let old = edit.get("oldString").and_then(Value::as_str);
                    let new = edit.get("newString").and_then(Value::as_str);
                    let (Some(old), Some(new)) = (old, new) else {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("edit {index} is missing oldString or newString"),
                        );
                    };
                    let replace_all = edit
                        .get("replaceAll")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    content = match apply_replacement(&content, old, new, replace_all) {
                        Ok(content) => content,
                        Err(message) => {
                            return ToolOutcome::failure(
                                ErrorKind::ToolExecError,
                                format!("edit {index}: {message}"),
                            )
                        }
                    };
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
