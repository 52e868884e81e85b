use std::sync::Arc;

use serde_json::json;

use super::{optional_bool, required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, EDIT_TOOL};
use crate::errors::ErrorKind;

pub(super) fn edit_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: EDIT_TOOL.to_string(),
            description: "Edit a file with a string replacement".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "filePath": { "type": "string" },
                    "oldString": { "type": "string" },
                    "newString": { "type": "string" },
                    "replaceAll": { "type": "boolean" }
                },
                "required": ["filePath", "oldString", "newString"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let file_path = match required_str(&params, "filePath") {
                    Ok(path) => path.to_string(),
                    Err(outcome) => return outcome,
                };
                let old = match required_str(&params, "oldString") {
                    Ok(old) => old.to_string(),
                    Err(outcome) => return outcome,
                };
                let new = match required_str(&params, "newString") {
                    Ok(new) => new.to_string(),
                    Err(outcome) => return outcome,
                };
                let replace_all = optional_bool(&params, "replaceAll").unwrap_or(false);

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

                let updated = match apply_replacement(&content, &old, &new, replace_all) {
                    Ok(updated) => updated,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::ToolExecError, message)
                    }
                };
                match tokio::fs::write(&path, updated).await {
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

pub(super) fn apply_replacement(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<String, String> {
    if replace_all {
        if !content.contains(old) {
            return Err("oldString not found in content".to_string());
        }
        return Ok(content.replace(old, new));
    }
    match content.matches(old).count() {
        1 => Ok(content.replacen(old, new, 1)),
        0 => Err("oldString not found in content".to_string()),
        count => Err(format!("oldString must match exactly once (found {count})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_replacement_requires_unique_match() {
        assert_eq!(
            apply_replacement("a b a", "b", "c", false).expect("unique match"),
            "a c a"
        );
        assert!(apply_replacement("a a", "a", "c", false).is_err());
        assert!(apply_replacement("a", "z", "c", false).is_err());
    }

    #[test]
    fn replace_all_touches_every_occurrence() {
        assert_eq!(
            apply_replacement("x x x", "x", "y", true).expect("replace all"),
            "y y y"
        );
        assert!(apply_replacement("x", "z", "y", true).is_err());
    }
}
