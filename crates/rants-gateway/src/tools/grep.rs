use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;

use super::{optional_str, required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, GREP_TOOL};
use crate::errors::ErrorKind;

pub(super) fn grep_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: GREP_TOOL.to_string(),
            description: "Search file contents under the workspace with a regex".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string" },
                    "include": { "type": "string" }
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
                let include = optional_str(&params, "include").map(str::to_string);
                let requested = optional_str(&params, "path").unwrap_or(".").to_string();

                let base = match workspace::resolve_path(&ctx.workspace_root, &requested) {
                    Ok(base) => base,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                    }
                };
                let root = ctx.workspace_root.clone();

                let searched = tokio::task::spawn_blocking(move || {
                    let regex = regex::Regex::new(&pattern)
                        .map_err(|error| format!("invalid pattern: {error}"))?;
                    let include = include
                        .map(|raw| {
                            glob::Pattern::new(&raw)
                                .map_err(|error| format!("invalid include glob: {error}"))
                        })
                        .transpose()?;
                    let root = std::fs::canonicalize(&root).unwrap_or(root);

                    let mut files = Vec::new();
                    collect_files(&base, &mut files);
                    let mut results = Vec::new();
                    for file in files {
                        if let Some(include) = &include {
                            let name = file
                                .file_name()
                                .map(|name| name.to_string_lossy().to_string())
                                .unwrap_or_default();
                            if !include.matches(&name) {
                                continue;
                            }
                        }
                        let Ok(text) = std::fs::read_to_string(&file) else {
                            continue;
                        };
                        let relative = file.strip_prefix(&root).unwrap_or(&file).to_path_buf();
                        for (index, line) in text.lines().enumerate() {
                            if regex.is_match(line) {
                                results.push(json!({
                                    "file": relative.to_string_lossy(),
                                    "line": index + 1,
                                    "text": line,
                                }));
                            }
                        }
                    }
                    Ok::<_, String>(results)
                })
                .await;

                match searched {
                    Ok(Ok(results)) => ToolOutcome::success(json!({ "results": results })),
                    Ok(Err(message)) => ToolOutcome::failure(ErrorKind::ToolExecError, message),
                    Err(error) => ToolOutcome::failure(
                        ErrorKind::ToolExecError,
                        format!("grep task failed: {error}"),
                    ),
                }
            })
        }),
    }
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else if path.is_file() {
            files.push(path);
        }
    }
    files.sort_unstable();
}
