use std::sync::Arc;

use serde_json::json;

use super::{required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, PATCH_TOOL};
use crate::errors::ErrorKind;

pub(super) fn patch_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: PATCH_TOOL.to_string(),
            description: "Apply a multi-hunk patch to files in the workspace".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "patch": { "type": "string" }
                },
                "required": ["patch"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let patch = match required_str(&params, "patch") {
                    Ok(patch) => patch.to_string(),
                    Err(outcome) => return outcome,
                };
                let updates = match parse_patch(&patch) {
                    Ok(updates) => updates,
                    Err(message) => {
                        return ToolOutcome::failure(ErrorKind::ToolExecError, message)
                    }
                };

                let mut results = Vec::with_capacity(updates.len());
                for update in updates {
                    let path = match workspace::resolve_path(&ctx.workspace_root, &update.path) {
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
                                format!("failed to read {}: {error}", update.path),
                            )
                        }
                    };
                    let updated = match apply_hunks(&content, &update.hunks) {
                        Ok(updated) => updated,
                        Err(message) => {
                            return ToolOutcome::failure(
                                ErrorKind::ToolExecError,
                                format!("{}: {message}", update.path),
                            )
                        }
                    };
                    if let Err(error) = tokio::fs::write(&path, updated).await {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("failed to write {}: {error}", update.path),
                        );
                    }
                    results.push(json!({ "file": update.path, "ok": true }));
                }

                ToolOutcome::success(json!({ "results": results }))
            })
        }),
    }
}

struct FileUpdate {
    path: String,
    hunks: Vec<Hunk>,
}

struct Hunk {
    header: String,
    old: Vec<String>,
    new: Vec<String>,
}

/// Parse the `*** Begin Patch` envelope: one or more `*** Update File:`
/// sections, each holding `@@`-headed hunks whose lines carry a ` `, `-`,
/// or `+` prefix (a fully blank line is empty context).
fn parse_patch(patch: &str) -> Result<Vec<FileUpdate>, String> {
    let mut lines = patch.lines();
    if !lines
        .next()
        .is_some_and(|line| line.starts_with("*** Begin Patch"))
    {
        return Err("invalid patch header".to_string());
    }

    let mut updates: Vec<FileUpdate> = Vec::new();
    for line in lines {
        if line.starts_with("*** End Patch") {
            break;
        }
        if let Some(path) = line.strip_prefix("*** Update File:") {
            updates.push(FileUpdate {
                path: path.trim().to_string(),
                hunks: Vec::new(),
            });
            continue;
        }

        let Some(update) = updates.last_mut() else {
            return Err(format!("unexpected line before any file section: '{line}'"));
        };
        if let Some(header) = line.strip_prefix("@@") {
            update.hunks.push(Hunk {
                header: header.trim().to_string(),
                old: Vec::new(),
                new: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = update.hunks.last_mut() else {
            return Err(format!(
                "hunk line before any @@ header in '{}': '{line}'",
                update.path
            ));
        };
        if line.is_empty() {
            hunk.old.push(String::new());
            hunk.new.push(String::new());
            continue;
        }
        match line.as_bytes()[0] {
            b' ' => {
                let value = line[1..].to_string();
                hunk.old.push(value.clone());
                hunk.new.push(value);
            }
            b'-' => hunk.old.push(line[1..].to_string()),
            b'+' => hunk.new.push(line[1..].to_string()),
            _ => return Err(format!("invalid hunk line: '{line}'")),
        }
    }

    if updates.is_empty() {
        return Err("patch must contain at least one file section".to_string());
    }
    for update in &updates {
        if update.hunks.is_empty() {
            return Err(format!("file section '{}' has no hunks", update.path));
        }
    }
    Ok(updates)
}

/// Replace each hunk's old lines with its new lines, matching old lines as
/// an exact subsequence. A forward cursor keeps later hunks applying after
/// earlier ones; a hunk with no old lines inserts at the cursor.
fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<String, String> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = if content.is_empty() {
        Vec::new()
    } else {
        let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
        if had_trailing_newline && lines.last().is_some_and(String::is_empty) {
            lines.pop();
        }
        lines
    };

    let mut cursor = 0usize;
    for hunk in hunks {
        if hunk.old.is_empty() {
            let at = cursor.min(lines.len());
            lines.splice(at..at, hunk.new.iter().cloned());
            cursor = at + hunk.new.len();
            continue;
        }

        let position = find_lines(&lines, &hunk.old, cursor)
            .or_else(|| find_lines(&lines, &hunk.old, 0))
            .ok_or_else(|| format!("failed to match hunk '@@{}'", hunk.header))?;
        lines.splice(position..position + hunk.old.len(), hunk.new.iter().cloned());
        cursor = position + hunk.new.len();
    }

    let mut updated = lines.join("\n");
    if had_trailing_newline {
        updated.push('\n');
    }
    Ok(updated)
}

fn find_lines(haystack: &[String], needle: &[String], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len())
        .find(|&start| haystack[start..start + needle.len()] == needle[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_missing_header_and_stray_lines() {
        assert!(parse_patch("no envelope").is_err());
        let stray = "*** Begin Patch\nloose line\n*** End Patch";
        assert!(parse_patch(stray).is_err());
        let empty = "*** Begin Patch\n*** End Patch";
        assert!(parse_patch(empty).is_err());
    }

    #[test]
    fn parse_splits_sections_and_hunks() {
        let patch = "\
*** Begin Patch
*** Update File: a.txt
@@ first
-one
+uno
*** Update File: b.txt
@@ second
 keep
-two
+dos
*** End Patch";
        let updates = parse_patch(patch).expect("patch should parse");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].path, "a.txt");
        assert_eq!(updates[0].hunks.len(), 1);
        assert_eq!(updates[1].hunks[0].old, vec!["keep", "two"]);
        assert_eq!(updates[1].hunks[0].new, vec!["keep", "dos"]);
    }

    #[test]
    fn apply_replaces_matched_lines_and_keeps_trailing_newline() {
        let hunks = vec![Hunk {
            header: " update".to_string(),
            old: vec!["beta".to_string()],
            new: vec!["BETA".to_string()],
        }];
        let updated = apply_hunks("alpha\nbeta\ngamma\n", &hunks).expect("hunk applies");
        assert_eq!(updated, "alpha\nBETA\ngamma\n");
    }

    #[test]
    fn apply_later_hunks_search_past_earlier_ones() {
        let hunks = vec![
            Hunk {
                header: " one".to_string(),
                old: vec!["x".to_string()],
                new: vec!["first".to_string()],
            },
            Hunk {
                header: " two".to_string(),
                old: vec!["x".to_string()],
                new: vec!["second".to_string()],
            },
        ];
        let updated = apply_hunks("x\nmiddle\nx\n", &hunks).expect("both hunks apply");
        assert_eq!(updated, "first\nmiddle\nsecond\n");
    }

    #[test]
    fn apply_reports_the_unmatched_hunk() {
        let hunks = vec![Hunk {
            header: " nope".to_string(),
            old: vec!["missing".to_string()],
            new: vec!["irrelevant".to_string()],
        }];
        let error = apply_hunks("alpha\n", &hunks).expect_err("no match");
        assert!(error.contains("failed to match hunk '@@ nope'"));
    }

    #[test]
    fn insertion_hunk_lands_at_the_cursor() {
        let hunks = vec![
            Hunk {
                header: " anchor".to_string(),
                old: vec!["beta".to_string()],
                new: vec!["beta".to_string()],
            },
            Hunk {
                header: " insert".to_string(),
                old: Vec::new(),
                new: vec!["inserted".to_string()],
            },
        ];
        let updated = apply_hunks("alpha\nbeta\ngamma\n", &hunks).expect("insert applies");
        assert_eq!(updated, "alpha\nbeta\ninserted\ngamma\n");
    }
}
