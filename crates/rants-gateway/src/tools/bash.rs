use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::process::Command;

use super::{optional_str, optional_u64, required_str, workspace, RegisteredTool, ToolOutcome, ToolSchema, BASH_TOOL};
use crate::errors::ErrorKind;

const DEFAULT_TIMEOUT_MS: u64 = 120_000;

pub(super) fn bash_tool() -> RegisteredTool {
    RegisteredTool {
        schema: ToolSchema {
            name: BASH_TOOL.to_string(),
            description: "Execute a shell command inside the workspace".to_string(),
            schema: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "timeout": { "type": "integer" },
                    "workdir": { "type": "string" }
                },
                "required": ["command"]
            }),
        },
        executor: Arc::new(|params, ctx| {
            Box::pin(async move {
                let command = match required_str(&params, "command") {
                    Ok(command) => command.to_string(),
                    Err(outcome) => return outcome,
                };
                let timeout_ms = optional_u64(&params, "timeout").unwrap_or(DEFAULT_TIMEOUT_MS);

                let cwd = match optional_str(&params, "workdir") {
                    Some(workdir) => {
                        match workspace::resolve_path(&ctx.workspace_root, workdir) {
                            Ok(path) => path,
                            Err(message) => {
                                return ToolOutcome::failure(ErrorKind::SandboxViolation, message)
                            }
                        }
                    }
                    None => ctx.workspace_root.clone(),
                };

                let child = Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .current_dir(&cwd)
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true)
                    .spawn();
                let child = match child {
                    Ok(child) => child,
                    Err(error) => {
                        return ToolOutcome::failure(
                            ErrorKind::ToolExecError,
                            format!("failed to spawn command: {error}"),
                        )
                    }
                };

                // kill_on_drop reaps the subprocess when the timeout wins.
                let output = tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    child.wait_with_output(),
                )
                .await;
                match output {
                    Err(_) => ToolOutcome::failure(
                        ErrorKind::ToolExecError,
                        format!("command timed out after {timeout_ms}ms"),
                    ),
                    Ok(Err(error)) => ToolOutcome::failure(
                        ErrorKind::ToolExecError,
                        format!("command failed to run: {error}"),
                    ),
                    Ok(Ok(output)) => ToolOutcome::success(json!({
                        "exit_code": output.status.code().unwrap_or(-1),
                        "stdout": String::from_utf8_lossy(&output.stdout),
                        "stderr": String::from_utf8_lossy(&output.stderr),
                    })),
                }
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::super::{default_registry, ToolContext};
    use crate::transcript::ToolCallRecord;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::time::Instant;
    use uuid::Uuid;

    fn context(root: &std::path::Path) -> ToolContext {
        ToolContext {
            workspace_root: root.to_path_buf(),
            deadline: Instant::now() + Duration::from_secs(30),
            tenant_id: "anonymous".to_string(),
            session_id: Uuid::new_v4(),
            output_max_bytes: 16_384,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bash_captures_stdout_and_exit_code() {
        let dir = tempdir().expect("tempdir");
        let registry = default_registry();
        let call = ToolCallRecord {
            id: Uuid::new_v4(),
            tool: "bash".to_string(),
            parameters: json!({"command": "printf hello && exit 3"}),
        };
        let result = registry.execute(&call, context(dir.path())).await;
        assert!(result.ok);
        assert_eq!(result.output["exit_code"], json!(3));
        assert_eq!(result.output["stdout"], json!("hello"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bash_timeout_produces_tool_error_result() {
        let dir = tempdir().expect("tempdir");
        let registry = default_registry();
        let call = ToolCallRecord {
            id: Uuid::new_v4(),
            tool: "bash".to_string(),
            parameters: json!({"command": "sleep 5", "timeout": 50}),
        };
        let result = registry.execute(&call, context(dir.path())).await;
        assert!(!result.ok);
        assert_eq!(
            result.error_kind,
            Some(crate::errors::ErrorKind::ToolExecError)
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bash_workdir_outside_root_is_a_sandbox_violation() {
        let dir = tempdir().expect("tempdir");
        let registry = default_registry();
        let call = ToolCallRecord {
            id: Uuid::new_v4(),
            tool: "bash".to_string(),
            parameters: json!({"command": "pwd", "workdir": "../.."}),
        };
        let result = registry.execute(&call, context(dir.path())).await;
        assert!(!result.ok);
        assert_eq!(
            result.error_kind,
            Some(crate::errors::ErrorKind::SandboxViolation)
        );
    }
}
