//! The shell-command tool: a whitelist-checked, workspace-confined
//! `execute_command`.
//!
//! Validates the command's first word against a fixed whitelist, resolves
//! its working directory against the workspace root (rejecting anything that
//! escapes it), and runs it through `tokio::process::Command` under
//! `tokio::time::timeout`, returning a `{stdout, stderr, exit_code, success}`
//! JSON result.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::error::ToolError;
use crate::tool::{Tool, ToolPermission, ToolResult};
use crate::tools::fs::resolve_path;

/// Commands permitted to run through [`ExecuteCommandTool`]. Anything whose
/// first whitespace-delimited word isn't in this set is rejected before a
/// process is ever spawned.
const COMMAND_WHITELIST: &[&str] = &[
    "ls", "cat", "grep", "find", "head", "tail", "wc", "sort", "uniq", "git", "python", "python3",
    "pip", "pip3", "pwd", "echo", "which", "env", "make", "npm", "yarn",
];

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Runs a whitelisted shell command in a workspace-confined working
/// directory and returns its `{stdout, stderr, exit_code, success}` as JSON.
pub struct ExecuteCommandTool {
    workspace_root: PathBuf,
}

impl ExecuteCommandTool {
    /// A tool confined to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    fn first_word(command: &str) -> ToolResult<&str> {
        command
            .split_whitespace()
            .next()
            .ok_or_else(|| ToolError::parameter("execute_command", "command must not be empty"))
    }

    fn check_whitelisted(command_name: &str) -> ToolResult<()> {
        if COMMAND_WHITELIST.contains(&command_name) {
            Ok(())
        } else {
            Err(ToolError::execution(
                "execute_command",
                format!(
                    "command '{command_name}' is not in the allowed list: {}",
                    COMMAND_WHITELIST.join(", ")
                ),
            ))
        }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Executes a whitelisted shell command (file ops, git, python, make, npm, yarn, ...) \
         in a working directory confined to the workspace, with a timeout. Returns stdout, \
         stderr, and the exit code."
    }

    fn permission(&self) -> ToolPermission {
        ToolPermission::Edit
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to run" },
                "workdir": {
                    "type": "string",
                    "description": "Working directory relative to the workspace root; defaults to the root"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds, default 60",
                    "minimum": 1,
                    "maximum": MAX_TIMEOUT_SECS,
                },
            },
            "required": ["command"],
        })
    }

    async fn run(&self, arguments: Value) -> ToolResult<String> {
        let command = arguments
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::parameter("execute_command", "missing 'command'"))?;
        let command_name = Self::first_word(command)?;
        Self::check_whitelisted(command_name)?;

        let workdir = match arguments.get("workdir").and_then(Value::as_str) {
            Some(raw) => resolve_path(&self.workspace_root, raw, "execute_command")?,
            None => self.workspace_root.clone(),
        };

        let timeout_secs = arguments
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);

        let spawn = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&workdir)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(timeout_secs), spawn)
            .await
            .map_err(|_| {
                ToolError::execution(
                    "execute_command",
                    format!("command timed out after {timeout_secs}s: {command}"),
                )
            })?
            .map_err(|e| ToolError::execution("execute_command", format!("failed to spawn: {e}")))?;

        let result = json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": output.status.code().unwrap_or(-1),
            "success": output.status.success(),
        });
        Ok(result.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool() -> ExecuteCommandTool {
        ExecuteCommandTool::new(std::env::temp_dir())
    }

    #[tokio::test]
    async fn runs_whitelisted_command() {
        let result = tool().run(json!({"command": "echo hello"})).await.expect("runs");
        let parsed: Value = serde_json::from_str(&result).expect("json result");
        assert_eq!(parsed["success"], true);
        assert!(parsed["stdout"].as_str().unwrap_or_default().contains("hello"));
    }

    #[tokio::test]
    async fn rejects_command_outside_whitelist() {
        let err = tool().run(json!({"command": "rm -rf /"})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionError { .. }));
    }

    #[tokio::test]
    async fn rejects_empty_command() {
        let err = tool().run(json!({"command": "   "})).await.unwrap_err();
        assert!(matches!(err, ToolError::ParameterError { .. }));
    }

    #[tokio::test]
    async fn rejects_workdir_outside_workspace() {
        let err = tool()
            .run(json!({"command": "pwd", "workdir": "../../etc"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionError { .. }));
    }
}
