//! Bash tool: execute system commands.
//!
//! Supports command allowlisting and a per-call timeout.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::{Tool, ToolResult};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Execute shell commands with safety constraints.
pub struct BashTool {
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
}

impl BashTool {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self {
            allowed_commands,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        // Every stage of a pipeline must be allowed.
        command
            .split(['|', ';', '&'])
            .filter_map(|stage| stage.split_whitespace().next())
            .all(|base| self.allowed_commands.iter().any(|a| a == base))
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout/stderr. Pipe long output through head, tail or grep."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "bash".into(),
                reason: format!("Command '{command}' not in allowlist"),
            });
        }

        debug!(command = %command, "Executing shell command");

        let run = Command::new("sh").args(["-c", command]).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ToolError::Timeout {
                tool_name: "bash".into(),
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "bash".into(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let success = output.status.success();

        let result_text = if success {
            if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        let text = result_text.trim().to_string();
        Ok(if success {
            ToolResult::ok(text)
        } else {
            ToolResult::failed(text)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_check() {
        let tool = BashTool::new(vec!["ls".into(), "cat".into(), "grep".into()]);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("cat file.txt | grep foo"));
        assert!(!tool.is_command_allowed("rm -rf /"));
        assert!(!tool.is_command_allowed("ls; rm -rf /"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let tool = BashTool::new(vec![]);
        assert!(tool.is_command_allowed("anything goes"));
    }

    #[tokio::test]
    async fn execute_echo() {
        let tool = BashTool::new(vec![]);
        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("hello"));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let tool = BashTool::new(vec![]);
        let result = tool
            .execute(serde_json::json!({"command": "exit 3"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.starts_with("[exit code: 3]"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let tool = BashTool::new(vec![]).with_timeout(Duration::from_millis(50));
        let result = tool
            .execute(serde_json::json!({"command": "sleep 5"}))
            .await;
        assert!(matches!(result, Err(ToolError::Timeout { .. })));
    }

    #[tokio::test]
    async fn blocked_command() {
        let tool = BashTool::new(vec!["ls".into()]);
        let result = tool
            .execute(serde_json::json!({"command": "rm -rf /"}))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }
}
