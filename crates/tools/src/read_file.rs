//! File read tool: read file contents, optionally a line range.

use async_trait::async_trait;
use conclave_core::error::ToolError;
use conclave_core::tool::{Tool, ToolResult};

/// Paths no daemon may read, regardless of configuration.
const FORBIDDEN_PREFIXES: [&str; 4] = ["/etc/shadow", "/etc/sudoers", "/root/.ssh", "/proc/self/environ"];

pub struct ReadFileTool {
    /// Extra forbidden path prefixes.
    forbidden_paths: Vec<String>,
}

impl ReadFileTool {
    pub fn new() -> Self {
        Self {
            forbidden_paths: Vec::new(),
        }
    }

    pub fn with_forbidden(forbidden_paths: Vec<String>) -> Self {
        Self { forbidden_paths }
    }

    fn check_path(&self, path: &str) -> Result<(), ToolError> {
        let normalized = path.replace('\\', "/");
        if normalized.split('/').any(|part| part == "..") {
            return Err(ToolError::PermissionDenied {
                tool_name: "read_file".into(),
                reason: format!("path traversal in '{path}'"),
            });
        }
        let forbidden = FORBIDDEN_PREFIXES
            .iter()
            .copied()
            .chain(self.forbidden_paths.iter().map(String::as_str))
            .find(|prefix| normalized.starts_with(prefix))
            .or(normalized.contains("/.ssh/").then_some("/.ssh/"));
        if let Some(prefix) = forbidden {
            return Err(ToolError::PermissionDenied {
                tool_name: "read_file".into(),
                reason: format!("'{path}' matches forbidden path '{prefix}'"),
            });
        }
        Ok(())
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Lines `start..=end` (1-based, inclusive), each prefixed with its number.
fn slice_lines(content: &str, start: Option<u64>, end: Option<u64>) -> String {
    let start = start.unwrap_or(1).max(1) as usize;
    let end = end.map(|e| e as usize).unwrap_or(usize::MAX);
    content
        .lines()
        .enumerate()
        .skip(start - 1)
        .take_while(|(i, _)| i + 1 <= end)
        .map(|(i, line)| format!("{:>6}\t{line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Use start_line/end_line to read a specific range of a large file."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "start_line": {
                    "type": "integer",
                    "description": "First line to return (1-based)"
                },
                "end_line": {
                    "type": "integer",
                    "description": "Last line to return (inclusive)"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        self.check_path(path)?;

        let start = arguments["start_line"].as_u64();
        let end = arguments["end_line"].as_u64();

        match tokio::fs::read_to_string(path).await {
            Ok(content) if start.is_some() || end.is_some() => {
                Ok(ToolResult::ok(slice_lines(&content, start, end)))
            }
            Ok(content) => Ok(ToolResult::ok(content)),
            Err(e) => Ok(ToolResult::failed(format!("Failed to read file: {e}"))),
        }
    }
}
