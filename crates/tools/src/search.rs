//! The `search_available_tools` meta-tool: lets a daemon look up tools by
//! keyword instead of scanning a long tool list.

use conclave_core::provider::ToolDefinition;

pub const SEARCH_TOOLS_NAME: &str = "search_available_tools";

pub fn search_tools_definition() -> ToolDefinition {
    ToolDefinition {
        name: SEARCH_TOOLS_NAME.into(),
        description: "Search the tools available to you by keyword. Returns matching tool names and descriptions.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Keywords describing the capability you need"
                }
            },
            "required": ["query"]
        }),
    }
}

/// `name: description` lines for every definition matching any query word.
pub fn search_tool_definitions(available: &[ToolDefinition], query: &str) -> String {
    let words: Vec<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();

    let lines: Vec<String> = available
        .iter()
        .filter(|t| t.name != SEARCH_TOOLS_NAME)
        .filter(|t| {
            let haystack = format!("{} {}", t.name, t.description).to_lowercase();
            words.is_empty() || words.iter().any(|w| haystack.contains(w.as_str()))
        })
        .map(|t| format!("{}: {}", t.name, t.description))
        .collect();

    if lines.is_empty() {
        format!("No tools matched '{query}'.")
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, description: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({}),
        }
    }

    #[test]
    fn matches_name_or_description() {
        let tools = [def("bash", "Run shell commands"), def("read_file", "Read a file")];
        assert_eq!(search_tool_definitions(&tools, "SHELL"), "bash: Run shell commands");
        assert_eq!(search_tool_definitions(&tools, "file"), "read_file: Read a file");
    }

    #[test]
    fn no_match_says_so() {
        let tools = [def("bash", "Run shell commands")];
        assert_eq!(search_tool_definitions(&tools, "browser"), "No tools matched 'browser'.");
    }

    #[test]
    fn meta_tool_never_lists_itself() {
        let tools = [search_tools_definition(), def("bash", "Run shell commands")];
        assert_eq!(search_tool_definitions(&tools, ""), "bash: Run shell commands");
    }
}
