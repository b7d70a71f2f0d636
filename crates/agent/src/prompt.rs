//! Daemon system prompt assembly.

use conclave_core::session::Skill;
use conclave_core::text::head_tail;
use std::collections::BTreeMap;

/// Largest dependency result embedded verbatim.
const DEPENDENCY_RESULT_CAP: usize = 4_000;

/// Everything a daemon's system prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct DaemonPrompt<'a> {
    pub role_label: &'a str,
    pub persona: &'a str,
    pub task_summary: &'a str,
    /// Predecessor label → result summary.
    pub dependency_results: Option<&'a BTreeMap<String, String>>,
    pub skills: &'a [Skill],
    pub project_instruction: Option<&'a str>,
}

impl DaemonPrompt<'_> {
    pub fn build(&self) -> String {
        let mut prompt = format!(
            "You are a {} Daemon — {}\n\n## Your Task\n\n{}\n\n",
            self.role_label, self.persona, self.task_summary
        );

        if let Some(results) = self.dependency_results.filter(|r| !r.is_empty()) {
            prompt.push_str("## Previous Daemon Results\n\n");
            for (label, result) in results {
                prompt.push_str(&format!("### {label}\n{}\n\n", cap_dependency_result(result)));
            }
            prompt.push_str("Use the results above to inform your work.\n\n");
        }

        let (skills, _) = skills_section(self.skills);
        if !skills.is_empty() {
            prompt.push_str(&skills);
            prompt.push_str("\n\n");
        }

        if let Some(instruction) = self.project_instruction.filter(|i| !i.is_empty()) {
            prompt.push_str("## Project Instructions\n\n");
            prompt.push_str(instruction);
            prompt.push_str("\n\n");
        }

        prompt.push_str(
            "## Instructions\n\n\
             - Use available tools to accomplish your task\n\
             - Be thorough but efficient — do not repeat work unnecessarily\n\
             - When your task is complete, provide a clear summary of what you accomplished\n\
             - If you need information you cannot obtain, state what's missing\n\
             - If you encounter errors, retry with a different approach before giving up\n",
        );
        prompt
    }
}

/// The `## Active Skills` prompt section and the tools those skills need.
/// Skills without a prompt contribute tools only.
pub fn skills_section(skills: &[Skill]) -> (String, Vec<String>) {
    let sections: Vec<String> = skills
        .iter()
        .filter(|s| !s.system_prompt.is_empty())
        .map(|s| format!("### Skill: {}\n{}", s.name, s.system_prompt))
        .collect();
    let tools = skills
        .iter()
        .flat_map(|s| s.required_tools.iter().cloned())
        .collect();

    if sections.is_empty() {
        (String::new(), tools)
    } else {
        (format!("## Active Skills\n\n{}", sections.join("\n\n")), tools)
    }
}

fn cap_dependency_result(result: &str) -> String {
    if result.len() <= DEPENDENCY_RESULT_CAP {
        return result.to_string();
    }
    let omitted = result.len().saturating_sub(3_500);
    head_tail(
        result,
        2_000,
        1_500,
        &format!("\n\n... [{omitted} chars omitted from dependency result] ...\n\n"),
    )
}
