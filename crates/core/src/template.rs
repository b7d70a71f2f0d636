//! Daemon templates: reusable daemon presets that accumulate statistics and
//! learnings across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use uuid::Uuid;

/// Learnings below this confidence are kept but never shown to daemons.
pub const PROMPT_CONFIDENCE_FLOOR: f64 = 0.5;
const MAX_PROMPT_LEARNINGS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateLearning {
    /// Dedup key
    pub key: String,
    pub content: String,
    /// tool_usage, workflow, output or constraint
    pub category: String,
    pub confidence: f64,
    pub reinforced_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateStats {
    pub total_runs: u32,
    pub successful_runs: u32,
    pub failed_runs: u32,
    pub avg_iterations: f64,
}

impl TemplateStats {
    /// Count one run and fold its iteration count into the rolling average.
    pub fn record(&mut self, success: bool, iterations: usize) {
        self.total_runs += 1;
        if success {
            self.successful_runs += 1;
        } else {
            self.failed_runs += 1;
        }
        let n = f64::from(self.total_runs);
        self.avg_iterations = (self.avg_iterations * (n - 1.0) + iterations as f64) / n;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonTemplate {
    pub id: Uuid,
    /// Empty for system templates.
    #[serde(default)]
    pub user_id: String,

    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: String,

    pub role: String,
    pub role_label: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub constraints: String,
    #[serde(default)]
    pub output_format: String,
    #[serde(default)]
    pub default_tools: Vec<String>,

    /// 0 keeps the daemon default.
    #[serde(default)]
    pub max_iterations: usize,
    #[serde(default)]
    pub max_retries: usize,

    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default)]
    pub learnings: Vec<TemplateLearning>,
    #[serde(default)]
    pub stats: TemplateStats,
}

fn default_active() -> bool {
    true
}

impl DaemonTemplate {
    /// Assemble the persona section a daemon built from this template runs with.
    pub fn build_prompt_section(&self) -> String {
        let mut s = String::new();
        if !self.persona.is_empty() {
            let _ = write!(s, "{}\n\n", self.persona);
        }
        if !self.instructions.is_empty() {
            let _ = write!(s, "## Workflow\n\n{}\n\n", self.instructions);
        }
        if !self.constraints.is_empty() {
            let _ = write!(s, "## Constraints\n\n{}\n\n", self.constraints);
        }
        if !self.output_format.is_empty() {
            let _ = write!(s, "## Output Format\n\n{}\n\n", self.output_format);
        }

        if !self.learnings.is_empty() {
            s.push_str("## Learned Patterns (from previous runs)\n\n");
            self.learnings
                .iter()
                .filter(|l| l.confidence >= PROMPT_CONFIDENCE_FLOOR)
                .take(MAX_PROMPT_LEARNINGS)
                .for_each(|l| {
                    let _ = writeln!(s, "- {}", l.content);
                });
            s.push('\n');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> DaemonTemplate {
        DaemonTemplate {
            id: Uuid::new_v4(),
            user_id: String::new(),
            name: "Researcher".into(),
            slug: "researcher".into(),
            description: "Digs into topics".into(),
            role: "researcher".into(),
            role_label: "Research Daemon".into(),
            persona: "Curious and precise.".into(),
            instructions: "1. Search\n2. Cross-check".into(),
            constraints: String::new(),
            output_format: "Bullet list".into(),
            default_tools: vec!["search".into()],
            max_iterations: 0,
            max_retries: 0,
            is_default: true,
            is_active: true,
            learnings: Vec::new(),
            stats: TemplateStats::default(),
        }
    }

    fn learning(content: &str, confidence: f64) -> TemplateLearning {
        TemplateLearning {
            key: content.to_lowercase().replace(' ', "_"),
            content: content.into(),
            category: "workflow".into(),
            confidence,
            reinforced_count: 1,
            created_at: Utc::now(),
            last_seen_at: Utc::now(),
        }
    }

    #[test]
    fn prompt_section_skips_empty_parts() {
        let section = template().build_prompt_section();
        assert!(section.starts_with("Curious and precise."));
        assert!(section.contains("## Workflow"));
        assert!(!section.contains("## Constraints"));
        assert!(section.contains("## Output Format\n\nBullet list"));
    }

    #[test]
    fn low_confidence_learnings_are_hidden() {
        let mut t = template();
        t.learnings = vec![learning("Prefer primary sources", 0.9), learning("Guess", 0.3)];
        let section = t.build_prompt_section();
        assert!(section.contains("- Prefer primary sources"));
        assert!(!section.contains("- Guess"));
    }

    #[test]
    fn stats_keep_rolling_average() {
        let mut stats = TemplateStats::default();
        stats.record(true, 4);
        stats.record(false, 8);
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.successful_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert!((stats.avg_iterations - 6.0).abs() < f64::EPSILON);
    }
}
