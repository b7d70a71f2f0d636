//! Classifier output: the chosen mode and the daemon blueprints.

use serde::{Deserialize, Serialize};

/// How a request is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Answer directly with a tool-augmented completion.
    Quick,
    /// One daemon.
    Daemon,
    /// A dependency graph of daemons.
    MultiDaemon,
    /// Report on running or previous work.
    Status,
}

impl Mode {
    /// Parse a mode name as the model writes it (case and spacing tolerant).
    pub fn parse(raw: &str) -> Option<Mode> {
        match raw.trim().to_lowercase().as_str() {
            "quick" => Some(Mode::Quick),
            "daemon" => Some(Mode::Daemon),
            "multi_daemon" | "multi-daemon" | "multidaemon" => Some(Mode::MultiDaemon),
            "status" => Some(Mode::Status),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Quick => "quick",
            Mode::Daemon => "daemon",
            Mode::MultiDaemon => "multi_daemon",
            Mode::Status => "status",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blueprint for one daemon. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonPlan {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub role_label: String,
    #[serde(default)]
    pub persona: String,
    #[serde(default)]
    pub task_summary: String,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_slug: Option<String>,
}

impl DaemonPlan {
    /// Label used when presenting this plan's output to a dependent.
    pub fn display_label(&self) -> String {
        if self.role_label.is_empty() {
            format!("Daemon {}", self.index)
        } else {
            self.role_label.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub mode: Mode,
    /// Direct reply text (quick mode fallback carries the raw model output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub daemons: Vec<DaemonPlan>,
}

impl ClassificationResult {
    pub fn quick(reply: Option<String>) -> Self {
        Self {
            mode: Mode::Quick,
            reply,
            daemons: Vec::new(),
        }
    }

    pub fn with_plans(mode: Mode, daemons: Vec<DaemonPlan>) -> Self {
        Self {
            mode,
            reply: None,
            daemons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mode_tolerates_case_and_whitespace() {
        assert_eq!(Mode::parse(" MULTI_DAEMON "), Some(Mode::MultiDaemon));
        assert_eq!(Mode::parse("Quick"), Some(Mode::Quick));
        assert_eq!(Mode::parse("status"), Some(Mode::Status));
        assert_eq!(Mode::parse("parallel"), None);
    }

    #[test]
    fn plan_deserializes_with_missing_fields() {
        let plan: DaemonPlan =
            serde_json::from_str(r#"{"role":"researcher","task_summary":"dig"}"#).unwrap();
        assert_eq!(plan.index, 0);
        assert!(plan.depends_on.is_empty());
        assert!(plan.template_slug.is_none());
    }

    #[test]
    fn display_label_falls_back_to_index() {
        let plan = DaemonPlan {
            index: 2,
            ..Default::default()
        };
        assert_eq!(plan.display_label(), "Daemon 2");
    }
}
