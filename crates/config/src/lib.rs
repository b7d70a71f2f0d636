//! Configuration loading and validation for Conclave.
//!
//! Loads configuration from `~/.conclave/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.conclave/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// API key for the OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// HTTP timeout for one LLM call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_request_timeout() -> u64 {
    300
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("limits", &self.limits)
            .field("daemon", &self.daemon)
            .finish()
    }
}

/// Per-user and per-request limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Daemons one user may run at once
    #[serde(default = "default_max_daemons")]
    pub max_daemons_per_user: usize,

    /// Verification-driven retries after an inadequate answer
    #[serde(default = "default_max_auto_retries")]
    pub max_auto_retries: usize,

    /// User-requested retries per root task
    #[serde(default = "default_max_manual_retries")]
    pub max_manual_retries: usize,

    /// Hard ceiling on one request, end to end
    #[serde(default = "default_request_ceiling")]
    pub request_ceiling_secs: u64,

    /// Pause after cancelling a task before its retry starts
    #[serde(default = "default_retry_cancel_grace")]
    pub retry_cancel_grace_ms: u64,
}

fn default_max_daemons() -> usize {
    5
}
fn default_max_auto_retries() -> usize {
    2
}
fn default_max_manual_retries() -> usize {
    3
}
fn default_request_ceiling() -> u64 {
    600
}
fn default_retry_cancel_grace() -> u64 {
    200
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_daemons_per_user: default_max_daemons(),
            max_auto_retries: default_max_auto_retries(),
            max_manual_retries: default_max_manual_retries(),
            request_ceiling_secs: default_request_ceiling(),
            retry_cancel_grace_ms: default_retry_cancel_grace(),
        }
    }
}

/// Defaults for every daemon run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Error retries inside one daemon run
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Model context window in tokens
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Tool loop bound for quick-mode answers
    #[serde(default = "default_quick_max_iterations")]
    pub quick_max_iterations: usize,

    #[serde(default = "default_remote_tool_timeout")]
    pub remote_tool_timeout_secs: u64,
}

fn default_max_iterations() -> usize {
    25
}
fn default_max_retries() -> usize {
    3
}
fn default_context_window() -> usize {
    128_000
}
fn default_quick_max_iterations() -> usize {
    10
}
fn default_remote_tool_timeout() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            context_window: default_context_window(),
            quick_max_iterations: default_quick_max_iterations(),
            remote_tool_timeout_secs: default_remote_tool_timeout(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from the default path (~/.conclave/config.toml).
    ///
    /// Also checks environment variables:
    /// - `CONCLAVE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `CONCLAVE_BASE_URL`
    /// - `CONCLAVE_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CONCLAVE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(url) = std::env::var("CONCLAVE_BASE_URL") {
            config.base_url = url;
        }

        if let Ok(model) = std::env::var("CONCLAVE_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".conclave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let zero_limits = [
            ("limits.max_daemons_per_user", self.limits.max_daemons_per_user),
            ("limits.request_ceiling_secs", self.limits.request_ceiling_secs as usize),
            ("daemon.max_iterations", self.daemon.max_iterations),
            ("daemon.quick_max_iterations", self.daemon.quick_max_iterations),
        ];
        if let Some((name, _)) = zero_limits.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be > 0")));
        }

        if self.daemon.context_window < 1024 {
            return Err(ConfigError::ValidationError(
                "daemon.context_window must be at least 1024 tokens".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout(),
            limits: LimitsConfig::default(),
            daemon: DaemonConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
