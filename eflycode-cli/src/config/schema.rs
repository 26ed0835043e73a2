//! Configuration schema definitions.
//!
//! Covers `logging.*`, `model.*`, `context.*`, and `hooks.*`. The latter two
//! reuse the core's own `ContextStrategyConfig` and `HookGroup` types
//! directly rather than re-declaring them, so the config format and the
//! core's runtime types can never drift apart.

use std::collections::HashMap;

use eflycode_core::hooks::HookGroup;
use eflycode_core::{ContextStrategyConfig, StrategyType};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Model provider configuration.
    #[serde(default)]
    pub model: ModelConfig,

    /// Context-compression strategy.
    #[serde(default)]
    pub context: ContextStrategyConfig,

    /// Hook groups, keyed by the `HookEvent` name they fire on (e.g.
    /// `"BeforeTool"`).
    #[serde(default)]
    pub hooks: HashMap<String, Vec<HookGroup>>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing-subscriber` `EnvFilter` directive, e.g. `"info"` or
    /// `"eflycode_core=debug,warn"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Which provider implementation to use.
    #[serde(default)]
    pub provider: ModelProviderKind,
    /// Model name passed to the provider (e.g. `"gpt-4o"`).
    #[serde(default = "default_model_name")]
    pub name: String,
    /// API key. Left unset here and filled in by [`Config::with_env`] from
    /// `OPENAI_API_KEY` rather than committed to a config file.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override, for `OpenAI`-compatible-but-not-`OpenAI` endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Maximum run-loop iterations per task.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

fn default_model_name() -> String {
    "gpt-4o".to_string()
}

const fn default_max_iterations() -> usize {
    50
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProviderKind::default(),
            name: default_model_name(),
            api_key: None,
            base_url: None,
            max_iterations: default_max_iterations(),
        }
    }
}

/// Which [`eflycode_core::llm::Provider`] implementation backs a [`ModelConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProviderKind {
    /// The real `OpenAI`-compatible HTTP client.
    #[default]
    Openai,
    /// The in-memory stub, cycling through canned responses. Useful for
    /// `eflycode run` without network access or an API key.
    Mock,
}

impl Config {
    /// Validate the configuration and return any issues found.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.model.provider == ModelProviderKind::Openai && self.model.api_key.is_none() {
            issues.push(ConfigIssue::warning(
                "model.api_key",
                "no API key configured; set OPENAI_API_KEY or model.api_key",
            ));
        }

        if self.model.max_iterations == 0 {
            issues.push(ConfigIssue::error(
                "model.max_iterations",
                "max_iterations must be at least 1",
            ));
        }

        if self.context.strategy_type == StrategyType::SlidingWindow
            && self.context.sliding_window_size == 0
        {
            issues.push(ConfigIssue::error(
                "context.sliding_window_size",
                "sliding_window_size must be at least 1",
            ));
        }

        issues
    }

    /// `true` if the configuration is valid (no errors; warnings are fine).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().iter().all(|issue| issue.level != IssueLevel::Error)
    }

    /// Merge environment variables into the configuration, without
    /// overwriting values already set by the file.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if self.model.api_key.is_none()
            && let Ok(key) = std::env::var("OPENAI_API_KEY")
        {
            self.model.api_key = Some(key);
        }
        if let Ok(level) = std::env::var("EFLYCODE_LOG") {
            self.logging.level = level;
        }
        self
    }
}

/// Configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    /// Issue severity level.
    pub level: IssueLevel,
    /// Configuration path (e.g., `"model.api_key"`).
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

impl ConfigIssue {
    /// Create an error-level issue.
    #[must_use]
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a warning-level issue.
    #[must_use]
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: IssueLevel::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            IssueLevel::Error => "ERROR",
            IssueLevel::Warning => "WARN",
        };
        write!(f, "[{}] {}: {}", prefix, self.path, self.message)
    }
}

/// Severity level for configuration issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    /// Error that prevents the agent from running correctly.
    Error,
    /// Warning about a potential issue.
    Warning,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.model.name, "gpt-4o");
        assert_eq!(config.model.max_iterations, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model.name, config.model.name);
    }

    #[test]
    fn parses_a_sample_config() {
        let toml_str = r#"
[logging]
level = "debug"

[model]
provider = "mock"
name = "test-model"

[context]
strategy_type = "sliding_window"
sliding_window_size = 5
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.model.provider, ModelProviderKind::Mock);
        assert_eq!(config.context.sliding_window_size, 5);
    }

    #[test]
    fn default_config_is_valid_except_for_missing_api_key_warning() {
        let config = Config::default();
        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].level, IssueLevel::Warning);
        assert!(config.is_valid());
    }

    #[test]
    fn zero_max_iterations_is_an_error() {
        let mut config = Config::default();
        config.model.max_iterations = 0;
        assert!(!config.is_valid());
    }

    #[test]
    fn env_fills_in_missing_api_key() {
        // SAFETY: test-local env mutation, not shared across threads in this process.
        unsafe {
            std::env::set_var("OPENAI_API_KEY", "sk-test-123");
        }
        let config = Config::default().with_env();
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test-123"));
        unsafe {
            std::env::remove_var("OPENAI_API_KEY");
        }
    }
}
