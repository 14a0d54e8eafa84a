//! Configuration loading, validation, and management for Statehive.
//!
//! Loads configuration from `~/.statehive/config.toml` with environment
//! variable overrides. Validates all settings at startup. The settings
//! structs are plain data: the agent, script and workspace crates take them
//! as constructor parameters, there is no process-wide configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.statehive/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Request loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Script sandbox settings
    #[serde(default)]
    pub script: ScriptSettings,

    /// Workspace rendering settings
    #[serde(default)]
    pub workspace: WorkspaceSettings,
}

/// Settings for the orchestrator's request loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Failed attempts of one stack item before the run is aborted
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Consecutive mistakes (turns without a successful tool call) before
    /// the circuit breaker trips
    #[serde(default = "default_consecutive_mistake_limit")]
    pub consecutive_mistake_limit: u32,

    /// Timeout for a single model call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum model turns per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Override the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_retry_attempts() -> u32 {
    3
}
fn default_consecutive_mistake_limit() -> u32 {
    3
}
fn default_request_timeout_ms() -> u64 {
    120_000
}
fn default_max_turns() -> u32 {
    25
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            consecutive_mistake_limit: default_consecutive_mistake_limit(),
            request_timeout_ms: default_request_timeout_ms(),
            max_turns: default_max_turns(),
            system_prompt: None,
        }
    }
}

/// Settings for the script sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSettings {
    /// Wall-clock budget for one script execution
    #[serde(default = "default_script_timeout_ms")]
    pub timeout_ms: u64,

    /// Statement and loop-iteration budget for one execution
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,

    /// Largest accepted script text
    #[serde(default = "default_max_script_bytes")]
    pub max_script_bytes: usize,

    /// Deepest statement and expression nesting a script may use
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,

    /// Identifiers a script may not mention
    #[serde(default = "default_denied_identifiers")]
    pub denied_identifiers: Vec<String>,
}

fn default_script_timeout_ms() -> u64 {
    5_000
}
fn default_max_iterations() -> u64 {
    10_000
}
fn default_max_script_bytes() -> usize {
    32 * 1024
}
fn default_max_nesting_depth() -> usize {
    64
}
fn default_denied_identifiers() -> Vec<String> {
    [
        "eval",
        "require",
        "import",
        "process",
        "globalThis",
        "Function",
        "constructor",
        "__proto__",
        "prototype",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_script_timeout_ms(),
            max_iterations: default_max_iterations(),
            max_script_bytes: default_max_script_bytes(),
            max_nesting_depth: default_max_nesting_depth(),
            denied_identifiers: default_denied_identifiers(),
        }
    }
}

/// Settings for workspace rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    /// Column at which rendered state values are wrapped
    #[serde(default = "default_value_wrap_width")]
    pub value_wrap_width: usize,
}

fn default_value_wrap_width() -> usize {
    72
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            value_wrap_width: default_value_wrap_width(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.statehive/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `STATEHIVE_MAX_RETRY_ATTEMPTS`
    /// - `STATEHIVE_REQUEST_TIMEOUT_MS`
    /// - `STATEHIVE_SCRIPT_TIMEOUT_MS`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
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

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(raw) = lookup("STATEHIVE_MAX_RETRY_ATTEMPTS") {
            self.agent.max_retry_attempts = parse_env("STATEHIVE_MAX_RETRY_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = lookup("STATEHIVE_REQUEST_TIMEOUT_MS") {
            self.agent.request_timeout_ms = parse_env("STATEHIVE_REQUEST_TIMEOUT_MS", &raw)?;
        }
        if let Some(raw) = lookup("STATEHIVE_SCRIPT_TIMEOUT_MS") {
            self.script.timeout_ms = parse_env("STATEHIVE_SCRIPT_TIMEOUT_MS", &raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".statehive")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.consecutive_mistake_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.consecutive_mistake_limit must be at least 1".into(),
            ));
        }

        if self.agent.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent.request_timeout_ms must be > 0".into(),
            ));
        }

        if self.script.timeout_ms == 0 || self.script.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "script.timeout_ms and script.max_iterations must be > 0".into(),
            ));
        }

        if !(1..=MAX_NESTING_DEPTH).contains(&self.script.max_nesting_depth) {
            return Err(ConfigError::ValidationError(format!(
                "script.max_nesting_depth must be between 1 and {MAX_NESTING_DEPTH}"
            )));
        }

        if self.workspace.value_wrap_width < 16 {
            return Err(ConfigError::ValidationError(
                "workspace.value_wrap_width must be at least 16".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Upper bound for `script.max_nesting_depth`. Deeper scripts would
/// exhaust the evaluator's stack.
const MAX_NESTING_DEPTH: usize = 256;

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{raw}'")))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.agent.max_retry_attempts, 3);
        assert_eq!(config.agent.consecutive_mistake_limit, 3);
        assert_eq!(config.script.timeout_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn zero_mistake_limit_rejected() {
        let mut config = AppConfig::default();
        config.agent.consecutive_mistake_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn narrow_wrap_width_rejected() {
        let mut config = AppConfig::default();
        config.workspace.value_wrap_width = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let mut config = AppConfig::default();
        assert_eq!(config.script.max_nesting_depth, 64);
        config.script.max_nesting_depth = 0;
        assert!(config.validate().is_err());
        config.script.max_nesting_depth = 10_000;
        assert!(config.validate().is_err());
        config.script.max_nesting_depth = 256;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[agent]\nmax_retry_attempts = 5\n\n[script]\nmax_iterations = 100\n"
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.agent.max_retry_attempts, 5);
        assert_eq!(config.agent.request_timeout_ms, 120_000);
        assert_eq!(config.script.max_iterations, 100);
        assert!(config.script.denied_identifiers.contains(&"eval".to_string()));
    }

    #[test]
    fn invalid_file_reports_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[agent\nmax_retry_attempts = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("STATEHIVE_MAX_RETRY_ATTEMPTS", "7"),
            ("STATEHIVE_SCRIPT_TIMEOUT_MS", "250"),
        ]);
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.agent.max_retry_attempts, 7);
        assert_eq!(config.script.timeout_ms, 250);
        assert_eq!(config.agent.request_timeout_ms, 120_000);
    }

    #[test]
    fn bad_env_override_is_an_error() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|k| (k == "STATEHIVE_REQUEST_TIMEOUT_MS").then(|| "soon".into()))
            .unwrap_err();
        assert!(err.to_string().contains("STATEHIVE_REQUEST_TIMEOUT_MS"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("max_retry_attempts"));
        assert!(toml_str.contains("value_wrap_width"));
    }
}
