//! Configuration for the [`Dispatcher`](super::Dispatcher).
//!
//! [`AgentConfig`] has sensible defaults for every field. It can be built in
//! code with the `with_*` methods, or loaded from a TOML file where any
//! omitted key keeps its default:
//!
//! ```toml
//! model = "anthropic/claude-sonnet-4"
//! max_tool_rounds = 5
//! context_window_tokens = 32000
//! workdir = "./scratch"
//! ```
//!
//! Call [`validate`](AgentConfig::validate) after applying overrides and
//! before building a dispatcher.

use crate::DEFAULT_MODEL;
use crate::api::wire::DEFAULT_TRUNCATION_NOTICE;
use crate::context::DEFAULT_CHARS_PER_TOKEN;
use crate::error::ConfigError;
use crate::tools::DEFAULT_MAX_RESULT_BYTES;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. \
     Use the available tools when they let you answer more accurately, \
     and answer directly when they don't.";

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,
    /// System prompt sent ahead of every request. `None` sends none.
    pub system_prompt: Option<String>,
    /// Maximum tokens per model response. `0` leaves it to the provider.
    /// Default: `4096`.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 to 2.0). `None` uses the provider default.
    pub temperature: Option<f32>,
    /// Token budget for the prompt: system prompt, tool definitions, and
    /// history together. Default: `100_000`.
    pub context_window_tokens: usize,
    /// Characters per token used by the size estimator. Default: `3.5`.
    pub chars_per_token: f64,
    /// Tool rounds allowed per submission before the agent stops. Default: `10`.
    pub max_tool_rounds: u32,
    /// Per-tool timeout in seconds. `0` disables timeouts. Default: `30`.
    pub tool_timeout_secs: u64,
    /// String tool results longer than this are truncated. Default: `30_000`.
    pub max_result_bytes: usize,
    /// Note sent ahead of a truncated history. Empty disables it.
    pub truncation_notice: String,
    /// Root directory for the file tools. Default: `"."`.
    pub workdir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
            max_tokens: 4096,
            temperature: None,
            context_window_tokens: 100_000,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            max_tool_rounds: 10,
            tool_timeout_secs: 30,
            max_result_bytes: DEFAULT_MAX_RESULT_BYTES,
            truncation_notice: DEFAULT_TRUNCATION_NOTICE.to_string(),
            workdir: PathBuf::from("."),
        }
    }
}

impl AgentConfig {
    /// Load a config file. Keys missing from the file keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text, path)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text. `path` is only used for error messages.
    pub fn from_toml_str(text: &str, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }

    /// Check that every field is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::Invalid("model must not be empty".into()));
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Invalid(
                "max_tool_rounds must be at least 1".into(),
            ));
        }
        if self.context_window_tokens == 0 {
            return Err(ConfigError::Invalid(
                "context_window_tokens must be greater than 0".into(),
            ));
        }
        if self.max_result_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_result_bytes must be greater than 0".into(),
            ));
        }
        if !(self.chars_per_token.is_finite() && self.chars_per_token > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "chars_per_token must be a positive number, got {}",
                self.chars_per_token
            )));
        }
        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return Err(ConfigError::Invalid(format!(
                "temperature must be between 0.0 and 2.0, got {t}"
            )));
        }
        Ok(())
    }

    /// Tool timeout as a `Duration`, or `None` when disabled.
    pub fn tool_timeout(&self) -> Option<Duration> {
        (self.tool_timeout_secs > 0).then(|| Duration::from_secs(self.tool_timeout_secs))
    }

    /// Truncation notice, or `None` when disabled.
    pub fn truncation_notice(&self) -> Option<&str> {
        let notice = self.truncation_notice.trim();
        (!notice.is_empty()).then_some(notice)
    }

    /// Human-readable listing for the `/config` command.
    pub fn summary(&self) -> String {
        let temperature = self
            .temperature
            .map_or_else(|| "provider default".to_string(), |t| t.to_string());
        let timeout = self
            .tool_timeout()
            .map_or_else(|| "none".to_string(), |d| format!("{}s", d.as_secs()));
        format!(
            "model: {}\n\
             max_tokens: {}\n\
             temperature: {temperature}\n\
             context_window_tokens: {}\n\
             chars_per_token: {}\n\
             max_tool_rounds: {}\n\
             tool_timeout: {timeout}\n\
             max_result_bytes: {}\n\
             truncation_notice: {}\n\
             workdir: {}\n\
             system_prompt: {}",
            self.model,
            self.max_tokens,
            self.context_window_tokens,
            self.chars_per_token,
            self.max_tool_rounds,
            self.max_result_bytes,
            self.truncation_notice().unwrap_or("(disabled)"),
            self.workdir.display(),
            self.system_prompt.as_deref().unwrap_or("(none)"),
        )
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_context_window_tokens(mut self, tokens: usize) -> Self {
        self.context_window_tokens = tokens;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    pub fn with_tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    pub fn with_max_result_bytes(mut self, max: usize) -> Self {
        self.max_result_bytes = max;
        self
    }

    pub fn with_truncation_notice(mut self, notice: impl Into<String>) -> Self {
        self.truncation_notice = notice.into();
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }
}
