//! Error taxonomy for the conversation core.
//!
//! Errors fall into three families with different recovery rules:
//!
//! - [`ToolError`]: raised by the [`ToolRegistry`](crate::tools::ToolRegistry).
//!   Recoverable: the dispatcher turns them into error-flagged tool results
//!   that the model sees on its next round.
//! - [`HistoryError`]: pairing violations in the
//!   [`HistoryStore`](crate::conversation::HistoryStore). These mean the
//!   provider contract would be broken and are fatal for the submission.
//! - [`ProviderError`] / [`DispatchError`]: the model call failed or was
//!   cancelled. Fatal for the submission only; history is rolled back.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Tool-layer failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateTool(String),

    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for tool '{tool}':\n{}", .violations.join("\n"))]
    InvalidArguments {
        tool: String,
        violations: Vec<String>,
    },
}

/// History integrity violations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistoryError {
    #[error("tool result '{call_id}' has no earlier tool call")]
    DanglingToolResult { call_id: String },

    #[error("tool call id '{call_id}' is already waiting for a result")]
    DuplicateToolCall { call_id: String },

    #[error("tool call '{call_id}' already has a result")]
    DuplicateToolResult { call_id: String },

    #[error("tool call '{call_id}' has no matching tool result")]
    UnpairedToolCall { call_id: String },

    #[error("turn #{sequence} separates tool call '{call_id}' from its result")]
    InterleavedTurn { call_id: String, sequence: u64 },
}

/// Failures talking to the model provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("provider error: {0}")]
    Api(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// Why a submission did not complete.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("submission cancelled")]
    Cancelled,

    #[error("history integrity violated: {0}")]
    History(#[from] HistoryError),
}

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Advisory raised when the newest atomic unit alone exceeds the context budget.
///
/// Not an error: the unit is still sent in full, since dropping it would leave
/// the model nothing meaningful to respond to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverBudgetSingleUnitWarning {
    /// Estimated size of the unit in tokens.
    pub unit_tokens: usize,
    /// The budget it was measured against.
    pub budget: usize,
    /// Number of turns in the unit.
    pub turns: usize,
}

impl fmt::Display for OverBudgetSingleUnitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "newest context unit ({} turn(s), ~{} tokens) exceeds the {} token budget; sending it in full",
            self.turns, self.unit_tokens, self.budget
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_arguments_lists_each_violation() {
        let err = ToolError::InvalidArguments {
            tool: "calculator".into(),
            violations: vec!["  - : missing 'expression'".into(), "  - /x: bad".into()],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("invalid arguments for tool 'calculator'"));
        assert!(msg.contains("missing 'expression'"));
        assert!(msg.contains("/x: bad"));
    }

    #[test]
    fn dispatch_error_wraps_history_error() {
        let err: DispatchError = HistoryError::UnpairedToolCall {
            call_id: "c1".into(),
        }
        .into();
        assert!(matches!(err, DispatchError::History(_)));
        assert!(err.to_string().contains("c1"));
    }

    #[test]
    fn over_budget_warning_display() {
        let w = OverBudgetSingleUnitWarning {
            unit_tokens: 900,
            budget: 100,
            turns: 2,
        };
        assert!(w.to_string().contains("~900 tokens"));
        assert!(w.to_string().contains("100 token budget"));
    }
}
