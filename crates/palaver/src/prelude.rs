//! Convenience re-exports for common `palaver` types.
//!
//! Meant to be glob-imported when building agents:
//!
//! ```ignore
//! use palaver::prelude::*;
//! ```
//!
//! This pulls in what most programs need: the [`Dispatcher`] and its config,
//! event handlers, the [`Tool`] trait with [`ToolRegistry`], the provider
//! boundary, and the error types. Truncation and estimation internals are
//! left out; import those from [`crate::context`] when needed.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, ToolDef, json_schema_for};

// ── Conversation ────────────────────────────────────────────────────
pub use crate::conversation::{ContentBlock, HistoryStore, Role, Turn};

// ── Agent runtime ───────────────────────────────────────────────────
pub use crate::agent::{
    AgentConfig, AgentEvent, CompositeEventHandler, Dispatcher, DispatcherState, EventHandler,
    FnEventHandler, LoggingHandler, NoopHandler, Reply, Submission,
};

// ── Provider ────────────────────────────────────────────────────────
pub use crate::api::{ModelResponse, OpenRouterClient, Provider, ProviderFuture, ProviderRequest};

// ── Tools ───────────────────────────────────────────────────────────
pub use crate::tools::spec::ToolSpec;
pub use crate::tools::{
    FnTool, Tool, ToolFuture, ToolOutcome, ToolRegistry, ToolResult, parse_tool_args,
};

// ── Errors ──────────────────────────────────────────────────────────
pub use crate::error::{
    ConfigError, DispatchError, HistoryError, OverBudgetSingleUnitWarning, ProviderError,
    ToolError,
};
