//! Events and handlers for the [`Dispatcher`](super::Dispatcher).
//!
//! The dispatcher reports the lifecycle of each submission through
//! [`AgentEvent`] variants, from the start of a submission through context
//! preparation, model replies, and tool execution to completion or rollback.
//! Callers implement [`EventHandler`] to observe them.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use crate::context::ContextUsage;
use crate::error::OverBudgetSingleUnitWarning;
use crate::tools::ToolOutcome;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted by the dispatcher during a submission.
#[derive(Debug)]
pub enum AgentEvent<'a> {
    /// User input was accepted for forwarding to the model.
    SubmissionStarted { input: &'a str },
    /// A slash command was handled locally.
    CommandHandled { name: &'a str },
    /// The context window for the next model call has been selected.
    ContextPrepared {
        round: u32,
        max_rounds: u32,
        usage: &'a ContextUsage,
        kept_turns: usize,
        dropped_turns: usize,
    },
    /// The newest atomic unit alone exceeds the budget; it is sent anyway.
    OverBudget(&'a OverBudgetSingleUnitWarning),
    /// The model returned text (possibly alongside tool calls).
    Text(&'a str),
    /// The model requested tool calls this round.
    ToolCallsReceived { round: u32, count: usize },
    /// A single tool is about to be executed.
    ToolExecuting {
        name: &'a str,
        call_id: &'a str,
        arguments: &'a Map<String, Value>,
    },
    /// A single tool finished (successfully or not).
    ToolFinished {
        name: &'a str,
        call_id: &'a str,
        outcome: &'a ToolOutcome,
    },
    /// Token usage reported by the provider for this round.
    TokenUsage {
        prompt_tokens: u32,
        completion_tokens: u32,
    },
    /// The model returned no content at all; treated as an empty reply.
    EmptyResponse { round: u32 },
    /// The submission hit the tool-round cap.
    RoundLimitReached { max_rounds: u32 },
    /// The submission finished with a text reply.
    Finished,
    /// The submission failed and history was restored.
    RolledBack { reason: &'a str },
}

/// Handler for dispatcher events.
///
/// The default implementation ignores every event.
///
/// # Example
///
/// ```ignore
/// struct Printer;
///
/// impl EventHandler for Printer {
///     fn on_event(&self, event: &AgentEvent<'_>) {
///         if let AgentEvent::ToolFinished { name, outcome, .. } = event {
///             println!("[{name}] error={}", outcome.is_error);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &AgentEvent<'_>) {
        let _ = event;
    }
}

/// A no-op event handler.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let AgentEvent::Text(text) = event {
///         println!("{text}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&AgentEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&AgentEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent<'_>) {
        (self.0)(event)
    }
}

/// An event handler that delegates to multiple inner handlers, in order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with(my_ui_handler);
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain. Handlers are called in registration order.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Conditionally add a handler to the chain.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// An event handler that logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &AgentEvent<'_>) {
        match event {
            AgentEvent::SubmissionStarted { input } => {
                let preview: String = input.chars().take(80).collect();
                info!("Submission: {preview}{}", if input.len() > 80 { "..." } else { "" });
            }
            AgentEvent::CommandHandled { name } => {
                debug!("Handled command /{name}");
            }
            AgentEvent::ContextPrepared {
                round,
                max_rounds,
                usage,
                kept_turns,
                dropped_turns,
            } => {
                info!("[round {round}/{max_rounds}] {}", usage.to_log_string());
                debug!("  turns: kept={kept_turns}, dropped={dropped_turns}");
            }
            AgentEvent::OverBudget(warning) => {
                warn!("{warning}");
            }
            AgentEvent::Text(text) => {
                let preview: String = text.chars().take(200).collect();
                debug!(
                    "LLM text: {preview}{}",
                    if text.len() > 200 { "..." } else { "" }
                );
            }
            AgentEvent::ToolCallsReceived { round, count } => {
                debug!("{count} tool call(s) in round {round}");
            }
            AgentEvent::ToolExecuting { name, call_id, .. } => {
                debug!("Executing tool: {name} ({call_id})");
            }
            AgentEvent::ToolFinished { name, outcome, .. } => {
                if outcome.is_error {
                    info!("Tool {name} failed: {}", outcome.payload);
                } else {
                    debug!("Tool {name} succeeded");
                }
            }
            AgentEvent::TokenUsage {
                prompt_tokens,
                completion_tokens,
            } => {
                debug!("Tokens: prompt={prompt_tokens}, completion={completion_tokens}");
            }
            AgentEvent::EmptyResponse { round } => {
                warn!("Empty model response at round {round}; treating it as an empty reply");
            }
            AgentEvent::RoundLimitReached { max_rounds } => {
                info!("Agent hit tool-round limit ({max_rounds})");
            }
            AgentEvent::Finished => {
                info!("Agent finished (no more tool calls)");
            }
            AgentEvent::RolledBack { reason } => {
                warn!("Submission rolled back: {reason}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn composite_calls_every_handler_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = seen.clone();
        let b = seen.clone();
        let handler = CompositeEventHandler::new()
            .with(FnEventHandler::new(move |_| a.lock().unwrap().push("a")))
            .with_if(false, NoopHandler)
            .with(FnEventHandler::new(move |_| b.lock().unwrap().push("b")));

        handler.on_event(&AgentEvent::Finished);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn logging_handler_accepts_every_event() {
        let usage = ContextUsage::new(10, 100);
        let warning = OverBudgetSingleUnitWarning {
            unit_tokens: 200,
            budget: 100,
            turns: 2,
        };
        let outcome = ToolOutcome::failure("nope");
        let args = Map::new();
        let events = [
            AgentEvent::SubmissionStarted { input: "hi" },
            AgentEvent::CommandHandled { name: "help" },
            AgentEvent::ContextPrepared {
                round: 1,
                max_rounds: 10,
                usage: &usage,
                kept_turns: 1,
                dropped_turns: 0,
            },
            AgentEvent::OverBudget(&warning),
            AgentEvent::Text("hello"),
            AgentEvent::ToolCallsReceived { round: 1, count: 1 },
            AgentEvent::ToolExecuting {
                name: "calculator",
                call_id: "c1",
                arguments: &args,
            },
            AgentEvent::ToolFinished {
                name: "calculator",
                call_id: "c1",
                outcome: &outcome,
            },
            AgentEvent::TokenUsage {
                prompt_tokens: 1,
                completion_tokens: 1,
            },
            AgentEvent::EmptyResponse { round: 1 },
            AgentEvent::RoundLimitReached { max_rounds: 10 },
            AgentEvent::Finished,
            AgentEvent::RolledBack { reason: "cancelled" },
        ];
        for event in &events {
            LoggingHandler.on_event(event);
        }
    }
}
