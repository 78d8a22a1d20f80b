//! The dispatcher: one submission in, one reply out.
//!
//! [`Dispatcher::submit`] runs the per-submission state machine:
//!
//! ```text
//!            "/..."                           text only
//!   Idle ──────────────▶ LocalCommand ──▶ Idle
//!     │
//!     │ user text
//!     ▼
//!   AwaitingModel ──────────────────────────────────▶ Idle (Reply)
//!     ▲        │ tool calls
//!     │        ▼
//!     └── InvokingTools ── round cap reached ──────▶ Idle (Reply, cap_reached)
//! ```
//!
//! Before every model call the full history is validated and then truncated
//! to the configured budget; the truncated window is validated again and sent
//! to the [`Provider`]. Tool failures never abort a submission: they are
//! recorded as error results for the model to see. A provider failure, a
//! cancellation, or a history integrity error rolls the history and the token
//! totals back to where they were before the submission started.

use super::commands::{self, Command};
use super::config::AgentConfig;
use super::events::{AgentEvent, EventHandler, NoopHandler};
use crate::api::{ModelResponse, Provider, ProviderRequest};
use crate::context::{CharRatioEstimator, SizeEstimator, TURN_OVERHEAD_TOKENS, Truncator};
use crate::conversation::{ContentBlock, HistoryStore, Role, Turn, validate_turns};
use crate::error::{DispatchError, HistoryError};
use crate::tools::{ToolOutcome, ToolRegistry};
use crate::{ToolDef, UsageInfo};
use serde_json::{Map, Value};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SUMMARY_SYSTEM_PROMPT: &str =
    "You are a helpful assistant that creates concise summaries of conversations.";
const SUMMARY_REQUEST: &str = "Please provide a concise summary of our conversation so far, \
     highlighting the main topics discussed and any key decisions or outcomes.";
const SUMMARY_MAX_TOKENS: u32 = 500;
const SUMMARY_TEMPERATURE: f32 = 0.5;

// ── Results ────────────────────────────────────────────────────────

/// Where the dispatcher is within a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    LocalCommand,
    AwaitingModel,
    InvokingTools,
}

/// The model's final answer to a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Text of the final agent turn.
    pub text: String,
    /// Tool rounds completed during the submission.
    pub tool_rounds: u32,
    /// `true` when the submission stopped at the tool-round cap.
    pub cap_reached: bool,
}

/// Result of a successful [`Dispatcher::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Output of a locally handled slash command.
    Command(String),
    Reply(Reply),
}

/// Token usage reported by the provider, accumulated per dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenTotals {
    pub requests: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenTotals {
    pub fn record(&mut self, usage: &UsageInfo) {
        self.requests += 1;
        self.prompt_tokens += u64::from(usage.prompt_tokens.unwrap_or(0));
        self.completion_tokens += u64::from(usage.completion_tokens.unwrap_or(0));
    }
}

// ── Dispatcher ─────────────────────────────────────────────────────

/// Owns the conversation and drives the model/tool loop.
///
/// ```ignore
/// let client = OpenRouterClient::new(api_key)?;
/// let tools = ToolRegistry::new().with_builtin_tools(".")?;
/// let handler = LoggingHandler;
///
/// let mut dispatcher = Dispatcher::new(&client, &tools, AgentConfig::default())
///     .with_event_handler(&handler);
///
/// if let Submission::Reply(reply) = dispatcher.submit("What is 2+2?").await? {
///     println!("{}", reply.text);
/// }
/// ```
///
/// The provider, tool registry, and event handler are borrowed and must
/// outlive the dispatcher.
pub struct Dispatcher<'a> {
    provider: &'a dyn Provider,
    tools: &'a ToolRegistry,
    config: AgentConfig,
    history: HistoryStore,
    estimator: Box<dyn SizeEstimator>,
    event_handler: &'a dyn EventHandler,
    cancel: Option<CancellationToken>,
    state: DispatcherState,
    totals: TokenTotals,
}

impl<'a> Dispatcher<'a> {
    pub fn new(provider: &'a dyn Provider, tools: &'a ToolRegistry, config: AgentConfig) -> Self {
        let estimator = Box::new(CharRatioEstimator::new(config.chars_per_token));
        Self {
            provider,
            tools,
            config,
            history: HistoryStore::new(),
            estimator,
            event_handler: &NoopHandler,
            cancel: None,
            state: DispatcherState::Idle,
            totals: TokenTotals::default(),
        }
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.event_handler = handler;
        self
    }

    /// Replace the default character-ratio size estimator.
    pub fn with_estimator(mut self, estimator: impl SizeEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    /// Cancelling `token` aborts the in-flight submission and rolls it back.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.set_cancellation(token);
        self
    }

    /// Swap in a new cancellation token. A cancelled token stays cancelled,
    /// so interactive callers install a fresh one per submission.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = Some(token);
    }

    pub fn state(&self) -> DispatcherState {
        self.state
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn token_totals(&self) -> TokenTotals {
        self.totals
    }

    /// Add a user turn the truncator always keeps, e.g. a task brief.
    pub fn pin_context(&mut self, text: impl Into<String>) -> Result<(), HistoryError> {
        self.history
            .append_pinned_turn(Role::User, vec![ContentBlock::text(text)])?;
        Ok(())
    }

    /// Clear the conversation and the accumulated token totals.
    pub fn reset(&mut self) {
        self.history.clear();
        self.totals = TokenTotals::default();
        info!("Conversation reset");
    }

    /// Handle one line of user input.
    ///
    /// Slash commands are handled by the dispatcher. Anything else is
    /// forwarded to the model; on error the history is exactly as it was
    /// before the call.
    pub async fn submit(&mut self, input: &str) -> Result<Submission, DispatchError> {
        if input.trim_start().starts_with('/') {
            self.state = DispatcherState::LocalCommand;
            let result = self.run_command(Command::parse(input)).await;
            self.state = DispatcherState::Idle;
            return result;
        }
        self.submit_text(input).await.map(Submission::Reply)
    }

    async fn submit_text(&mut self, input: &str) -> Result<Reply, DispatchError> {
        self.event_handler
            .on_event(&AgentEvent::SubmissionStarted { input });
        let mark = self.history.mark();
        let totals = self.totals;
        let result = self.run_submission(input).await;
        self.state = DispatcherState::Idle;

        if let Err(e) = &result {
            self.history.rollback_to(mark);
            self.totals = totals;
            let reason = e.to_string();
            self.event_handler
                .on_event(&AgentEvent::RolledBack { reason: &reason });
        }
        result
    }

    async fn run_command(&mut self, command: Command) -> Result<Submission, DispatchError> {
        self.event_handler.on_event(&AgentEvent::CommandHandled {
            name: command.name(),
        });
        let output = match command {
            Command::Help => commands::render_help(),
            Command::Tools => commands::render_tools(self.tools),
            Command::Reset => {
                let turns = self.history.len();
                self.reset();
                format!("Conversation cleared ({turns} turn(s) removed).")
            }
            Command::History => commands::render_history(
                &self.history,
                self.estimator.as_ref(),
                self.config.context_window_tokens,
                &self.totals,
            ),
            Command::Config => self.config.summary(),
            Command::System => commands::render_system(self.config.system_prompt.as_deref()),
            Command::Metrics => commands::render_metrics(self.tools),
            Command::Export(path) => {
                let markdown = commands::export_markdown(self.history.snapshot());
                match path {
                    None => markdown,
                    Some(path) => match std::fs::write(&path, &markdown) {
                        Ok(()) => format!(
                            "Exported {} turn(s) to {}",
                            self.history.len(),
                            path.display()
                        ),
                        Err(e) => format!("Export failed: {}: {e}", path.display()),
                    },
                }
            }
            Command::Summarize => self.summarize().await?,
            Command::Retry => return self.retry().await,
            Command::Unknown(name) => commands::render_unknown(&name),
        };
        Ok(Submission::Command(output))
    }

    /// Drop the newest user turn and everything after it, then submit that
    /// text again. On failure the dropped turns are restored.
    async fn retry(&mut self) -> Result<Submission, DispatchError> {
        let target = self
            .history
            .snapshot()
            .iter()
            .enumerate()
            .rev()
            .find(|(_, turn)| turn.role() == Role::User && !turn.is_pinned())
            .and_then(|(index, turn)| Some((self.history.mark_before(index)?, turn.text())));
        let Some((mark, input)) = target else {
            return Ok(Submission::Command(
                "No previous message to retry.".to_string(),
            ));
        };

        let saved = self.history.clone();
        self.history.rollback_to(mark);
        info!(
            "Retrying last message ({} turn(s) dropped)",
            saved.len() - self.history.len()
        );
        match self.submit_text(&input).await {
            Ok(reply) => Ok(Submission::Reply(reply)),
            Err(e) => {
                self.history = saved;
                Err(e)
            }
        }
    }

    /// Ask the model for a summary of the conversation. Neither the request
    /// nor the answer is added to the history.
    async fn summarize(&mut self) -> Result<String, DispatchError> {
        if self.history.is_empty() {
            return Ok("No conversation to summarize.".to_string());
        }
        self.history.validate()?;

        let next_sequence = self.history.last().map_or(0, |t| t.sequence() + 1);
        let request_turn = Turn::new(
            Role::User,
            vec![ContentBlock::text(SUMMARY_REQUEST)],
            next_sequence,
            false,
        );
        let budget = self.history_budget(
            Some(SUMMARY_SYSTEM_PROMPT),
            &[],
            self.estimator.estimate_turn(&request_turn),
        );

        let provider = self.provider;
        let response = {
            let truncator = Truncator::new(self.estimator.as_ref(), budget);
            let window = truncator.truncate(self.history.snapshot());
            validate_turns(window.iter())?;
            info!("Summarizing {} turn(s)", window.len());

            let truncation_notice = if window.was_truncated() {
                self.config.truncation_notice().map(String::from)
            } else {
                None
            };
            let mut turns = window.turns().to_vec();
            turns.push(&request_turn);
            let request = ProviderRequest {
                model: self.config.model.clone(),
                system_prompt: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
                truncation_notice,
                turns,
                tools: Vec::new(),
                max_tokens: SUMMARY_MAX_TOKENS.min(self.config.max_tokens),
                temperature: Some(SUMMARY_TEMPERATURE),
            };
            provider.complete(&request)
        };
        let response = race_cancel(self.cancel.as_ref(), response).await??;

        if let Some(usage) = &response.usage {
            self.totals.record(usage);
        }
        let summary = response
            .blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n");
        let summary = summary.trim();
        Ok(if summary.is_empty() {
            "Could not generate a summary.".to_string()
        } else {
            format!("Summary:\n{summary}")
        })
    }

    async fn run_submission(&mut self, input: &str) -> Result<Reply, DispatchError> {
        self.history
            .append_turn(Role::User, vec![ContentBlock::text(input)])?;

        let tool_defs = self.tools.definitions();
        let budget = self.history_budget(self.config.system_prompt.as_deref(), &tool_defs, 0);
        let max_rounds = self.config.max_tool_rounds;
        let mut tool_rounds: u32 = 0;

        loop {
            if tool_rounds >= max_rounds {
                self.event_handler
                    .on_event(&AgentEvent::RoundLimitReached { max_rounds });
                let text = format!(
                    "Stopped after {tool_rounds} tool round(s) without a final answer."
                );
                self.history
                    .append_turn(Role::Agent, vec![ContentBlock::text(text.clone())])?;
                return Ok(Reply {
                    text,
                    tool_rounds,
                    cap_reached: true,
                });
            }

            let round = tool_rounds + 1;
            self.state = DispatcherState::AwaitingModel;
            let response = self.request_model(round, budget, &tool_defs).await?;

            if let Some(usage) = &response.usage {
                self.totals.record(usage);
                self.event_handler.on_event(&AgentEvent::TokenUsage {
                    prompt_tokens: usage.prompt_tokens.unwrap_or(0),
                    completion_tokens: usage.completion_tokens.unwrap_or(0),
                });
            }

            let mut blocks = response.blocks;
            if blocks.is_empty() {
                self.event_handler
                    .on_event(&AgentEvent::EmptyResponse { round });
                blocks.push(ContentBlock::text(""));
            }

            let turn = self.history.append_turn(Role::Agent, blocks)?;
            let text = turn.text();
            let calls: Vec<(String, String, Map<String, Value>)> = turn
                .blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    } => Some((call_id.clone(), tool_name.clone(), arguments.clone())),
                    _ => None,
                })
                .collect();

            if !text.is_empty() {
                self.event_handler.on_event(&AgentEvent::Text(&text));
            }

            if calls.is_empty() {
                self.event_handler.on_event(&AgentEvent::Finished);
                return Ok(Reply {
                    text,
                    tool_rounds,
                    cap_reached: false,
                });
            }

            self.state = DispatcherState::InvokingTools;
            self.event_handler.on_event(&AgentEvent::ToolCallsReceived {
                round,
                count: calls.len(),
            });

            let mut results = Vec::with_capacity(calls.len());
            for (call_id, name, arguments) in &calls {
                self.event_handler.on_event(&AgentEvent::ToolExecuting {
                    name,
                    call_id,
                    arguments,
                });
                let invocation = self.tools.invoke(name, arguments);
                let outcome = match race_cancel(self.cancel.as_ref(), invocation).await? {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        debug!("Tool call {call_id} rejected: {e}");
                        ToolOutcome::failure(e.to_string())
                    }
                };
                self.event_handler.on_event(&AgentEvent::ToolFinished {
                    name,
                    call_id,
                    outcome: &outcome,
                });
                results.push(ContentBlock::tool_result(
                    call_id.clone(),
                    outcome.payload,
                    outcome.is_error,
                ));
            }

            self.history.append_turn(Role::Tool, results)?;
            tool_rounds += 1;
        }
    }

    /// Validate, truncate, and send the current history to the provider.
    async fn request_model(
        &self,
        round: u32,
        budget: usize,
        tool_defs: &[ToolDef],
    ) -> Result<ModelResponse, DispatchError> {
        self.history.validate()?;

        let provider = self.provider;
        let response = {
            let truncator = Truncator::new(self.estimator.as_ref(), budget);
            let window = truncator.truncate(self.history.snapshot());
            validate_turns(window.iter())?;

            let usage = window.usage();
            self.event_handler.on_event(&AgentEvent::ContextPrepared {
                round,
                max_rounds: self.config.max_tool_rounds,
                usage: &usage,
                kept_turns: window.len(),
                dropped_turns: window.dropped_turns(),
            });
            if let Some(warning) = window.warning() {
                self.event_handler.on_event(&AgentEvent::OverBudget(warning));
            }

            let truncation_notice = if window.was_truncated() {
                self.config.truncation_notice().map(String::from)
            } else {
                None
            };
            let request = ProviderRequest {
                model: self.config.model.clone(),
                system_prompt: self.config.system_prompt.clone(),
                truncation_notice,
                turns: window.turns().to_vec(),
                tools: tool_defs.to_vec(),
                max_tokens: self.config.max_tokens,
                temperature: self.config.temperature,
            };
            provider.complete(&request)
        };

        Ok(race_cancel(self.cancel.as_ref(), response).await??)
    }

    /// Tokens left for history once the system prompt, the truncation
    /// notice, the tool definitions, and `extra` are accounted for.
    fn history_budget(
        &self,
        system_prompt: Option<&str>,
        tool_defs: &[ToolDef],
        extra: usize,
    ) -> usize {
        let estimator = self.estimator.as_ref();
        let mut reserved = extra;
        if let Some(prompt) = system_prompt {
            reserved += TURN_OVERHEAD_TOKENS + estimator.estimate_text(prompt);
        }
        if let Some(notice) = self.config.truncation_notice() {
            reserved += TURN_OVERHEAD_TOKENS + estimator.estimate_text(notice);
        }
        if !tool_defs.is_empty() {
            let json = serde_json::to_string(tool_defs).unwrap_or_default();
            reserved += estimator.estimate_text(&json);
        }

        let budget = self.config.context_window_tokens.saturating_sub(reserved);
        if budget == 0 {
            warn!(
                "Prompt overhead (~{reserved} tokens) fills the context window ({}); \
                 only the newest exchange will be sent",
                self.config.context_window_tokens
            );
        }
        budget
    }
}

/// Await `fut`, giving up with [`DispatchError::Cancelled`] if the token fires.
async fn race_cancel<T>(
    cancel: Option<&CancellationToken>,
    fut: impl Future<Output = T>,
) -> Result<T, DispatchError> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Submission cancelled");
                Err(DispatchError::Cancelled)
            }
            out = fut => Ok(out),
        },
        None => Ok(fut.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProviderFuture;
    use crate::error::ProviderError;
    use crate::tools::Calculator;
    use std::sync::Mutex;

    /// Replies with queued responses and records how many turns it was sent.
    struct Scripted {
        replies: Mutex<Vec<Result<ModelResponse, ProviderError>>>,
        seen_turns: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(mut replies: Vec<Result<ModelResponse, ProviderError>>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                seen_turns: Mutex::new(Vec::new()),
            }
        }
    }

    impl Provider for Scripted {
        fn complete(&self, request: &ProviderRequest<'_>) -> ProviderFuture<'_> {
            self.seen_turns.lock().unwrap().push(request.turns.len());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(ModelResponse::text("done")));
            Box::pin(async move { reply })
        }
    }

    fn calc_call(id: &str, expr: &str) -> ModelResponse {
        let mut args = Map::new();
        args.insert("expression".into(), Value::String(expr.into()));
        ModelResponse {
            blocks: vec![ContentBlock::tool_call(id, "calculator", args)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn text_reply_appends_two_turns() {
        let provider = Scripted::new(vec![Ok(ModelResponse::text("hello"))]);
        let tools = ToolRegistry::new();
        let mut d = Dispatcher::new(&provider, &tools, AgentConfig::default());

        let out = d.submit("hi").await.unwrap();
        assert_eq!(
            out,
            Submission::Reply(Reply {
                text: "hello".into(),
                tool_rounds: 0,
                cap_reached: false,
            })
        );
        assert_eq!(d.history().len(), 2);
        assert_eq!(d.state(), DispatcherState::Idle);
    }

    #[tokio::test]
    async fn tool_round_then_answer() {
        let provider = Scripted::new(vec![
            Ok(calc_call("c1", "6*7")),
            Ok(ModelResponse::text("42")),
        ]);
        let tools = ToolRegistry::new().with(Calculator).unwrap();
        let mut d = Dispatcher::new(&provider, &tools, AgentConfig::default());

        let Submission::Reply(reply) = d.submit("6*7?").await.unwrap() else {
            panic!("expected a reply");
        };
        assert_eq!(reply.text, "42");
        assert_eq!(reply.tool_rounds, 1);
        assert_eq!(d.history().len(), 4);
        assert_eq!(*provider.seen_turns.lock().unwrap(), vec![1, 3]);
    }

    #[tokio::test]
    async fn provider_error_rolls_back() {
        let provider = Scripted::new(vec![
            Ok(ModelResponse::text("first")),
            Err(ProviderError::Transport("connection reset".into())),
        ]);
        let tools = ToolRegistry::new();
        let mut d = Dispatcher::new(&provider, &tools, AgentConfig::default());

        d.submit("one").await.unwrap();
        let err = d.submit("two").await.unwrap_err();
        assert!(matches!(err, DispatchError::Provider(_)));
        assert_eq!(d.history().len(), 2);
        assert_eq!(d.state(), DispatcherState::Idle);
    }

    #[tokio::test]
    async fn empty_response_becomes_empty_reply() {
        let provider = Scripted::new(vec![Ok(ModelResponse::default())]);
        let tools = ToolRegistry::new();
        let mut d = Dispatcher::new(&provider, &tools, AgentConfig::default());

        let Submission::Reply(reply) = d.submit("hi").await.unwrap() else {
            panic!("expected a reply");
        };
        assert_eq!(reply.text, "");
        assert_eq!(d.history().len(), 2);
    }

    #[tokio::test]
    async fn commands_do_not_touch_history_or_provider() {
        let provider = Scripted::new(vec![]);
        let tools = ToolRegistry::new();
        let mut d = Dispatcher::new(&provider, &tools, AgentConfig::default());

        let Submission::Command(out) = d.submit("/bogus").await.unwrap() else {
            panic!("expected command output");
        };
        assert!(out.contains("/help"));
        assert!(d.history().is_empty());
        assert!(provider.seen_turns.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn usage_is_accumulated() {
        let usage = UsageInfo {
            prompt_tokens: Some(12),
            completion_tokens: Some(3),
            total_tokens: Some(15),
        };
        let provider = Scripted::new(vec![Ok(ModelResponse {
            blocks: vec![ContentBlock::text("ok")],
            usage: Some(usage),
            finish_reason: None,
        })]);
        let tools = ToolRegistry::new();
        let mut d = Dispatcher::new(&provider, &tools, AgentConfig::default());

        d.submit("hi").await.unwrap();
        assert_eq!(
            d.token_totals(),
            TokenTotals {
                requests: 1,
                prompt_tokens: 12,
                completion_tokens: 3,
            }
        );
        d.reset();
        assert_eq!(d.token_totals(), TokenTotals::default());
    }
}
