//! Slash commands handled locally by the dispatcher.
//!
//! Input whose first non-blank character is `/` is a command. Most commands
//! are answered from local state without contacting the model. Two are not:
//! `/summarize` sends a side request whose answer is never recorded, and
//! `/retry` replaces the last exchange with a fresh answer.
//! [`Command::parse`] turns the line into a [`Command`]; the `render_*`
//! functions produce the text shown to the user.

use super::dispatcher::TokenTotals;
use crate::context::{SizeEstimator, estimate_turns};
use crate::conversation::{ContentBlock, HistoryStore, Role, Snapshot};
use crate::tools::ToolRegistry;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::PathBuf;

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Tools,
    /// `/reset` or `/clear`.
    Reset,
    History,
    /// `/config` or `/model`.
    Config,
    System,
    Metrics,
    /// `/export [path]`.
    Export(Option<PathBuf>),
    Summarize,
    Retry,
    Unknown(String),
}

impl Command {
    /// Parse a line starting with `/`. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Self {
        let line = input.trim().trim_start_matches('/');
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(n, r)| (n, r.trim()));
        match name.to_ascii_lowercase().as_str() {
            "help" | "?" => Self::Help,
            "tools" => Self::Tools,
            "reset" | "clear" => Self::Reset,
            "history" => Self::History,
            "config" | "model" => Self::Config,
            "system" => Self::System,
            "metrics" => Self::Metrics,
            "export" => Self::Export((!rest.is_empty()).then(|| PathBuf::from(rest))),
            "summarize" => Self::Summarize,
            "retry" => Self::Retry,
            _ => Self::Unknown(name.to_string()),
        }
    }

    /// Canonical command name, used in events and logs.
    pub fn name(&self) -> &str {
        match self {
            Self::Help => "help",
            Self::Tools => "tools",
            Self::Reset => "reset",
            Self::History => "history",
            Self::Config => "config",
            Self::System => "system",
            Self::Metrics => "metrics",
            Self::Export(_) => "export",
            Self::Summarize => "summarize",
            Self::Retry => "retry",
            Self::Unknown(name) => name,
        }
    }
}

pub fn render_help() -> String {
    [
        "Commands:",
        "  /help            Show this help",
        "  /tools           List available tools",
        "  /reset, /clear   Clear the conversation history",
        "  /history         Show history size and token usage",
        "  /config, /model  Show the active configuration",
        "  /system          Show the system prompt",
        "  /metrics         Show per-tool execution metrics",
        "  /export [path]   Export the conversation as Markdown",
        "  /summarize       Ask the model for a summary (not recorded)",
        "  /retry           Drop the last answer and ask again",
    ]
    .join("\n")
}

pub fn render_unknown(name: &str) -> String {
    format!("Unknown command: /{name}. Type /help for the list of commands.")
}

pub fn render_tools(tools: &ToolRegistry) -> String {
    let defs = tools.definitions();
    if defs.is_empty() {
        return "No tools registered.".to_string();
    }
    let mut out = format!("{} tool(s):", defs.len());
    for def in defs {
        let summary = def.function.description.lines().next().unwrap_or_default();
        let _ = write!(out, "\n  {:<16} {summary}", def.function.name);
    }
    out
}

pub fn render_history(
    history: &HistoryStore,
    estimator: &dyn SizeEstimator,
    context_window_tokens: usize,
    totals: &TokenTotals,
) -> String {
    let snapshot = history.snapshot();
    let estimated = estimate_turns(estimator, snapshot.iter());
    let tool_calls: usize = snapshot.iter().map(|t| t.tool_call_ids().count()).sum();
    format!(
        "Turns: {} ({} tool call(s))\n\
         Estimated history size: ~{estimated} tokens of {context_window_tokens}\n\
         Provider usage: {} request(s), {} prompt + {} completion tokens",
        snapshot.len(),
        tool_calls,
        totals.requests,
        totals.prompt_tokens,
        totals.completion_tokens,
    )
}

pub fn render_system(system_prompt: Option<&str>) -> String {
    match system_prompt {
        Some(prompt) => format!("System prompt:\n{prompt}"),
        None => "No system prompt set.".to_string(),
    }
}

pub fn render_metrics(tools: &ToolRegistry) -> String {
    let metrics = tools.metrics();
    if metrics.is_empty() {
        return "No tool calls yet.".to_string();
    }
    let mut out = String::from("Tool metrics:");
    for (name, m) in metrics {
        let _ = write!(
            out,
            "\n  {name}: {} call(s), {:.0}% success, avg {:.0}ms",
            m.total_calls,
            m.success_rate() * 100.0,
            m.avg_duration().as_secs_f64() * 1000.0,
        );
    }
    out
}

/// Render the conversation as a Markdown transcript.
pub fn export_markdown(snapshot: Snapshot<'_>) -> String {
    let mut out = String::from("# Conversation\n");
    for turn in snapshot {
        let heading = match turn.role() {
            Role::User => "User",
            Role::Agent => "Agent",
            Role::Tool => "Tool",
        };
        let _ = write!(out, "\n## {heading} (#{})\n", turn.sequence());
        for block in turn.blocks() {
            match block {
                ContentBlock::Text { text } => {
                    let _ = write!(out, "\n{text}\n");
                }
                ContentBlock::ToolCall {
                    call_id,
                    tool_name,
                    arguments,
                } => {
                    let args = serde_json::to_string_pretty(arguments).unwrap_or_default();
                    let _ = write!(
                        out,
                        "\n**Tool call** `{tool_name}` ({call_id})\n\n```json\n{args}\n```\n"
                    );
                }
                ContentBlock::ToolResult {
                    call_id,
                    payload,
                    is_error,
                } => {
                    let label = if *is_error { "Tool error" } else { "Tool result" };
                    let body = match payload {
                        Value::String(s) => s.clone(),
                        other => serde_json::to_string_pretty(other).unwrap_or_default(),
                    };
                    let _ = write!(out, "\n**{label}** ({call_id})\n\n```\n{body}\n```\n");
                }
            }
        }
    }
    out
}
