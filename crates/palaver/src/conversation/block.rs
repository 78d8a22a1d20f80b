//! Content blocks and turns: the values the history store is made of.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Who produced a turn.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One piece of content within a turn.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text { text: String },
    /// A request from the model to run a tool.
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    /// The outcome of a tool call, keyed by the call's id.
    ToolResult {
        call_id: String,
        payload: Value,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_call(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        ContentBlock::ToolCall {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, payload: Value, is_error: bool) -> Self {
        ContentBlock::ToolResult {
            call_id: call_id.into(),
            payload,
            is_error,
        }
    }

    /// The text of a `Text` block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ContentBlock::ToolCall { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }
}

/// Render a tool payload as plain text: strings verbatim, everything else as JSON.
pub fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// An ordered group of blocks attributed to one role.
///
/// Turns are created only by [`HistoryStore`](super::HistoryStore), which
/// assigns the sequence number; there is no public constructor and no way to
/// mutate a turn after it has been appended.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Turn {
    role: Role,
    blocks: Vec<ContentBlock>,
    sequence: u64,
    pinned: bool,
}

impl Turn {
    pub(crate) fn new(role: Role, blocks: Vec<ContentBlock>, sequence: u64, pinned: bool) -> Self {
        Self {
            role,
            blocks,
            sequence,
            pinned,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    /// Monotonic position assigned at append time.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the truncator must always keep this turn.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Ids of the tool calls issued in this turn, in order.
    pub fn tool_call_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolCall { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }

    /// Ids of the tool results carried by this turn, in order.
    pub fn tool_result_ids(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolResult { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks.iter().any(ContentBlock::is_tool_call)
    }

    pub fn has_tool_results(&self) -> bool {
        self.blocks.iter().any(ContentBlock::is_tool_result)
    }

    /// Concatenated text of all `Text` blocks, newline separated.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_serializes_with_type_tag() {
        let block = ContentBlock::tool_result("c1", json!(4), false);
        let v = serde_json::to_value(&block).unwrap();
        assert_eq!(v["type"], "tool_result");
        assert_eq!(v["call_id"], "c1");
        assert_eq!(v["payload"], 4);
    }

    #[test]
    fn turn_collects_call_and_result_ids() {
        let mut args = Map::new();
        args.insert("a".into(), json!(2));
        let turn = Turn::new(
            Role::Agent,
            vec![
                ContentBlock::text("let me check"),
                ContentBlock::tool_call("c1", "calculator", args.clone()),
                ContentBlock::tool_call("c2", "calculator", args),
            ],
            3,
            false,
        );
        assert_eq!(turn.tool_call_ids().collect::<Vec<_>>(), vec!["c1", "c2"]);
        assert_eq!(turn.tool_result_ids().count(), 0);
        assert!(turn.has_tool_calls());
        assert_eq!(turn.text(), "let me check");
    }

    #[test]
    fn payload_text_keeps_strings_verbatim() {
        assert_eq!(payload_text(&json!("Result: 4")), "Result: 4");
        assert_eq!(payload_text(&json!({"n": 4})), r#"{"n":4}"#);
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Agent.to_string(), "agent");
        assert_eq!(Role::Tool.to_string(), "tool");
    }
}
