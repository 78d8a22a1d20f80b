//! Conversion between content blocks and the OpenAI-compatible wire format.
//!
//! Outbound, each turn becomes one or more [`Message`]s: agent turns carry
//! their tool calls as `assistant.tool_calls`, and each tool result becomes a
//! `tool` message keyed by `tool_call_id`. Error results are prefixed with
//! `Error: ` so the model can tell them apart. Inbound, the completion's text
//! and tool calls are mapped back to blocks; tool arguments must decode to a
//! JSON object.

use super::ProviderRequest;
use crate::conversation::{ContentBlock, Role, Turn, payload_text};
use crate::error::ProviderError;
use crate::{CallType, FunctionCallData, Message, ToolCall};
use serde_json::{Map, Value};

/// Default note sent ahead of a truncated context window.
pub const DEFAULT_TRUNCATION_NOTICE: &str = "[Earlier history has been truncated.]";

/// Build the wire message list for a request.
pub fn to_messages(request: &ProviderRequest<'_>) -> Vec<Message> {
    let mut messages = Vec::with_capacity(request.turns.len() + 2);
    if let Some(system) = &request.system_prompt {
        messages.push(Message::system(system.clone()));
    }
    if let Some(notice) = &request.truncation_notice {
        messages.push(Message::user(notice.clone()));
    }
    for turn in &request.turns {
        push_turn(&mut messages, turn);
    }
    messages
}

fn push_turn(messages: &mut Vec<Message>, turn: &Turn) {
    let text = turn.text();
    match turn.role() {
        Role::User => messages.push(Message::user(text)),
        Role::Agent => {
            let calls: Vec<ToolCall> = turn
                .blocks()
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall {
                        call_id,
                        tool_name,
                        arguments,
                    } => Some(ToolCall {
                        id: call_id.clone(),
                        call_type: CallType::Function,
                        function: FunctionCallData {
                            name: tool_name.clone(),
                            arguments: Value::Object(arguments.clone()).to_string(),
                        },
                    }),
                    _ => None,
                })
                .collect();
            if calls.is_empty() {
                messages.push(Message::assistant_text(text));
            } else {
                let content = (!text.is_empty()).then_some(text);
                messages.push(Message::assistant_tool_calls(content, calls));
            }
        }
        Role::Tool => {
            for block in turn.blocks() {
                if let ContentBlock::ToolResult {
                    call_id,
                    payload,
                    is_error,
                } = block
                {
                    messages.push(Message::tool_result(
                        call_id.clone(),
                        result_content(payload, *is_error),
                    ));
                }
            }
        }
    }
}

/// Wire text for a tool result.
pub fn result_content(payload: &Value, is_error: bool) -> String {
    let text = payload_text(payload);
    if is_error {
        format!("Error: {text}")
    } else {
        text
    }
}

/// Map a completion's text and tool calls to content blocks.
///
/// Empty text is dropped. Tool-call arguments that are blank decode to an
/// empty object; anything else must be a JSON object.
pub fn from_completion(
    content: Option<String>,
    tool_calls: Vec<ToolCall>,
) -> Result<Vec<ContentBlock>, ProviderError> {
    let mut blocks = Vec::with_capacity(tool_calls.len() + 1);
    if let Some(text) = content
        && !text.trim().is_empty()
    {
        blocks.push(ContentBlock::text(text));
    }
    for call in tool_calls {
        if call.id.is_empty() {
            return Err(ProviderError::MalformedResponse(format!(
                "tool call for '{}' has no id",
                call.function.name
            )));
        }
        let arguments = parse_arguments(&call)?;
        blocks.push(ContentBlock::tool_call(call.id, call.function.name, arguments));
    }
    Ok(blocks)
}

fn parse_arguments(call: &ToolCall) -> Result<Map<String, Value>, ProviderError> {
    let raw = call.function.arguments.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ProviderError::MalformedResponse(format!(
            "arguments for tool call '{}' are not a JSON object: {other}",
            call.id
        ))),
        Err(e) => Err(ProviderError::MalformedResponse(format!(
            "arguments for tool call '{}' are not valid JSON: {e}",
            call.id
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageRole;
    use crate::conversation::HistoryStore;
    use serde_json::json;

    fn wire_call(id: &str, name: &str, args: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            call_type: CallType::Function,
            function: FunctionCallData {
                name: name.into(),
                arguments: args.into(),
            },
        }
    }

    fn request<'a>(turns: Vec<&'a Turn>, notice: Option<&str>) -> ProviderRequest<'a> {
        ProviderRequest {
            model: "m".into(),
            system_prompt: Some("be brief".into()),
            truncation_notice: notice.map(String::from),
            turns,
            tools: vec![],
            max_tokens: 0,
            temperature: None,
        }
    }

    #[test]
    fn tool_exchange_maps_to_assistant_and_tool_messages() {
        let mut store = HistoryStore::new();
        let mut args = Map::new();
        args.insert("expression".into(), json!("2+2"));
        store
            .append_turn(Role::User, vec![ContentBlock::text("2+2?")])
            .unwrap();
        store
            .append_turn(
                Role::Agent,
                vec![ContentBlock::tool_call("c1", "calculator", args)],
            )
            .unwrap();
        store
            .append_turn(Role::Tool, vec![ContentBlock::tool_result("c1", json!(4), false)])
            .unwrap();

        let snapshot = store.snapshot();
        let msgs = to_messages(&request(snapshot.iter().collect(), None));
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, MessageRole::System);
        assert_eq!(msgs[1].content.as_deref(), Some("2+2?"));

        let calls = msgs[2].tool_calls.as_ref().unwrap();
        assert_eq!(msgs[2].role, MessageRole::Assistant);
        assert!(msgs[2].content.is_none());
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.arguments, r#"{"expression":"2+2"}"#);

        assert_eq!(msgs[3].role, MessageRole::Tool);
        assert_eq!(msgs[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msgs[3].content.as_deref(), Some("4"));
    }

    #[test]
    fn error_results_are_prefixed_and_notice_follows_system() {
        let mut store = HistoryStore::new();
        store
            .append_turn(
                Role::Agent,
                vec![ContentBlock::tool_call("c9", "nonexistent_tool", Map::new())],
            )
            .unwrap();
        store
            .append_turn(
                Role::Tool,
                vec![ContentBlock::tool_result("c9", json!("unknown tool"), true)],
            )
            .unwrap();

        let snapshot = store.snapshot();
        let msgs = to_messages(&request(
            snapshot.iter().collect(),
            Some(DEFAULT_TRUNCATION_NOTICE),
        ));
        assert_eq!(msgs[1].role, MessageRole::User);
        assert_eq!(msgs[1].content.as_deref(), Some(DEFAULT_TRUNCATION_NOTICE));
        assert_eq!(msgs[3].content.as_deref(), Some("Error: unknown tool"));
    }

    #[test]
    fn completion_maps_text_and_calls() {
        let blocks = from_completion(
            Some("Let me compute.".into()),
            vec![wire_call("c1", "calculator", r#"{"expression": "2+2"}"#)],
        )
        .unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].as_text(), Some("Let me compute."));
        match &blocks[1] {
            ContentBlock::ToolCall {
                call_id, arguments, ..
            } => {
                assert_eq!(call_id, "c1");
                assert_eq!(arguments["expression"], "2+2");
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn blank_arguments_and_empty_text() {
        let blocks = from_completion(Some("  ".into()), vec![wire_call("c1", "t", "")]).unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_tool_call());
        assert!(from_completion(None, vec![]).unwrap().is_empty());
    }

    #[test]
    fn non_object_arguments_are_malformed() {
        let err = from_completion(None, vec![wire_call("c1", "t", "[1, 2]")]).unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));

        let err = from_completion(None, vec![wire_call("c1", "t", "{not json")]).unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));

        let err = from_completion(None, vec![wire_call("", "t", "{}")]).unwrap_err();
        assert!(err.to_string().contains("has no id"));
    }
}
