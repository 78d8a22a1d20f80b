//! Shared helpers for integration tests: scripted providers and estimators.

#![allow(dead_code)]

use palaver::api::{ModelResponse, Provider, ProviderFuture, ProviderRequest};
use palaver::context::SizeEstimator;
use palaver::conversation::{ContentBlock, Role, Turn};
use palaver::UsageInfo;
use palaver::error::ProviderError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What a provider was sent, minus the borrowed turns.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub sequences: Vec<u64>,
    pub roles: Vec<Role>,
    pub texts: Vec<String>,
    pub system_prompt: Option<String>,
    pub truncation_notice: Option<String>,
    pub tool_names: Vec<String>,
}

/// Replies with a fixed script, one entry per model call.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ModelResponse, ProviderError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: impl IntoIterator<Item = Result<ModelResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Provider for ScriptedProvider {
    fn complete(&self, request: &ProviderRequest<'_>) -> ProviderFuture<'_> {
        self.requests.lock().unwrap().push(RecordedRequest {
            sequences: request.turns.iter().map(|t| t.sequence()).collect(),
            roles: request.turns.iter().map(|t| t.role()).collect(),
            texts: request.turns.iter().map(|t| t.text()).collect(),
            system_prompt: request.system_prompt.clone(),
            truncation_notice: request.truncation_notice.clone(),
            tool_names: request
                .tools
                .iter()
                .map(|t| t.function.name.clone())
                .collect(),
        });
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Api("script exhausted".into())));
        Box::pin(async move { reply })
    }
}

/// Never answers; used to exercise cancellation.
pub struct PendingProvider;

impl Provider for PendingProvider {
    fn complete(&self, _request: &ProviderRequest<'_>) -> ProviderFuture<'_> {
        Box::pin(futures::future::pending())
    }
}

pub fn text(reply: &str) -> Result<ModelResponse, ProviderError> {
    Ok(ModelResponse::text(reply))
}

/// Attach provider-reported token usage to a scripted response.
pub fn with_usage(
    response: Result<ModelResponse, ProviderError>,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> Result<ModelResponse, ProviderError> {
    response.map(|r| ModelResponse {
        usage: Some(UsageInfo {
            prompt_tokens: Some(prompt_tokens),
            completion_tokens: Some(completion_tokens),
            total_tokens: Some(prompt_tokens + completion_tokens),
        }),
        ..r
    })
}

/// A response carrying `(call_id, tool_name, arguments)` tool calls.
pub fn calls(specs: &[(&str, &str, Value)]) -> Result<ModelResponse, ProviderError> {
    let blocks = specs
        .iter()
        .map(|(id, name, args)| {
            let args = args.as_object().cloned().unwrap_or_default();
            ContentBlock::tool_call(*id, *name, args)
        })
        .collect();
    Ok(ModelResponse {
        blocks,
        ..Default::default()
    })
}

/// Every turn costs the same; free-standing text is free.
pub struct FixedTurnEstimator(pub usize);

impl SizeEstimator for FixedTurnEstimator {
    fn estimate_block(&self, _block: &ContentBlock) -> usize {
        0
    }

    fn estimate_turn(&self, _turn: &Turn) -> usize {
        self.0
    }
}
