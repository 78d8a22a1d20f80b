//! Async HTTP client for the OpenRouter chat completions API.

use super::wire::{from_completion, to_messages};
use super::{ModelResponse, Provider, ProviderFuture, ProviderRequest};
use crate::error::ProviderError;
use crate::{ChatRequest, OPENROUTER_URL, ToolCall, UsageInfo};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Response types ─────────────────────────────────────────────────

/// Raw API response (internal deserialization target).
#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

// ── Client ─────────────────────────────────────────────────────────

/// [`Provider`] backed by OpenRouter (or any OpenAI-compatible endpoint).
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    /// Create a new client with the given API key and default headers.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_headers(api_key, "https://github.com/tacryt-socryp/palaver", "palaver")
    }

    /// Create a new client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .user_agent("palaver/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: OPENROUTER_URL.to_string(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ModelResponse, ProviderError> {
        debug!(
            "LLM request: model={}, messages={}, tools={}, max_tokens={}, temp={:?}",
            body.model,
            body.messages.len(),
            body.tools.as_ref().map_or(0, |t| t.len()),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ProviderError::Transport(format!("failed to read response: {e}")))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        parse_response(status.as_u16(), &text)
    }
}

impl Provider for OpenRouterClient {
    fn complete(&self, request: &ProviderRequest<'_>) -> ProviderFuture<'_> {
        let body = ChatRequest {
            model: request.model.clone(),
            messages: to_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools: (!request.tools.is_empty()).then(|| request.tools.clone()),
        };
        Box::pin(async move { self.chat(&body).await })
    }
}

/// Turn an HTTP status and body into a [`ModelResponse`].
fn parse_response(status: u16, text: &str) -> Result<ModelResponse, ProviderError> {
    if !(200..300).contains(&status) {
        return Err(ProviderError::Http {
            status,
            body: text.to_string(),
        });
    }

    let parsed: RawChatResponse = serde_json::from_str(text)
        .map_err(|e| ProviderError::MalformedResponse(format!("failed to parse response: {e}")))?;

    if let Some(err) = parsed.error {
        return Err(ProviderError::Api(err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let choice = parsed
        .choices
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;

    let tool_calls = choice.message.tool_calls.unwrap_or_default();
    debug!(
        "LLM output: {} chars text, {} tool call(s)",
        choice.message.content.as_ref().map_or(0, |s| s.len()),
        tool_calls.len()
    );

    Ok(ModelResponse {
        blocks: from_completion(choice.message.content, tool_calls)?,
        usage: parsed.usage,
        finish_reason: choice.finish_reason,
    })
}
