//! Model provider layer.
//!
//! The dispatcher talks to the model only through the [`Provider`] trait, so
//! the conversation core never depends on a particular HTTP API:
//!
//! - [`Provider`]: one request in, one [`ModelResponse`] out.
//! - [`wire`]: maps turns and content blocks to and from the
//!   OpenAI-compatible [`Message`](crate::Message) format.
//! - [`openrouter`]: [`OpenRouterClient`], the reqwest-based implementation.

pub mod openrouter;
pub mod wire;

pub use openrouter::OpenRouterClient;

use crate::conversation::{ContentBlock, Turn};
use crate::error::ProviderError;
use crate::{ToolDef, UsageInfo};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by [`Provider::complete`].
pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ModelResponse, ProviderError>> + Send + 'a>>;

/// Everything the provider needs for one model call.
///
/// `turns` borrows from the history store: it is the validated, truncated
/// context window, not a copy of the conversation.
#[derive(Debug, Clone)]
pub struct ProviderRequest<'a> {
    pub model: String,
    pub system_prompt: Option<String>,
    /// Note telling the model that older turns were left out. Set only when
    /// the context window dropped turns.
    pub truncation_notice: Option<String>,
    pub turns: Vec<&'a Turn>,
    pub tools: Vec<ToolDef>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

/// A model's reply, already mapped to content blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub blocks: Vec<ContentBlock>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

impl ModelResponse {
    /// A text-only response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            blocks: vec![ContentBlock::text(text)],
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks.iter().any(ContentBlock::is_tool_call)
    }
}

/// A language-model backend.
///
/// Implementations must not hold on to the request: anything needed by the
/// returned future is converted to owned data before it is created.
pub trait Provider: Send + Sync {
    fn complete(&self, request: &ProviderRequest<'_>) -> ProviderFuture<'_>;
}
