//! Model gateway: the narrow boundary through which the core talks to a
//! language model.
//!
//! Two capabilities only: a one-shot completion returning the full text, and a
//! streamed completion yielding ordered text fragments. Callers interpret the
//! raw text themselves.

pub mod anthropic;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicGateway;

/// Errors raised by a model gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("empty response from model")]
    Empty,

    #[error("no scripted reply left for {0}")]
    Exhausted(String),
}

/// One request to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 8192,
            temperature: 0.0,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Ordered, finite, non-restartable text fragments.
pub type TextStream = BoxStream<'static, Result<String, GatewayError>>;

/// Text-completion capability.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Complete `request` and return the full reply text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError>;

    /// Stream the reply to `request` fragment by fragment.
    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, GatewayError>;
}
