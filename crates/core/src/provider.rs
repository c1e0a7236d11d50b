//! Provider trait: the abstraction over the model-invocation capability.
//!
//! A Provider knows how to send one step of a conversation to a language
//! model and get the output back, either complete or as a stream of deltas.
//! Each orchestrator step is a separate request, so tool availability and
//! tool choice can change between steps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;
use crate::tool::{ToolCall, ToolDefinition};

/// Which tool (if any) the model must call on a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// Tool calls are disabled for this step.
    None,
    /// The model must call the named tool.
    Tool { name: String },
}

impl ToolChoice {
    pub fn tool(name: impl Into<String>) -> Self {
        Self::Tool { name: name.into() }
    }
}

/// One step's request to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRequest {
    /// The model to use (e.g., "openai/gpt-4o")
    pub model: String,

    /// System instructions, sent ahead of the conversation
    pub system_prompt: String,

    /// The conversation so far, including earlier steps of this exchange
    pub messages: Vec<Message>,

    /// Tools the model may call on this step (active tools only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub tool_choice: ToolChoice,

    /// Temperature (0.0 = deterministic, 2.0 = very creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated answer text, if any
    #[serde(default)]
    pub content: Option<String>,

    /// Generated reasoning text, if the model exposes it
    #[serde(default)]
    pub reasoning: Option<String>,

    /// Completed tool calls requested by the model
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Why generation stopped (e.g., "stop", "tool_calls")
    #[serde(default)]
    pub finish_reason: Option<String>,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// A single chunk in a streaming response.
///
/// Text and reasoning arrive as deltas. Tool calls arrive only once their
/// arguments are complete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial answer text
    #[serde(default)]
    pub content: Option<String>,

    /// Partial reasoning text
    #[serde(default)]
    pub reasoning: Option<String>,

    /// Completed tool calls
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,

    /// Usage info (typically only in the final chunk)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// The receiving half of a provider stream.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>;

/// The core Provider trait.
///
/// The orchestrator calls `stream()` once per step without knowing which
/// backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ai-gateway").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: response.content,
                reasoning: response.reasoning,
                tool_calls: response.tool_calls,
                finish_reason: response.finish_reason,
                done: true,
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
