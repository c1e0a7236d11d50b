//! Scripted collaborators for tests. Compiled only under `cfg(test)` or the
//! `test-util` feature.
//!
//! `ScriptedProvider` plays back one [`Script`] per model step. Every
//! request it receives is recorded so tests can assert on tool choice and
//! message history.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tripmate_core::error::{ProviderError, ToolError};
use tripmate_core::provider::{ChunkReceiver, ModelRequest, Provider, ProviderResponse, StreamChunk, Usage};
use tripmate_core::tool::{Tool, ToolCall, ToolRegistry};

/// What the provider does on one step.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these chunks, then close.
    Chunks(Vec<StreamChunk>),
    /// Stream these chunks, then report an error instead of finishing.
    Interrupted(Vec<StreamChunk>, ProviderError),
    /// Refuse to open the stream.
    Fail(ProviderError),
    /// Open the stream and never send anything.
    Hang,
}

impl Script {
    /// Answer text streamed word by word, finishing with `stop`.
    pub fn text(text: &str) -> Self {
        let mut chunks: Vec<StreamChunk> = text
            .split_inclusive(' ')
            .map(|word| StreamChunk {
                content: Some(word.to_string()),
                ..Default::default()
            })
            .collect();
        chunks.push(final_chunk("stop", Vec::new()));
        Self::Chunks(chunks)
    }

    /// Reasoning followed by answer text.
    pub fn reasoning_then_text(reasoning: &str, text: &str) -> Self {
        let mut chunks = vec![StreamChunk {
            reasoning: Some(reasoning.to_string()),
            ..Default::default()
        }];
        if let Self::Chunks(rest) = Self::text(text) {
            chunks.extend(rest);
        }
        Self::Chunks(chunks)
    }

    /// A step that only requests tool calls.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self::Chunks(vec![final_chunk("tool_calls", calls)])
    }

    /// Some answer text, then the upstream breaks off.
    pub fn interrupted(partial: &str, message: &str) -> Self {
        let chunk = StreamChunk {
            content: Some(partial.to_string()),
            ..Default::default()
        };
        Self::Interrupted(vec![chunk], ProviderError::StreamInterrupted(message.to_string()))
    }

    pub fn fail(message: &str) -> Self {
        Self::Fail(ProviderError::ApiError {
            status_code: 502,
            message: message.to_string(),
        })
    }
}

fn final_chunk(reason: &str, tool_calls: Vec<ToolCall>) -> StreamChunk {
    StreamChunk {
        tool_calls,
        finish_reason: Some(reason.to_string()),
        done: true,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        ..Default::default()
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args,
    }
}

/// A provider that plays back a fixed script, one entry per step.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Script>>,
    requests: Mutex<Vec<ModelRequest>>,
    /// Keeps hung streams open.
    parked: Mutex<Vec<mpsc::Sender<Result<StreamChunk, ProviderError>>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that answers once with text.
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![Script::text(text)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_script(&self, request: ModelRequest) -> Result<Script, ProviderError> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| ProviderError::NotConfigured("scripted provider poisoned".into()))?;
        let index = requests.len();
        requests.push(request);

        let scripts = self
            .scripts
            .lock()
            .map_err(|_| ProviderError::NotConfigured("scripted provider poisoned".into()))?;
        scripts.get(index).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "ScriptedProvider: no script for call #{index} (have {})",
                scripts.len()
            ))
        })
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ProviderResponse, ProviderError> {
        match self.next_script(request)? {
            Script::Chunks(chunks) => {
                let mut response = ProviderResponse {
                    model: "mock-model".into(),
                    ..Default::default()
                };
                let mut content = String::new();
                for chunk in chunks {
                    if let Some(c) = chunk.content {
                        content.push_str(&c);
                    }
                    response.tool_calls.extend(chunk.tool_calls);
                    response.finish_reason = chunk.finish_reason.or(response.finish_reason);
                    response.usage = chunk.usage.or(response.usage);
                }
                response.content = (!content.is_empty()).then_some(content);
                Ok(response)
            }
            Script::Interrupted(_, err) | Script::Fail(err) => Err(err),
            Script::Hang => std::future::pending().await,
        }
    }

    async fn stream(&self, request: ModelRequest) -> Result<ChunkReceiver, ProviderError> {
        match self.next_script(request)? {
            Script::Chunks(chunks) => {
                let (tx, rx) = mpsc::channel(chunks.len().max(1));
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
                Ok(rx)
            }
            Script::Interrupted(chunks, err) => {
                let (tx, rx) = mpsc::channel(chunks.len() + 1);
                for chunk in chunks {
                    let _ = tx.send(Ok(chunk)).await;
                }
                let _ = tx.send(Err(err)).await;
                Ok(rx)
            }
            Script::Fail(err) => Err(err),
            Script::Hang => {
                let (tx, rx) = mpsc::channel(1);
                if let Ok(mut parked) = self.parked.lock() {
                    parked.push(tx);
                }
                Ok(rx)
            }
        }
    }
}

/// A weather tool that always reports clear skies at 24°C.
pub struct FixedWeatherTool;

#[async_trait]
impl Tool for FixedWeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Get weather for a city (°C) with short forecast"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "location": { "type": "string" } },
            "required": ["location"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let city = arguments["location"].as_str().unwrap_or_default();
        Ok(serde_json::json!({ "city": city, "temp": 24, "condition": "Clear" }))
    }
}

/// A registry holding only [`FixedWeatherTool`].
pub fn test_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(FixedWeatherTool));
    registry
}

/// A weather tool whose lookup never returns.
pub struct HangingWeatherTool;

#[async_trait]
impl Tool for HangingWeatherTool {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Get weather for a city (°C) with short forecast"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        FixedWeatherTool.parameters_schema()
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        std::future::pending().await
    }
}

/// A registry whose `weather` tool hangs until the exchange is cancelled.
pub fn hanging_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(HangingWeatherTool));
    registry
}
