//! OpenAI-compatible provider implementation.
//!
//! Works with the Vercel AI Gateway, OpenAI, OpenRouter and any endpoint
//! exposing `/chat/completions`.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Tool use with per-request tool choice
//! - Reasoning deltas (`reasoning` / `reasoning_content`)
//! - Image and file inputs on user messages

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, trace, warn};
use tripmate_core::error::ProviderError;
use tripmate_core::message::{Message, Part, Role};
use tripmate_core::provider::*;
use tripmate_core::tool::{ToolCall, ToolDefinition};

/// An OpenAI-compatible model provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create a Vercel AI Gateway provider (convenience constructor).
    pub fn ai_gateway(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new("ai-gateway", "https://ai-gateway.vercel.sh/v1", api_key)
    }

    /// Convert a request's system prompt and messages to OpenAI API format.
    ///
    /// Assistant messages may hold a whole exchange (calls, results and text
    /// interleaved); they are split back into assistant and `tool` messages.
    fn to_api_messages(system_prompt: &str, messages: &[Message]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system_prompt.is_empty() {
            out.push(ApiMessage::text("system", system_prompt));
        }

        for message in messages {
            match message.role {
                Role::User => out.push(Self::user_message(&message.parts)),
                Role::Assistant | Role::Tool => Self::push_exchange(&mut out, &message.parts),
            }
        }
        out
    }

    fn user_message(parts: &[Part]) -> ApiMessage {
        let has_files = parts.iter().any(|p| matches!(p, Part::File { .. }));
        if !has_files {
            let text = parts
                .iter()
                .filter_map(|p| match p {
                    Part::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            return ApiMessage::text("user", &text);
        }

        let content: Vec<serde_json::Value> = parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(serde_json::json!({ "type": "text", "text": text })),
                Part::File { media_type, url, .. } if media_type.starts_with("image/") => Some(
                    serde_json::json!({ "type": "image_url", "image_url": { "url": url } }),
                ),
                Part::File { url, name, .. } => Some(serde_json::json!({
                    "type": "file",
                    "file": { "file_data": url, "filename": name.clone().unwrap_or_else(|| "attachment".into()) }
                })),
                _ => None,
            })
            .collect();

        ApiMessage {
            role: "user".into(),
            content: Some(serde_json::Value::Array(content)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn push_exchange(out: &mut Vec<ApiMessage>, parts: &[Part]) {
        let mut text = String::new();
        let mut calls: Vec<ApiToolCall> = Vec::new();

        fn flush(out: &mut Vec<ApiMessage>, text: &mut String, calls: &mut Vec<ApiToolCall>) {
            if text.is_empty() && calls.is_empty() {
                return;
            }
            out.push(ApiMessage {
                role: "assistant".into(),
                content: (!text.is_empty()).then(|| serde_json::Value::String(std::mem::take(text))),
                tool_calls: (!calls.is_empty()).then(|| std::mem::take(calls)),
                tool_call_id: None,
            });
        }

        for part in parts {
            match part {
                Part::Text { text: t } => {
                    if !calls.is_empty() {
                        flush(out, &mut text, &mut calls);
                    }
                    text.push_str(t);
                }
                Part::ToolCall { tool_call_id, tool_name, input } => calls.push(ApiToolCall {
                    id: tool_call_id.clone(),
                    r#type: "function".into(),
                    function: ApiFunction {
                        name: tool_name.clone(),
                        arguments: input.to_string(),
                    },
                }),
                Part::ToolResult { tool_call_id, output, .. } => {
                    flush(out, &mut text, &mut calls);
                    out.push(ApiMessage {
                        role: "tool".into(),
                        content: Some(serde_json::Value::String(output.to_string())),
                        tool_calls: None,
                        tool_call_id: Some(tool_call_id.clone()),
                    });
                }
                // Reasoning is never replayed to the model.
                Part::Reasoning { .. } | Part::File { .. } => {}
            }
        }
        flush(out, &mut text, &mut calls);
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn to_api_tool_choice(choice: &ToolChoice) -> serde_json::Value {
        match choice {
            ToolChoice::Auto => serde_json::json!("auto"),
            ToolChoice::None => serde_json::json!("none"),
            ToolChoice::Tool { name } => serde_json::json!({
                "type": "function",
                "function": { "name": name }
            }),
        }
    }

    fn request_body(request: &ModelRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.system_prompt, &request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        // tool_choice without tools is rejected by most endpoints
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = Self::to_api_tool_choice(&request.tool_choice);
        }

        body
    }

    async fn send(
        &self,
        body: &serde_json::Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    // Malformed arguments are passed on as a string; schema validation rejects them.
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ModelRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::request_body(&request, false);
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.send(&body, false).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        let choice =
            api_response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| ProviderError::ApiError {
                    status_code: 200,
                    message: "No choices in response".into(),
                })?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: parse_arguments(&tc.function.arguments),
            })
            .collect();

        Ok(ProviderResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            reasoning: choice.message.reasoning.filter(|r| !r.is_empty()),
            tool_calls,
            finish_reason: choice.finish_reason,
            usage: api_response.usage.map(Usage::from),
            model: api_response.model,
        })
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(response.status().is_success())
    }

    async fn stream(&self, request: ModelRequest) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::request_body(&request, true);
        debug!(
            provider = %self.name,
            model = %request.model,
            tools = request.tools.len(),
            tool_choice = ?request.tool_choice,
            "Sending streaming request"
        );

        let response = self.send(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        tokio::spawn(pump_sse(response.bytes_stream(), tx, provider_name));

        Ok(rx)
    }
}

/// Read an SSE byte stream into `tx`, ending with exactly one terminal
/// item: a `done` chunk or an error.
async fn pump_sse<S, B, E>(
    mut byte_stream: S,
    tx: tokio::sync::mpsc::Sender<Result<StreamChunk, ProviderError>>,
    provider_name: String,
) where
    S: futures::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut lines = SseLines::default();
    let mut state = StreamState::default();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx.send(Err(ProviderError::StreamInterrupted(e.to_string()))).await;
                return;
            }
        };
        lines.push(bytes.as_ref());

        while let Some(line) = lines.next_line() {
            // Skip empty lines and SSE comments
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();

            if data == "[DONE]" {
                let _ = tx.send(Ok(state.finish())).await;
                return;
            }

            match state.handle(data) {
                Ok(Some(chunk)) => {
                    if tx.send(Ok(chunk)).await.is_err() {
                        return; // receiver dropped
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(provider = %provider_name, error = %e, "Upstream failed mid-stream");
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    let terminal = state.finish_at_eof();
    if terminal.is_err() {
        warn!(provider = %provider_name, "Stream ended without [DONE] or a finish reason");
    }
    let _ = tx.send(terminal).await;
}

/// Splits an SSE byte stream into lines. Bytes are only decoded once a
/// whole line is buffered, so multi-byte characters may straddle chunks.
#[derive(Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        let text = String::from_utf8_lossy(&line[..end]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Message of an upstream `{"error": ...}` payload.
fn upstream_error_message(error: &serde_json::Value) -> String {
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

/// Accumulated state of one streaming response.
#[derive(Default)]
struct StreamState {
    /// Tool call deltas keyed by index
    tool_calls: BTreeMap<u32, ToolCallAccumulator>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl StreamState {
    /// Fold one SSE data payload in. Returns a delta chunk when there is
    /// text or reasoning to forward, and an error when the upstream reports
    /// one mid-stream. Unparseable payloads are skipped.
    fn handle(&mut self, data: &str) -> Result<Option<StreamChunk>, ProviderError> {
        let resp: StreamResponse = match serde_json::from_str(data) {
            Ok(resp) => resp,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Ok(None);
            }
        };

        if let Some(error) = resp.error {
            return Err(ProviderError::StreamInterrupted(upstream_error_message(&error)));
        }

        if let Some(usage) = resp.usage {
            self.usage = Some(usage.into());
        }

        let Some(choice) = resp.choices.into_iter().next() else {
            return Ok(None);
        };

        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }

        for tc_delta in choice.delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(tc_delta.index).or_default();
            if let Some(id) = tc_delta.id {
                acc.id = id;
            }
            if let Some(func) = tc_delta.function {
                if let Some(name) = func.name {
                    acc.name = name;
                }
                if let Some(args) = func.arguments {
                    acc.arguments.push_str(&args);
                }
            }
        }

        let content = choice.delta.content.filter(|c| !c.is_empty());
        let reasoning = choice.delta.reasoning.filter(|r| !r.is_empty());
        if content.is_none() && reasoning.is_none() {
            return Ok(None);
        }

        Ok(Some(StreamChunk {
            content,
            reasoning,
            ..Default::default()
        }))
    }

    /// The terminal chunk for a stream that closed without `[DONE]`. Only
    /// a stream that reported a finish reason counts as complete.
    fn finish_at_eof(&mut self) -> Result<StreamChunk, ProviderError> {
        if self.finish_reason.is_none() {
            return Err(ProviderError::StreamInterrupted(
                "stream closed before the model finished".into(),
            ));
        }
        Ok(self.finish())
    }

    /// The terminal chunk: completed tool calls in index order plus usage.
    fn finish(&mut self) -> StreamChunk {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|acc| acc.into_tool_call())
            .collect();

        StreamChunk {
            tool_calls,
            finish_reason: self.finish_reason.take(),
            done: true,
            usage: self.usage.take(),
            ..Default::default()
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ApiMessage {
    fn text(role: &str, text: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(serde_json::Value::String(text.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(u: ApiUsage) -> Self {
        Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    /// Set when the upstream fails after the stream has started.
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self) -> ToolCall {
        ToolCall {
            id: self.id,
            name: self.name,
            arguments: parse_arguments(&self.arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::post};

    fn tool_exchange() -> Message {
        Message::new(
            Role::Assistant,
            vec![
                Part::reasoning("Need the weather first."),
                Part::ToolCall {
                    tool_call_id: "call_1".into(),
                    tool_name: "weather".into(),
                    input: serde_json::json!({"location": "Nairobi"}),
                },
                Part::ToolResult {
                    tool_call_id: "call_1".into(),
                    tool_name: "weather".into(),
                    output: serde_json::json!({"city": "Nairobi", "temp": 24}),
                    is_error: false,
                },
                Part::text("It is 24°C in Nairobi."),
            ],
        )
    }

    #[test]
    fn gateway_constructor() {
        let provider = OpenAiCompatProvider::ai_gateway("key").unwrap();
        assert_eq!(provider.name(), "ai-gateway");
        assert!(provider.base_url.contains("ai-gateway.vercel.sh"));
    }

    #[test]
    fn message_conversion_prepends_system_prompt() {
        let api = OpenAiCompatProvider::to_api_messages("You are TripMate.", &[Message::user("Hello")]);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
        assert_eq!(api[1].content, Some(serde_json::json!("Hello")));
    }

    #[test]
    fn merged_exchange_is_split_for_the_wire() {
        let api = OpenAiCompatProvider::to_api_messages("", &[Message::user("weather?"), tool_exchange()]);
        let roles: Vec<&str> = api.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);

        let calls = api[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].function.name, "weather");
        assert!(api[1].content.is_none());

        assert_eq!(api[2].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api[3].content, Some(serde_json::json!("It is 24°C in Nairobi.")));
    }

    #[test]
    fn image_parts_become_content_array() {
        let msg = Message::new(
            Role::User,
            vec![
                Part::text("Where was this taken?"),
                Part::File {
                    media_type: "image/jpeg".into(),
                    url: "https://example.com/beach.jpg".into(),
                    name: None,
                },
            ],
        );
        let api = OpenAiCompatProvider::to_api_messages("", &[msg]);
        let content = api[0].content.as_ref().unwrap().as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "https://example.com/beach.jpg");
    }

    #[test]
    fn tool_choice_mapping() {
        assert_eq!(OpenAiCompatProvider::to_api_tool_choice(&ToolChoice::Auto), "auto");
        assert_eq!(OpenAiCompatProvider::to_api_tool_choice(&ToolChoice::None), "none");
        let forced = OpenAiCompatProvider::to_api_tool_choice(&ToolChoice::tool("weather"));
        assert_eq!(forced["function"]["name"], "weather");
    }

    #[test]
    fn request_body_omits_tool_choice_without_tools() {
        let request = ModelRequest {
            model: "openai/gpt-4o".into(),
            system_prompt: String::new(),
            messages: vec![Message::user("hi")],
            tools: vec![],
            tool_choice: ToolChoice::None,
            temperature: 0.7,
            max_tokens: Some(256),
        };
        let body = OpenAiCompatProvider::request_body(&request, true);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    // --- SSE parsing tests ---

    #[test]
    fn stream_state_forwards_text_and_reasoning() {
        let mut state = StreamState::default();
        let chunk = state
            .handle(r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hello"));

        let chunk = state
            .handle(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.reasoning.as_deref(), Some("hmm"));

        assert!(state.handle(r#"{"choices":[{"delta":{}}]}"#).unwrap().is_none());
    }

    #[test]
    fn stream_state_assembles_tool_calls_in_index_order() {
        let mut state = StreamState::default();
        let deltas = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"create_trip_card","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"weather","arguments":"{\"loca"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"tion\":\"Lagos\"}"}}]},"finish_reason":"tool_calls"}]}"#,
            r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#,
        ];
        for d in deltas {
            assert!(state.handle(d).unwrap().is_none());
        }

        let last = state.finish();
        assert!(last.done);
        assert_eq!(last.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(last.usage.unwrap().total_tokens, 15);
        assert_eq!(last.tool_calls.len(), 2);
        assert_eq!(last.tool_calls[0].name, "weather");
        assert_eq!(last.tool_calls[0].arguments, serde_json::json!({"location": "Lagos"}));
        assert_eq!(last.tool_calls[1].arguments, serde_json::json!({}));
    }

    #[test]
    fn malformed_arguments_pass_through_as_string() {
        assert_eq!(parse_arguments("{oops"), serde_json::json!("{oops"));
    }

    /// Feed `frames` through the SSE reader and collect what the consumer sees.
    async fn pump(frames: Vec<Vec<u8>>) -> Vec<Result<StreamChunk, ProviderError>> {
        let bytes = futures::stream::iter(frames.into_iter().map(Ok::<_, std::io::Error>));
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        pump_sse(bytes, tx, "test".to_string()).await;
        let mut out = Vec::new();
        while let Some(item) = rx.recv().await {
            out.push(item);
        }
        out
    }

    #[test]
    fn upstream_error_payload_interrupts_stream() {
        let mut state = StreamState::default();
        let err = state
            .handle(r#"{"error":{"message":"upstream overloaded","type":"server_error"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(ref m) if m == "upstream overloaded"));

        let err = state.handle(r#"{"error":"rate limited"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(ref m) if m == "rate limited"));
    }

    #[test]
    fn unparseable_payload_is_skipped() {
        let mut state = StreamState::default();
        assert!(state.handle("{not json").unwrap().is_none());
    }

    #[test]
    fn line_buffer_keeps_split_characters_whole() {
        let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"24°C\"}}]}\n".as_bytes();
        let split = frame.iter().position(|b| *b == 0xC2).unwrap() + 1;

        let mut lines = SseLines::default();
        lines.push(&frame[..split]);
        assert!(lines.next_line().is_none());
        lines.push(&frame[split..]);
        let line = lines.next_line().unwrap();
        assert!(line.contains("24°C"));
        assert!(!line.contains('\u{FFFD}'));
        assert!(lines.next_line().is_none());
    }

    #[tokio::test]
    async fn character_split_across_chunks_arrives_intact() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Nairobi is 24°C\"},\"finish_reason\":\"stop\"}]}\r\n\r\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();
        let split = sse.iter().position(|b| *b == 0xC2).unwrap() + 1;

        let items = pump(vec![sse[..split].to_vec(), sse[split..].to_vec()]).await;
        assert_eq!(items.len(), 2);
        let first = items[0].as_ref().unwrap();
        assert_eq!(first.content.as_deref(), Some("Nairobi is 24°C"));
        assert!(items[1].as_ref().unwrap().done);
    }

    #[tokio::test]
    async fn error_event_after_text_ends_with_error() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Let me check\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"upstream overloaded\"}}\n\n",
        );

        let items = pump(vec![sse.as_bytes().to_vec()]).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().content.as_deref(), Some("Let me check"));
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn close_without_done_or_finish_reason_is_an_error() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Partial\"}}]}\n\n";

        let items = pump(vec![sse.as_bytes().to_vec()]).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn close_after_finish_reason_without_done_completes() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"Done.\"},\"finish_reason\":\"stop\"}]}\n\n";

        let items = pump(vec![sse.as_bytes().to_vec()]).await;
        let last = items.last().unwrap().as_ref().unwrap();
        assert!(last.done);
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn transport_error_interrupts_stream() {
        let bytes = futures::stream::iter(vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]);
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        pump_sse(bytes, tx, "test".to_string()).await;

        assert!(rx.recv().await.unwrap().is_ok());
        assert!(matches!(rx.recv().await, Some(Err(ProviderError::StreamInterrupted(_)))));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn streams_from_sse_endpoint() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Sunny \"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"today.\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":3,\"completion_tokens\":2,\"total_tokens\":5}}\n\n",
            "data: [DONE]\n\n",
        );
        let router = Router::new().route("/chat/completions", post(move || async move { sse }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let provider = OpenAiCompatProvider::new("test", format!("http://{addr}"), "key").unwrap();
        let mut rx = provider
            .stream(ModelRequest {
                model: "m".into(),
                system_prompt: "s".into(),
                messages: vec![Message::user("weather?")],
                tools: vec![],
                tool_choice: ToolChoice::Auto,
                temperature: 0.0,
                max_tokens: None,
            })
            .await
            .unwrap();

        let mut text = String::new();
        let mut last = None;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if let Some(c) = &chunk.content {
                text.push_str(c);
            }
            if chunk.done {
                last = Some(chunk);
            }
        }
        assert_eq!(text, "Sunny today.");
        let last = last.unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
        assert_eq!(last.usage.unwrap().total_tokens, 5);
    }

    #[tokio::test]
    async fn auth_failure_is_mapped() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { axum::http::StatusCode::UNAUTHORIZED }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let provider = OpenAiCompatProvider::new("test", format!("http://{addr}"), "bad").unwrap();
        let err = provider
            .complete(ModelRequest {
                model: "m".into(),
                system_prompt: String::new(),
                messages: vec![Message::user("hi")],
                tools: vec![],
                tool_choice: ToolChoice::Auto,
                temperature: 0.0,
                max_tokens: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }
}
