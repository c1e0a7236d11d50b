//! End-to-end integration tests for the TripMate runtime.
//!
//! These tests run the full pipeline from a user turn to the client stream
//! and the committed history: guardrail, step policy, the real built-in
//! tools over a fake weather source, and the HTTP gateway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use tripmate_agent::{ChatPipeline, ChatStream, StepOrchestrator, UiStreamPart};
use tripmate_config::AppConfig;
use tripmate_core::error::ProviderError;
use tripmate_core::history::HistoryStore;
use tripmate_core::message::{ConversationId, Message, Part, Role};
use tripmate_core::provider::{ModelRequest, Provider, ProviderResponse, ToolChoice, Usage};
use tripmate_core::tool::ToolCall;
use tripmate_gateway::{GatewayState, build_router};
use tripmate_guardrail::{FixedRedirect, TopicGuardrail};
use tripmate_history::InMemoryHistoryStore;
use tripmate_tools::weather::{WeatherError, WeatherReport};
use tripmate_tools::{WeatherSource, registry_with_source};

// ── Mock Provider ────────────────────────────────────────────────────────

/// A mock provider that returns scripted responses in sequence.
///
/// Only `complete` is implemented, so every step goes through the default
/// single-chunk `stream`.
struct ScriptedProvider {
    responses: std::sync::Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: std::sync::Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    fn weather_then_text(city: &str, answer: &str) -> Self {
        Self::new(vec![
            Ok(tool_response(vec![weather_call(city)])),
            Ok(text_response(answer)),
        ])
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len();
        requests.push(request);
        let responses = self.responses.lock().unwrap();
        if index >= responses.len() {
            panic!("ScriptedProvider exhausted: call #{index}, have {}", responses.len());
        }
        responses[index].clone()
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: Some(text.to_string()),
        finish_reason: Some("stop".into()),
        usage: usage(),
        model: "mock-model".into(),
        ..Default::default()
    }
}

fn tool_response(tool_calls: Vec<ToolCall>) -> ProviderResponse {
    ProviderResponse {
        tool_calls,
        finish_reason: Some("tool_calls".into()),
        usage: usage(),
        model: "mock-model".into(),
        ..Default::default()
    }
}

fn weather_call(city: &str) -> ToolCall {
    ToolCall {
        id: "call_weather_1".into(),
        name: "weather".into(),
        arguments: serde_json::json!({ "location": city }),
    }
}

// ── Weather sources ──────────────────────────────────────────────────────

enum FakeWeather {
    Clear,
    Down,
    Hangs,
    Panics,
}

#[async_trait]
impl WeatherSource for FakeWeather {
    async fn fetch(&self, city: &str) -> Result<WeatherReport, WeatherError> {
        match self {
            Self::Clear => Ok(WeatherReport {
                city: city.to_string(),
                temp: 24,
                condition: "Clear".into(),
                alert: "No alerts available".into(),
                timezone: 10_800,
                forecast: vec![],
            }),
            Self::Down => Err(WeatherError::Network),
            Self::Hangs => std::future::pending().await,
            Self::Panics => panic!("weather source crashed"),
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Harness {
    pipeline: ChatPipeline,
    provider: Arc<ScriptedProvider>,
    history: Arc<InMemoryHistoryStore>,
}

fn harness(provider: ScriptedProvider, weather: FakeWeather) -> Harness {
    let provider = Arc::new(provider);
    let history = Arc::new(InMemoryHistoryStore::new());
    let tools = Arc::new(registry_with_source(Arc::new(weather), Duration::from_millis(200)));
    let config = AppConfig::default();

    let guardrail = TopicGuardrail::from_config_with_policy(&config.guardrail, Box::new(FixedRedirect(1)));
    let orchestrator = StepOrchestrator::from_config(&config, provider.clone(), tools);
    let pipeline = ChatPipeline::new(guardrail, orchestrator, history.clone());

    Harness {
        pipeline,
        provider,
        history,
    }
}

async fn collect(stream: ChatStream) -> Vec<UiStreamPart> {
    let mut rx = stream.parts;
    let mut parts = Vec::new();
    while let Some(part) = rx.recv().await {
        parts.push(part);
    }
    parts
}

fn tool_output(parts: &[UiStreamPart]) -> serde_json::Value {
    parts
        .iter()
        .find_map(|p| match p {
            UiStreamPart::ToolOutputAvailable { output, .. } => Some(output.clone()),
            _ => None,
        })
        .expect("no tool-output-available part")
}

fn streamed_text(parts: &[UiStreamPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            UiStreamPart::TextDelta { delta, .. } => Some(delta.as_str()),
            _ => None,
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_weather_in_nairobi() {
    let h = harness(
        ScriptedProvider::weather_then_text("Nairobi", "It's 24°C and clear in Nairobi. Perfect for a safari!"),
        FakeWeather::Clear,
    );
    let id = ConversationId::from("nairobi");

    let parts = collect(h.pipeline.handle(id.clone(), Message::user("weather in Nairobi")).await).await;

    // Step 0 was forced onto the weather tool, step 1 was free.
    let requests = h.provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tool_choice, ToolChoice::tool("weather"));
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "weather");
    assert_eq!(requests[1].tool_choice, ToolChoice::Auto);
    assert_eq!(requests[1].tools.len(), 3);

    let output = tool_output(&parts);
    assert_eq!(output["city"], "Nairobi");
    assert_eq!(output["temp"], 24);
    assert_eq!(output["condition"], "Clear");
    assert!(streamed_text(&parts).contains("24°C"));
    assert!(matches!(parts.last(), Some(UiStreamPart::Finish { .. })));

    let stored = h.history.get(&id).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[1].role, Role::Assistant);
    assert!(stored[1].parts.iter().any(|p| matches!(p, Part::ToolCall { tool_name, .. } if tool_name == "weather")));
    assert!(stored[1].parts.iter().any(|p| matches!(p, Part::ToolResult { is_error: false, .. })));
    assert!(stored[1].text().contains("Nairobi"));
}

#[tokio::test]
async fn e2e_temperature_question_forces_weather() {
    let h = harness(
        ScriptedProvider::weather_then_text("Tokyo", "Mild, around 24°C."),
        FakeWeather::Clear,
    );

    collect(
        h.pipeline
            .handle(ConversationId::new(), Message::user("What's the temperature in Tokyo?"))
            .await,
    )
    .await;

    let first = &h.provider.requests()[0];
    assert_eq!(first.tool_choice, ToolChoice::tool("weather"));
    let active: Vec<&str> = first.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(active, vec!["weather"]);
}

#[tokio::test]
async fn e2e_off_topic_is_redirected() {
    let h = harness(ScriptedProvider::new(vec![]), FakeWeather::Clear);
    let id = ConversationId::from("taxes");

    let stream = h
        .pipeline
        .handle(id.clone(), Message::user("Can you help me file my taxes?"))
        .await;
    assert!(!stream.in_scope);
    let parts = collect(stream).await;

    let config = AppConfig::default();
    assert_eq!(streamed_text(&parts), config.guardrail.redirects[1]);
    assert_eq!(h.provider.calls(), 0);
    assert!(h.history.get(&id).await.is_empty());
}

#[tokio::test]
async fn e2e_tool_failures_are_isolated() {
    for weather in [FakeWeather::Down, FakeWeather::Hangs, FakeWeather::Panics] {
        let h = harness(
            ScriptedProvider::weather_then_text("Lagos", "I couldn't get the weather for Lagos right now."),
            weather,
        );
        let id = ConversationId::from("lagos");

        let parts = collect(h.pipeline.handle(id.clone(), Message::user("What's the weather in Lagos?")).await).await;

        let output = tool_output(&parts);
        assert!(output["error"].is_string(), "expected error output, got {output}");
        assert!(matches!(parts.last(), Some(UiStreamPart::Finish { .. })));
        assert_eq!(h.history.get(&id).await.len(), 2);
    }
}

#[tokio::test]
async fn e2e_model_failure_commits_nothing() {
    let h = harness(
        ScriptedProvider::new(vec![
            Ok(tool_response(vec![weather_call("Rome")])),
            Err(ProviderError::ApiError {
                status_code: 500,
                message: "gateway down".into(),
            }),
        ]),
        FakeWeather::Clear,
    );
    let id = ConversationId::from("rome");
    let before = vec![Message::user("trip to Rome"), Message::assistant("Great choice!")];
    h.history.set(&id, before.clone()).await;

    let parts = collect(h.pipeline.handle(id.clone(), Message::user("weather in Rome")).await).await;

    match parts.last() {
        Some(UiStreamPart::Error { error_text }) => assert!(error_text.contains("gateway down")),
        other => panic!("Expected error part, got {other:?}"),
    }
    assert_eq!(h.history.get(&id).await, before);
}

#[tokio::test]
async fn e2e_history_stays_within_capacity() {
    let answers: Vec<_> = (0..30).map(|i| Ok(text_response(&format!("Answer {i}")))).collect();
    let provider = Arc::new(ScriptedProvider::new(answers));
    let history = Arc::new(InMemoryHistoryStore::with_limits(50, 100));
    let config = AppConfig::default();
    let tools = Arc::new(registry_with_source(Arc::new(FakeWeather::Clear), Duration::from_secs(1)));
    let pipeline = ChatPipeline::from_config(&config, provider, tools, history.clone());
    let id = ConversationId::from("long-trip");

    for i in 0..30 {
        collect(pipeline.handle(id.clone(), Message::user(format!("trip idea {i}"))).await).await;
    }

    let stored = history.get(&id).await;
    assert_eq!(stored.len(), 50);
    assert_eq!(stored[0].text(), "trip idea 5");
    assert_eq!(stored[49].text(), "Answer 29");
}

#[tokio::test]
async fn e2e_http_chat_round_trip() {
    let provider = Arc::new(ScriptedProvider::weather_then_text("Nairobi", "24°C and clear."));
    let history = Arc::new(InMemoryHistoryStore::new());
    let config = AppConfig::default();
    let tools = Arc::new(registry_with_source(Arc::new(FakeWeather::Clear), Duration::from_secs(1)));
    let pipeline = ChatPipeline::from_config(&config, provider, tools, history.clone());
    let app = build_router(Arc::new(GatewayState::new(config, Some(pipeline), history)));

    let body = serde_json::json!({
        "id": "http-1",
        "messages": [{ "role": "user", "parts": [{ "type": "text", "text": "weather in Nairobi" }] }]
    });
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-conversation-id"], "http-1");
    assert_eq!(response.headers()["x-vercel-ai-ui-message-stream"], "v1");

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let sse = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(sse.starts_with("data: {"));
    assert!(sse.contains(r#""type":"tool-output-available""#));
    assert!(sse.trim_end().ends_with("data: [DONE]"));

    let response = app
        .oneshot(Request::builder().uri("/api/conversations/http-1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let stored: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(stored["messages"].as_array().unwrap().len(), 2);
}
