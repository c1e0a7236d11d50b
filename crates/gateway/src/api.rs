//! Chat and conversation handlers.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event as SseEvent, Sse},
    response::{IntoResponse, Json, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use tripmate_agent::{UI_STREAM_HEADER, UI_STREAM_VERSION};
use tripmate_core::message::{ConversationId, Message, Part, Role};

use crate::SharedState;

/// Header carrying the conversation id on requests and responses.
pub const CONVERSATION_HEADER: &str = "x-conversation-id";

/// Errors returned before a stream is opened.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotConfigured(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

/// Body of `POST /api/chat`.
///
/// Only the last message is read; earlier turns come from history. Message
/// parts the runtime does not model are skipped.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Explicit conversation key. Wins over `id`.
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
    /// Chat id sent by AI SDK clients.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    parts: Vec<serde_json::Value>,
    /// Older clients send plain `content`.
    #[serde(default)]
    content: Option<String>,
}

/// Extract the new user turn from a chat request body.
pub fn parse_user_message(body: &[u8]) -> Result<(Option<String>, Message), ApiError> {
    let request: ChatRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))?;

    let last = request
        .messages
        .last()
        .ok_or_else(|| ApiError::BadRequest("No messages provided".into()))?;
    let incoming: IncomingMessage = serde_json::from_value(last.clone())
        .map_err(|e| ApiError::BadRequest(format!("Invalid message: {e}")))?;

    if incoming.role != "user" {
        return Err(ApiError::BadRequest("The last message must be a user message".into()));
    }

    let mut parts: Vec<Part> = incoming
        .parts
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Part>(raw) {
            Ok(part @ (Part::Text { .. } | Part::File { .. })) => Some(part),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        if let Some(content) = incoming.content {
            parts.push(Part::text(content));
        }
    }

    let message = Message::new(Role::User, parts);
    if !message.has_content() {
        return Err(ApiError::BadRequest("The user message has no text or file content".into()));
    }

    let conversation_id = [request.conversation_id, request.id]
        .into_iter()
        .flatten()
        .find(|id| !id.trim().is_empty());
    Ok((conversation_id, message))
}

/// `POST /api/chat`: run one exchange and stream it as SSE.
pub async fn chat_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let pipeline = state.pipeline.clone().ok_or_else(|| {
        ApiError::NotConfigured("Model API key is not configured. Set TRIPMATE_API_KEY or AI_GATEWAY_API_KEY.".into())
    })?;

    let (body_id, user) = parse_user_message(&body)?;
    let conversation_id = body_id
        .or_else(|| {
            headers
                .get(CONVERSATION_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .map(|id| ConversationId::from(&id))
        .unwrap_or_default();

    info!(conversation = %conversation_id, "Chat request");
    let chat = pipeline.handle(conversation_id, user).await;
    debug!(conversation = %chat.conversation_id, in_scope = chat.in_scope, "Streaming response");

    let frames = ReceiverStream::new(chat.parts)
        .map(|part| match serde_json::to_string(&part) {
            Ok(json) => SseEvent::default().data(json),
            Err(e) => SseEvent::default().comment(format!("encode error: {e}")),
        })
        .chain(futures::stream::once(async { SseEvent::default().data("[DONE]") }))
        .map(Ok::<_, Infallible>);

    let mut response = Sse::new(frames).into_response();
    let response_headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(chat.conversation_id.as_str()) {
        response_headers.insert(CONVERSATION_HEADER, value);
    }
    response_headers.insert(UI_STREAM_HEADER, HeaderValue::from_static(UI_STREAM_VERSION));
    Ok(response)
}

#[derive(Serialize)]
struct ConversationResponse {
    id: String,
    messages: Vec<Message>,
}

/// `GET /api/conversations/{id}`: stored messages, empty if unknown.
pub async fn conversation_handler(State(state): State<SharedState>, Path(id): Path<String>) -> impl IntoResponse {
    let messages = state.history.get(&ConversationId::from(&id)).await;
    Json(ConversationResponse { id, messages })
}
