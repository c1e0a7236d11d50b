//! Message and Part domain types.
//!
//! These are the core value objects that flow through the entire system:
//! the client sends a user message → the orchestrator runs model steps →
//! the assembler commits one assistant message holding every generated part.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (one History Store entry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
///
/// The system prompt is not a stored message; it travels separately on
/// every [`crate::provider::ModelRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The assistant
    Assistant,
    /// Tool execution results
    Tool,
}

/// A single typed unit of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Part {
    /// Plain text.
    Text { text: String },

    /// A file reference (data URL or link).
    File {
        #[serde(rename = "mediaType")]
        media_type: String,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Model reasoning, shown to the client but not part of the answer.
    Reasoning { text: String },

    /// A tool invocation requested by the model.
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: serde_json::Value,
    },

    /// The output of a tool invocation. Failures carry `{ "error": ... }`.
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        output: serde_json::Value,
        #[serde(rename = "isError", default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }
}

/// A single message in a conversation. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who produced this message
    pub role: Role,

    /// Ordered content parts
    pub parts: Vec<Part>,

    /// Creation timestamp
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a message with an explicit role and parts.
    pub fn new(role: Role, parts: Vec<Part>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    /// Create a user message holding a single text part.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![Part::text(text)])
    }

    /// Create an assistant message holding a single text part.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![Part::text(text)])
    }

    /// Concatenated text of all `text` parts, space separated.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether the message carries any text or file content at all.
    pub fn has_content(&self) -> bool {
        self.parts.iter().any(|p| match p {
            Part::Text { text } => !text.trim().is_empty(),
            Part::File { .. } => true,
            _ => false,
        })
    }

    /// Collapse the messages generated during one exchange into a single
    /// assistant message, preserving part order. Returns `None` when no
    /// parts were generated.
    pub fn merge_generated(generated: impl IntoIterator<Item = Message>) -> Option<Message> {
        let parts: Vec<Part> = generated.into_iter().flat_map(|m| m.parts).collect();
        if parts.is_empty() {
            None
        } else {
            Some(Self::new(Role::Assistant, parts))
        }
    }
}

/// Text of the most recent user message in `messages`, lower-cased.
///
/// Returns an empty string when there is no user message.
pub fn latest_user_text(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.text().to_lowercase())
        .unwrap_or_default()
}
