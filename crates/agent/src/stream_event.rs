//! Orchestrator-level streaming events.
//!
//! `StepEvent` wraps provider chunks and tool outcomes into the ordered
//! events the response assembler consumes over a bounded channel.

use serde::Serialize;
use tripmate_core::message::Message;
use tripmate_core::provider::{ToolChoice, Usage};
use tripmate_core::tool::{ToolCall, ToolOutcome};

/// Events emitted by the orchestrator during one exchange.
///
/// Exactly one terminal event ends every run: `finish`, `error` or `aborted`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepEvent {
    /// A model step is about to be requested.
    StepStart {
        step: usize,
        tool_choice: ToolChoice,
        active_tools: Vec<String>,
    },

    /// Partial answer text.
    TextDelta { step: usize, delta: String },

    /// Partial reasoning text.
    ReasoningDelta { step: usize, delta: String },

    /// The model requested a tool call.
    ToolCall { step: usize, call: ToolCall },

    /// A tool call completed (possibly with an error output).
    ToolResult {
        step: usize,
        tool_call_id: String,
        tool_name: String,
        outcome: ToolOutcome,
    },

    /// The model step (and its tool calls) is complete.
    StepFinish {
        step: usize,
        finish_reason: Option<String>,
        usage: Option<Usage>,
    },

    /// The exchange completed; `generated` holds every message produced.
    Finish {
        generated: Vec<Message>,
        usage: Usage,
        steps: usize,
        finish_reason: String,
    },

    /// The model failed; nothing must be committed.
    Error { message: String },

    /// The exchange was cancelled; nothing must be committed.
    Aborted,
}

impl StepEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StepStart { .. } => "step_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ReasoningDelta { .. } => "reasoning_delta",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::StepFinish { .. } => "step_finish",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
            Self::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. } | Self::Aborted)
    }
}
