//! Client stream parts, compatible with the AI SDK v6 UI message stream.
//!
//! Each part is sent as one SSE frame (`data: <json>\n\n`); the stream is
//! terminated by `data: [DONE]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header announcing the UI message stream protocol version.
pub const UI_STREAM_HEADER: &str = "x-vercel-ai-ui-message-stream";
pub const UI_STREAM_VERSION: &str = "v1";

/// Final SSE frame.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UiStreamPart {
    /// Beginning of the assistant message.
    Start {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "messageMetadata", skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },

    StartStep,

    TextStart {
        id: String,
    },

    TextDelta {
        id: String,
        delta: String,
    },

    TextEnd {
        id: String,
    },

    ReasoningStart {
        id: String,
    },

    ReasoningDelta {
        id: String,
        delta: String,
    },

    ReasoningEnd {
        id: String,
    },

    /// Complete tool input, ready for execution.
    ToolInputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: Value,
    },

    /// Tool result. Failures carry `{ "error": ... }` as output.
    ToolOutputAvailable {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: Value,
    },

    FinishStep,

    Finish {
        #[serde(rename = "finishReason", skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
        #[serde(rename = "messageMetadata", skip_serializing_if = "Option::is_none")]
        message_metadata: Option<Value>,
    },

    Abort {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    Error {
        #[serde(rename = "errorText")]
        error_text: String,
    },
}

impl UiStreamPart {
    /// Whether this part ends the message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Abort { .. } | Self::Error { .. })
    }

    /// Encode as one SSE `data:` frame.
    pub fn to_sse_frame(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("data: {json}\n\n"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode stream part");
                String::new()
            }
        }
    }
}

/// Map a provider finish reason onto the UI stream vocabulary.
pub fn ui_finish_reason(provider_reason: &str) -> &'static str {
    match provider_reason {
        "stop" | "end_turn" => "stop",
        "tool_calls" | "tool-calls" | "function_call" => "tool-calls",
        "length" | "max_tokens" => "length",
        "content_filter" | "content-filter" => "content-filter",
        "error" => "error",
        _ => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_use_kebab_case_tags() {
        let json = serde_json::to_value(UiStreamPart::StartStep).unwrap();
        assert_eq!(json, serde_json::json!({"type": "start-step"}));

        let json = serde_json::to_value(UiStreamPart::ToolInputAvailable {
            tool_call_id: "call_1".into(),
            tool_name: "weather".into(),
            input: serde_json::json!({"location": "Lagos"}),
        })
        .unwrap();
        assert_eq!(json["type"], "tool-input-available");
        assert_eq!(json["toolCallId"], "call_1");
    }

    #[test]
    fn start_carries_metadata() {
        let part = UiStreamPart::Start {
            message_id: "msg_1".into(),
            message_metadata: Some(serde_json::json!({"conversationId": "c1"})),
        };
        let frame = part.to_sse_frame();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains(r#""messageId":"msg_1""#));
        assert!(frame.contains(r#""conversationId":"c1""#));
    }

    #[test]
    fn error_part_shape() {
        let json = serde_json::to_value(UiStreamPart::Error { error_text: "boom".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "error", "errorText": "boom"}));
        assert!(UiStreamPart::Abort { reason: None }.is_terminal());
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(ui_finish_reason("stop"), "stop");
        assert_eq!(ui_finish_reason("tool_calls"), "tool-calls");
        assert_eq!(ui_finish_reason("content_filter"), "content-filter");
        assert_eq!(ui_finish_reason("weird"), "other");
    }
}
