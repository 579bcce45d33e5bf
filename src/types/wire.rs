use super::report::{Report, TokenUsage};
use serde::{Deserialize, Serialize};

/// Discriminated event on the server → client wire, one per SSE frame.
/// This is the decoder boundary: untyped provider JSON never travels past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Content { content: String },
    Metadata { metadata: serde_json::Value },
    Usage { usage: TokenUsage },
    Complete { report: Box<Report> },
    Error { error: String },
}

impl StreamEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, StreamEvent::Error { .. })
    }

    /// Encode as one `data: <json>\n\n` wire frame.
    pub fn to_sse_frame(&self) -> String {
        let payload = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","error":"event serialization failed"}"#.into());
        format!("data: {payload}\n\n")
    }
}

/// Terminal sentinel frame closing a successful stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Relay policy for `content` events while a generation is streaming.
/// `Standard` defers all client-visible output to completion so half-rendered
/// malformed HTML is never shown mid-stream; `Preview` relays deltas verbatim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    #[default]
    Standard,
    Preview,
}

/// Inbound generation request body (client → server).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub content: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    /// Present for the edit/enhance flow: the section to regenerate.
    pub enhance_section_id: Option<String>,
    /// Current document (or section) context for edit/enhance flows.
    pub current_html: Option<String>,
    /// Present for the add-section flow.
    pub position: Option<usize>,
    /// Present for the suggestion flow.
    #[serde(default)]
    pub suggest: bool,
    #[serde(default)]
    pub mode: StreamMode,
}
