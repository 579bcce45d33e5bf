use crate::types::{StreamEvent, TokenUsage, DONE_SENTINEL};
use bytes::BytesMut;
use serde_json::Value;

/// Incremental SSE frame decoder.
///
/// Bytes go in, typed [`StreamEvent`]s come out. The buffer holds raw bytes so
/// a chunk boundary may fall mid-frame or inside a multi-byte UTF-8 character
/// without corruption: only complete `\n\n`-terminated frames are decoded.
///
/// Besides the canonical wire payloads this normalizes the two provider-native
/// streaming shapes (Anthropic messages events and OpenAI chat-completion
/// chunks) into the same event set, so the orchestrator can drive it directly
/// against a model call. Malformed payloads are skipped, never fatal.
#[derive(Default)]
pub struct StreamDecoder {
    buffer: BytesMut,
    done: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been observed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(end) = find_frame_boundary(&self.buffer) {
            let frame = self.buffer.split_to(end + 2);
            let frame_text = String::from_utf8_lossy(&frame);

            // `event:` lines are tolerated and ignored; dispatch is on the
            // payload's own tag.
            for line in frame_text.lines() {
                let Some(payload) = line.strip_prefix("data: ") else {
                    continue;
                };
                let payload = payload.trim();
                if payload.is_empty() {
                    continue;
                }
                if payload == DONE_SENTINEL {
                    self.done = true;
                    continue;
                }
                match serde_json::from_str::<Value>(payload) {
                    Ok(value) => events.extend(normalize_payload(value)),
                    Err(parse_error) => {
                        tracing::debug!(%parse_error, payload, "skipping malformed SSE payload");
                    }
                }
            }
        }

        events
    }
}

fn find_frame_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|window| window == b"\n\n")
}

/// Map one decoded JSON payload to zero or more canonical events.
/// Unknown shapes yield nothing (leniency policy: providers may emit
/// partial or garbled frames during transient hiccups).
fn normalize_payload(value: Value) -> Vec<StreamEvent> {
    match value.get("type").and_then(Value::as_str) {
        Some("content") | Some("metadata") | Some("usage") | Some("complete") => {
            canonical_event(value)
        }
        Some("error") => error_event(value),
        Some("message_start") => anthropic_message_start(&value),
        Some("content_block_delta") => anthropic_content_delta(&value),
        Some("message_delta") => anthropic_message_delta(&value),
        Some(_) => Vec::new(),
        // No type tag: OpenAI chat-completion chunks.
        None => openai_chunk(&value),
    }
}

fn canonical_event(value: Value) -> Vec<StreamEvent> {
    match serde_json::from_value::<StreamEvent>(value) {
        Ok(event) => vec![event],
        Err(parse_error) => {
            tracing::debug!(%parse_error, "skipping malformed canonical event");
            Vec::new()
        }
    }
}

/// Canonical errors carry a string; Anthropic errors carry an object with a
/// `message`. Accept both.
fn error_event(value: Value) -> Vec<StreamEvent> {
    let error = match value.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(Value::Object(detail)) => detail
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("provider error")
            .to_string(),
        _ => "provider error".to_string(),
    };
    vec![StreamEvent::Error { error }]
}

fn anthropic_message_start(value: &Value) -> Vec<StreamEvent> {
    let Some(message) = value.get("message") else {
        return Vec::new();
    };
    let mut events = vec![StreamEvent::Metadata {
        metadata: serde_json::json!({
            "messageId": message.get("id").cloned().unwrap_or(Value::Null),
            "model": message.get("model").cloned().unwrap_or(Value::Null),
        }),
    }];
    if let Some(usage) = provider_usage(message.get("usage")) {
        events.push(StreamEvent::Usage { usage });
    }
    events
}

fn anthropic_content_delta(value: &Value) -> Vec<StreamEvent> {
    let text = value
        .get("delta")
        .and_then(|delta| delta.get("text"))
        .and_then(Value::as_str);
    match text {
        Some(text) if !text.is_empty() => vec![StreamEvent::Content {
            content: text.to_string(),
        }],
        _ => Vec::new(),
    }
}

fn anthropic_message_delta(value: &Value) -> Vec<StreamEvent> {
    match provider_usage(value.get("usage")) {
        Some(usage) => vec![StreamEvent::Usage { usage }],
        None => Vec::new(),
    }
}

fn openai_chunk(value: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    let delta_text = value
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str);
    if let Some(text) = delta_text {
        if !text.is_empty() {
            events.push(StreamEvent::Content {
                content: text.to_string(),
            });
        }
    }
    // The final chunk of a `stream_options.include_usage` stream carries usage.
    if let Some(usage) = provider_usage(value.get("usage")) {
        events.push(StreamEvent::Usage { usage });
    }
    events
}

/// Read `{input_tokens, output_tokens}` (Anthropic) or
/// `{prompt_tokens, completion_tokens}` (OpenAI) from a usage object.
fn provider_usage(value: Option<&Value>) -> Option<TokenUsage> {
    let usage = value?.as_object()?;
    let read = |keys: [&str; 2]| {
        keys.iter()
            .find_map(|key| usage.get(*key).and_then(Value::as_u64))
    };
    let input = read(["input_tokens", "prompt_tokens"]);
    let output = read(["output_tokens", "completion_tokens"]);
    if input.is_none() && output.is_none() {
        return None;
    }
    Some(TokenUsage::new(input.unwrap_or(0), output.unwrap_or(0)))
}
