use crate::config::Config;
use crate::util::is_local_endpoint_url;
use anyhow::{anyhow, Result};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
#[cfg(test)]
use std::sync::Arc;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

const SYSTEM_PROMPT: &str = "You are a financial report writer.\n\
Produce the report as clean HTML fragments only, with no markdown and no code fences.\n\
Wrap every independent section in a top-level element carrying a data-section-id attribute, \
for example <div data-section-id=\"section_metric_1\">...</div>.\n\
Choose marker values containing one of: chart, table, metric, insight; anything else renders as text.\n\
Start each section with an <h2>, <h3>, or <h4> heading naming the section.\n\
Mark key findings with class=\"insight\" plus a severity keyword \
(critical, warning, success) on the class attribute.\n\
When given a current document or section, revise that content in place and return \
the full revised fragment(s); do not restart from scratch.";

/// One conversation turn sent to the model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// One model call: the conversation plus optional current-document context
/// (used by edit/enhance flows so the model continues rather than restarts).
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    pub messages: Vec<ChatMessage>,
    pub current_document: Option<String>,
    pub model: Option<String>,
}

#[cfg(test)]
pub trait MockStreamProducer: Send + Sync {
    fn create_mock_stream(&self, request: &ModelRequest) -> Result<ByteStream>;
}

/// The "token generator" collaborator: opens the provider call and returns
/// the raw byte stream for the decoder.
#[derive(Clone)]
pub struct ModelClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_url: String,
    anthropic_version: String,
    api_protocol: ApiProtocol,
    #[cfg(test)]
    mock_stream_producer: Option<Arc<dyn MockStreamProducer>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApiProtocol {
    AnthropicMessages,
    OpenAiChatCompletions,
}

impl ModelClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_protocol = std::env::var("REPORTFORGE_API_PROTOCOL")
            .ok()
            .and_then(parse_protocol)
            .unwrap_or_else(|| infer_api_protocol(&config.api_url));

        Ok(Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_url: config.api_url.clone(),
            anthropic_version: config.anthropic_version.clone(),
            api_protocol,
            #[cfg(test)]
            mock_stream_producer: None,
        })
    }

    #[cfg(test)]
    pub fn new_mock(mock_producer: Arc<dyn MockStreamProducer>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: None,
            model: "mock-model".to_string(),
            api_url: "http://localhost:8000/v1/messages".to_string(),
            anthropic_version: "2023-06-01".to_string(),
            api_protocol: ApiProtocol::AnthropicMessages,
            mock_stream_producer: Some(mock_producer),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }

    pub fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }

    pub async fn create_stream(&self, request: &ModelRequest) -> Result<ByteStream> {
        #[cfg(test)]
        {
            if let Some(producer) = &self.mock_stream_producer {
                return producer.create_mock_stream(request);
            }
        }

        let request_url = self.request_url();
        let model = request.model.as_deref().unwrap_or(&self.model);
        let max_tokens = resolve_max_tokens(&self.api_url);
        let system = system_prompt_with_context(request.current_document.as_deref());

        let payload = match self.api_protocol {
            ApiProtocol::AnthropicMessages => json!({
                "model": model,
                "max_tokens": max_tokens,
                "stream": true,
                "system": system,
                "messages": request.messages,
            }),
            ApiProtocol::OpenAiChatCompletions => json!({
                "model": model,
                "max_tokens": max_tokens,
                "stream": true,
                "stream_options": { "include_usage": true },
                "messages": openai_messages(&request.messages, &system),
            }),
        };

        let mut http_request = self
            .http
            .post(&request_url)
            .header("content-type", "application/json")
            .json(&payload);

        match self.api_protocol {
            ApiProtocol::AnthropicMessages => {
                if let Some(api_key) = &self.api_key {
                    http_request = http_request.header("x-api-key", api_key);
                }
                if !self.anthropic_version.trim().is_empty() {
                    http_request =
                        http_request.header("anthropic-version", &self.anthropic_version);
                }
            }
            ApiProtocol::OpenAiChatCompletions => {
                if let Some(api_key) = &self.api_key {
                    http_request =
                        http_request.header("authorization", format!("Bearer {api_key}"));
                }
            }
        }

        let response = http_request
            .send()
            .await
            .map_err(|error| map_api_request_error(error, &request_url))?
            .error_for_status()
            .map_err(|error| map_api_request_error(error, &request_url))?;

        let request_url_for_stream = request_url.clone();
        let stream = response.bytes_stream().map(move |item| {
            item.map_err(|error| map_api_request_error(error, &request_url_for_stream))
        });
        Ok(Box::pin(stream))
    }

    fn request_url(&self) -> String {
        match self.api_protocol {
            ApiProtocol::AnthropicMessages => self.api_url.clone(),
            ApiProtocol::OpenAiChatCompletions => {
                adapt_to_openai_chat_completions_url(&self.api_url)
            }
        }
    }
}

fn system_prompt_with_context(current_document: Option<&str>) -> String {
    match current_document {
        Some(html) if !html.trim().is_empty() => {
            format!("{SYSTEM_PROMPT}\n\nCurrent document:\n{html}")
        }
        _ => SYSTEM_PROMPT.to_string(),
    }
}

fn map_api_request_error(error: reqwest::Error, request_url: &str) -> anyhow::Error {
    if error.is_connect() && is_local_endpoint_url(request_url) {
        return anyhow!(
            "cannot reach local API endpoint '{}': {}. Start your local server or update REPORTFORGE_API_URL.",
            request_url,
            error
        );
    }
    if error.is_connect() {
        return anyhow!("cannot reach API endpoint '{}': {}", request_url, error);
    }
    if error.is_timeout() {
        return anyhow!("API request to '{}' timed out: {}", request_url, error);
    }
    if let Some(status) = error.status() {
        return anyhow!(
            "API endpoint '{}' returned HTTP {}: {}",
            request_url,
            status,
            error
        );
    }
    anyhow!("API request to '{}' failed: {}", request_url, error)
}

fn resolve_max_tokens(api_url: &str) -> u32 {
    if let Some(value) = std::env::var("REPORTFORGE_MAX_TOKENS")
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
    {
        return value.clamp(256, 16_384);
    }

    if is_local_endpoint_url(api_url) {
        2048
    } else {
        8192
    }
}

fn parse_protocol(value: String) -> Option<ApiProtocol> {
    match value.trim().to_ascii_lowercase().as_str() {
        "anthropic" | "anthropic_messages" | "messages" | "v1/messages" => {
            Some(ApiProtocol::AnthropicMessages)
        }
        "openai" | "chat" | "chat_completions" | "openai_chat_completions" => {
            Some(ApiProtocol::OpenAiChatCompletions)
        }
        _ => None,
    }
}

fn infer_api_protocol(api_url: &str) -> ApiProtocol {
    let normalized = api_url.trim().to_ascii_lowercase();
    if normalized.contains("/chat/completions") || normalized.ends_with("/v1") {
        ApiProtocol::OpenAiChatCompletions
    } else {
        ApiProtocol::AnthropicMessages
    }
}

fn adapt_to_openai_chat_completions_url(api_url: &str) -> String {
    let normalized = api_url.trim_end_matches('/');
    if normalized.ends_with("/chat/completions") {
        return normalized.to_string();
    }
    if let Some(prefix) = normalized.strip_suffix("/messages") {
        return format!("{prefix}/chat/completions");
    }
    if normalized.ends_with("/v1") {
        return format!("{normalized}/chat/completions");
    }
    normalized.to_string()
}

fn openai_messages(messages: &[ChatMessage], system_prompt: &str) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(json!({
        "role": "system",
        "content": system_prompt
    }));
    for message in messages {
        out.push(json!({
            "role": message.role,
            "content": message.content
        }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_inference_defaults_to_anthropic_messages() {
        let protocol = infer_api_protocol("http://localhost:8000/v1/messages");
        assert_eq!(protocol, ApiProtocol::AnthropicMessages);
    }

    #[test]
    fn test_protocol_inference_detects_openai_chat() {
        let protocol = infer_api_protocol("http://localhost:8000/v1/chat/completions");
        assert_eq!(protocol, ApiProtocol::OpenAiChatCompletions);
    }

    #[test]
    fn test_openai_url_adapter_from_messages_endpoint() {
        let adapted = adapt_to_openai_chat_completions_url("http://localhost:8000/v1/messages");
        assert_eq!(adapted, "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_openai_url_adapter_from_v1_base_endpoint() {
        let adapted = adapt_to_openai_chat_completions_url("http://localhost:8000/v1");
        assert_eq!(adapted, "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn test_resolve_max_tokens_defaults_for_local() {
        let _env_lock = crate::test_support::ENV_LOCK.blocking_lock();
        std::env::remove_var("REPORTFORGE_MAX_TOKENS");
        let tokens = resolve_max_tokens("http://localhost:8000/v1/messages");
        assert_eq!(tokens, 2048);
    }

    #[test]
    fn test_system_prompt_carries_current_document_context() {
        let with_context =
            system_prompt_with_context(Some("<div data-section-id=\"section_metric_1\"></div>"));
        assert!(with_context.contains("Current document:"));
        assert!(with_context.contains("section_metric_1"));

        let without_context = system_prompt_with_context(None);
        assert!(!without_context.contains("Current document:"));
    }

    #[test]
    fn test_openai_messages_prepend_system_prompt() {
        let messages = vec![ChatMessage::user("make a report")];
        let converted = openai_messages(&messages, "system text");
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["role"], "system");
        assert_eq!(converted[1]["content"], "make a report");
    }
}
