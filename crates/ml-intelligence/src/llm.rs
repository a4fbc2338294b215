//! LLM provider abstraction layer.
//!
//! Provides a unified async trait for model calls along with the Anthropic
//! Messages implementation and a scripted mock provider for testing.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed stream of text deltas.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur when interacting with an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// An HTTP-level error (connection failure, DNS, TLS, etc.).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The API returned a non-success status with a message.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse the API response body.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The completion did not match the requested output schema.
    #[error("schema error: {0}")]
    SchemaError(String),

    /// The API indicated rate limiting (HTTP 429).
    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The request timed out.
    #[error("request timed out")]
    Timeout,

    /// The requested operation is not supported by this provider.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::HttpError(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Core data types
// ---------------------------------------------------------------------------

/// Role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for LlmRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmRole::System => write!(f, "system"),
            LlmRole::User => write!(f, "user"),
            LlmRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn new(role: LlmRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LlmRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(LlmRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(LlmRole::Assistant, content)
    }
}

/// Configuration for an LLM completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl LlmConfig {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5-20241022".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            system_prompt: None,
        }
    }
}

/// Response from an LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub finish_reason: String,
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

/// Async trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a completion request and return the full response.
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError>;

    /// Stream a completion response as text deltas.
    ///
    /// Providers that do not support streaming should return
    /// `Err(LlmError::Unsupported(...))`.
    async fn stream(&self, messages: &[LlmMessage], config: &LlmConfig)
        -> Result<TextStream, LlmError>;
}

// ---------------------------------------------------------------------------
// AnthropicProvider
// ---------------------------------------------------------------------------

/// LLM provider for the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    ///
    /// `api_key` is the Anthropic API key (x-api-key header).
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".to_string(),
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the JSON request body for the Anthropic Messages API.
    pub fn build_request_body(messages: &[LlmMessage], config: &LlmConfig) -> serde_json::Value {
        // System prompt goes in the top-level `system` field, not as a message.
        let mut system_text: Option<String> = config.system_prompt.clone();

        let api_messages: Vec<serde_json::Value> = messages
            .iter()
            .filter_map(|msg| {
                if msg.role == LlmRole::System {
                    if let Some(ref mut s) = system_text {
                        s.push('\n');
                        s.push_str(&msg.content);
                    } else {
                        system_text = Some(msg.content.clone());
                    }
                    None
                } else {
                    Some(serde_json::json!({
                        "role": msg.role.to_string(),
                        "content": msg.content,
                    }))
                }
            })
            .collect();

        let mut body = serde_json::json!({
            "model": config.model,
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "messages": api_messages,
        });

        if let Some(system) = system_text {
            body["system"] = serde_json::Value::String(system);
        }

        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if status == 429 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(LlmError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                status,
                message: text,
            });
        }

        Ok(resp)
    }
}

/// Deserialize helpers for Anthropic API response.
#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    _type: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        let body = Self::build_request_body(messages, config);
        let resp = self.send(&body).await?;

        let api_resp: AnthropicResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        let content = api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            content,
            model: api_resp.model,
            input_tokens: api_resp.usage.input_tokens,
            output_tokens: api_resp.usage.output_tokens,
            finish_reason: api_resp.stop_reason.unwrap_or_else(|| "unknown".into()),
        })
    }

    async fn stream(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<TextStream, LlmError> {
        let mut body = Self::build_request_body(messages, config);
        body["stream"] = serde_json::Value::Bool(true);
        let resp = self.send(&body).await?;

        let bytes = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(LlmError::from));

        let state = SseState {
            bytes: Box::pin(bytes),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };

        Ok(Box::pin(futures_util::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(item) = st.pending.pop_front() {
                    return Some((item, st));
                }
                if st.done {
                    return None;
                }
                match st.bytes.next().await {
                    Some(Ok(chunk)) => {
                        st.buffer.extend_from_slice(&chunk);
                        st.drain_lines();
                    }
                    Some(Err(e)) => {
                        st.done = true;
                        st.pending.push_back(Err(e));
                    }
                    None => {
                        st.buffer.push(b'\n');
                        st.drain_lines();
                        st.done = true;
                    }
                }
            }
        })))
    }
}

// ---------------------------------------------------------------------------
// Server-sent events
// ---------------------------------------------------------------------------

/// One meaningful item decoded from an Anthropic SSE `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum SseDelta {
    Text(String),
    Stop,
}

#[derive(Deserialize)]
struct SsePayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<SseTextDelta>,
    #[serde(default)]
    error: Option<SseError>,
}

#[derive(Deserialize)]
struct SseTextDelta {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct SseError {
    message: String,
}

/// Decode the JSON of one `data:` line. Events that carry no text
/// (`ping`, `message_start`, ...) yield `Ok(None)`.
pub fn parse_sse_data(data: &str) -> Result<Option<SseDelta>, LlmError> {
    let payload: SsePayload =
        serde_json::from_str(data).map_err(|e| LlmError::ParseError(e.to_string()))?;
    match payload.kind.as_str() {
        "content_block_delta" => Ok(payload
            .delta
            .filter(|d| d.kind.as_deref() == Some("text_delta"))
            .and_then(|d| d.text)
            .map(SseDelta::Text)),
        "message_stop" => Ok(Some(SseDelta::Stop)),
        "error" => Err(LlmError::ApiError {
            status: 500,
            message: payload
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "stream error".into()),
        }),
        _ => Ok(None),
    }
}

struct SseState {
    bytes: Pin<Box<dyn Stream<Item = Result<Vec<u8>, LlmError>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, LlmError>>,
    done: bool,
}

impl SseState {
    /// Move every complete line out of the buffer into `pending`.
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim_end().strip_prefix("data:") else {
                continue;
            };
            match parse_sse_data(data.trim_start()) {
                Ok(Some(SseDelta::Text(text))) => self.pending.push_back(Ok(text)),
                Ok(Some(SseDelta::Stop)) => {
                    self.done = true;
                    self.buffer.clear();
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.done = true;
                    self.buffer.clear();
                    return;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

type CapturedRequest = (Vec<LlmMessage>, LlmConfig);

/// A mock LLM provider for testing.
///
/// Each call to `complete` pops the next queued response; an empty queue
/// yields a default response. `stream` pops the next queued chunk script and
/// reports `Unsupported` when none is queued.
#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<VecDeque<Result<LlmResponse, LlmError>>>>,
    streams: Arc<Mutex<VecDeque<Vec<String>>>>,
    captured_requests: Arc<Mutex<Vec<CapturedRequest>>>,
    calls: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a mock provider with no pre-configured responses (returns defaults).
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            streams: Arc::new(Mutex::new(VecDeque::new())),
            captured_requests: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// Queue a successful response.
    pub fn with_response(self, response: LlmResponse) -> Self {
        lock(&self.responses).push_back(Ok(response));
        self
    }

    /// Queue a successful response whose content is `text`.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let response = LlmResponse {
            content: text.into(),
            ..Self::default_response("mock-model")
        };
        self.with_response(response)
    }

    /// Queue a successful response whose content is `value` as JSON.
    pub fn with_json(self, value: serde_json::Value) -> Self {
        self.with_text(value.to_string())
    }

    /// Queue an error response.
    pub fn with_error(self, error: LlmError) -> Self {
        lock(&self.responses).push_back(Err(error));
        self
    }

    /// Queue a chunk script for the next `stream` call.
    pub fn with_stream_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.streams).push_back(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Sleep this long before answering, and between stream chunks.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get captured requests for assertions.
    pub fn captured_requests(&self) -> Vec<CapturedRequest> {
        lock(&self.captured_requests).clone()
    }

    /// Number of `complete` plus `stream` invocations.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn record(&self, messages: &[LlmMessage], config: &LlmConfig) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.captured_requests).push((messages.to_vec(), config.clone()));
    }

    fn default_response(model: &str) -> LlmResponse {
        LlmResponse {
            content: "Mock response".to_string(),
            model: model.to_string(),
            input_tokens: 10,
            output_tokens: 5,
            finish_reason: "end_turn".to_string(),
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    async fn complete(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<LlmResponse, LlmError> {
        self.record(messages, config);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = lock(&self.responses).pop_front();
        match next {
            Some(Ok(mut response)) => {
                if response.model == "mock-model" {
                    response.model = config.model.clone();
                }
                Ok(response)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Self::default_response(&config.model)),
        }
    }

    async fn stream(
        &self,
        messages: &[LlmMessage],
        config: &LlmConfig,
    ) -> Result<TextStream, LlmError> {
        let script = lock(&self.streams).pop_front();
        let Some(chunks) = script else {
            return Err(LlmError::Unsupported(
                "no stream scripted for MockProvider".into(),
            ));
        };
        self.record(messages, config);

        let delay = self.delay;
        Ok(Box::pin(futures_util::stream::iter(chunks).then(
            move |chunk| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, LlmError>(chunk)
            },
        )))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn default_config() -> LlmConfig {
        LlmConfig {
            model: "test-model".to_string(),
            max_tokens: 512,
            temperature: 0.5,
            system_prompt: None,
        }
    }

    // -- MockProvider tests --------------------------------------------------

    #[tokio::test]
    async fn mock_provider_returns_default_response() {
        let provider = MockProvider::new();
        let resp = provider
            .complete(&[LlmMessage::user("Hello")], &default_config())
            .await
            .unwrap();
        assert_eq!(resp.content, "Mock response");
        assert_eq!(resp.model, "test-model");
        assert_eq!(resp.input_tokens, 10);
        assert_eq!(resp.output_tokens, 5);
    }

    #[tokio::test]
    async fn mock_provider_returns_queued_then_default() {
        let provider = MockProvider::new().with_text("Custom answer");
        let config = default_config();

        let resp = provider
            .complete(&[LlmMessage::user("Hi")], &config)
            .await
            .unwrap();
        assert_eq!(resp.content, "Custom answer");
        assert_eq!(resp.model, "test-model");

        let resp2 = provider
            .complete(&[LlmMessage::user("Hi again")], &config)
            .await
            .unwrap();
        assert_eq!(resp2.content, "Mock response");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_provider_returns_queued_error() {
        let provider = MockProvider::new().with_error(LlmError::Timeout);
        let result = provider
            .complete(&[LlmMessage::user("Hi")], &default_config())
            .await;
        assert!(matches!(result, Err(LlmError::Timeout)));
    }

    #[tokio::test]
    async fn mock_provider_captures_requests() {
        let provider = MockProvider::new();
        let messages = vec![
            LlmMessage::system("You are helpful"),
            LlmMessage::user("Hello"),
        ];
        provider.complete(&messages, &default_config()).await.unwrap();

        let captured = provider.captured_requests();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0[0].role, LlmRole::System);
        assert_eq!(captured[0].0[1].content, "Hello");
        assert_eq!(captured[0].1.max_tokens, 512);
    }

    #[tokio::test]
    async fn mock_provider_stream_without_script_is_unsupported() {
        let provider = MockProvider::new();
        let result = provider
            .stream(&[LlmMessage::user("Hi")], &default_config())
            .await;
        assert!(matches!(result, Err(LlmError::Unsupported(_))));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn mock_provider_streams_scripted_chunks() {
        let provider = MockProvider::new().with_stream_chunks(["Hel", "lo"]);
        let stream = provider
            .stream(&[LlmMessage::user("Hi")], &default_config())
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hel", "lo"]);
    }

    #[tokio::test]
    async fn mock_provider_delay_applies() {
        let provider = MockProvider::new().with_delay(Duration::from_millis(200));
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            provider.complete(&[LlmMessage::user("Hi")], &default_config()),
        )
        .await;
        assert!(result.is_err());
    }

    // -- AnthropicProvider request body tests --------------------------------

    #[test]
    fn anthropic_request_body_basic() {
        let messages = vec![LlmMessage::user("How are you?")];
        let config = LlmConfig::new("claude-haiku-4-5-20241022", 450);

        let body = AnthropicProvider::build_request_body(&messages, &config);

        assert_eq!(body["model"], "claude-haiku-4-5-20241022");
        assert_eq!(body["max_tokens"], 450);
        assert!(body.get("system").is_none());

        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "How are you?");
    }

    #[test]
    fn anthropic_request_body_config_system_plus_message_system() {
        let messages = vec![
            LlmMessage::system("Extra rule"),
            LlmMessage::user("Hi"),
        ];
        let config = LlmConfig::new("m", 10).with_system_prompt("Base prompt");

        let body = AnthropicProvider::build_request_body(&messages, &config);
        assert_eq!(body["system"], "Base prompt\nExtra rule");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    // -- SSE parsing ---------------------------------------------------------

    #[test]
    fn sse_text_delta() {
        let data = r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#;
        assert_eq!(
            parse_sse_data(data).unwrap(),
            Some(SseDelta::Text("Hi".into()))
        );
    }

    #[test]
    fn sse_ignores_non_text_events() {
        assert_eq!(parse_sse_data(r#"{"type":"ping"}"#).unwrap(), None);
        let json_delta = r#"{"type":"content_block_delta","delta":{"type":"input_json_delta","partial_json":"{"}}"#;
        assert_eq!(parse_sse_data(json_delta).unwrap(), None);
    }

    #[test]
    fn sse_stop_and_error() {
        assert_eq!(
            parse_sse_data(r#"{"type":"message_stop"}"#).unwrap(),
            Some(SseDelta::Stop)
        );
        let err = parse_sse_data(r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn sse_state_reassembles_split_lines() {
        let raw = concat!(
            "event: content_block_delta\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
            "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n",
            "data: {\"type\":\"message_stop\"}\n\n",
        )
        .as_bytes()
        .to_vec();
        let (a, b) = raw.split_at(37);
        let chunks: Vec<Result<Vec<u8>, LlmError>> = vec![Ok(a.to_vec()), Ok(b.to_vec())];

        let mut st = SseState {
            bytes: Box::pin(futures_util::stream::iter(chunks)),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };
        let mut texts = Vec::new();
        while let Some(chunk) = st.bytes.next().await {
            st.buffer.extend_from_slice(&chunk.unwrap());
            st.drain_lines();
        }
        while let Some(item) = st.pending.pop_front() {
            texts.push(item.unwrap());
        }
        assert_eq!(texts, vec!["Hel", "lo"]);
        assert!(st.done);
    }

    // -- misc ----------------------------------------------------------------

    #[test]
    fn error_display_messages() {
        let err = LlmError::ApiError {
            status: 529,
            message: "overloaded".into(),
        };
        assert_eq!(err.to_string(), "API error (status 529): overloaded");
        assert_eq!(
            LlmError::SchemaError("missing field".into()).to_string(),
            "schema error: missing field"
        );
    }

    #[tokio::test]
    async fn provider_as_trait_object() {
        let provider: Arc<dyn LlmProvider> = Arc::new(MockProvider::new());
        let resp = provider
            .complete(&[LlmMessage::user("Hi")], &default_config())
            .await
            .unwrap();
        assert_eq!(resp.content, "Mock response");
    }
}
