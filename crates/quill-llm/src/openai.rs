//! OpenAI Assistants API backend implementation.
//!
//! This module provides `OpenAiAssistantBackend`, which drives assistants,
//! threads and streamed runs through the OpenAI Assistants (v2) REST API.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use reqwest::{Client, Response, header};
use serde::Deserialize;
use serde_json::{Value, json};
use std::pin::Pin;
use std::time::Duration;

use crate::backend::{
    AssistantBackend, AssistantSpec, RunEvent, RunStream, ToolCall, ToolOutput, with_retry,
};
use crate::error::{LlmError, Result};

/// Default OpenAI API base URL.
const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Default timeout for non-streaming requests.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Header selecting the Assistants API version.
const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the OpenAI Assistants backend.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API key for authentication.
    pub api_key: String,

    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,

    /// Maximum retries for transient errors.
    pub max_retries: u32,

    /// Initial backoff duration for retries.
    pub retry_backoff: Duration,

    /// Name for this backend instance.
    pub name: String,
}

impl OpenAiConfig {
    /// Create a new config for OpenAI.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_OPENAI_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            name: "openai".to_string(),
        }
    }

    /// Create config from environment.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            LlmError::Config("OPENAI_API_KEY environment variable not set".to_string())
        })?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set max retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI Backend
// ─────────────────────────────────────────────────────────────────────────────

/// OpenAI Assistants API backend.
pub struct OpenAiAssistantBackend {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiAssistantBackend {
    /// Create a new backend with the given configuration.
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        // Streamed runs can outlive any fixed request timeout, so only the
        // connect phase is bounded on the client. Unary calls set their own.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Create a backend from environment.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAiConfig::from_env()?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Add authentication and version headers to a request.
    fn add_headers(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
    }

    /// POST a JSON body and decode a JSON response, retrying transient failures.
    async fn post_json(&self, path: &str, body: Value) -> Result<Value> {
        with_retry(
            self.config.max_retries,
            self.config.retry_backoff,
            &self.config.name,
            || async {
                let response = self
                    .add_headers(self.client.post(self.url(path)))
                    .timeout(self.config.timeout)
                    .json(&body)
                    .send()
                    .await?;
                Self::handle_response(response).await
            },
        )
        .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .add_headers(self.client.delete(self.url(path)))
            .timeout(self.config.timeout)
            .send()
            .await?;
        Self::handle_response(response).await.map(|_| ())
    }

    /// POST a JSON body expecting an SSE run stream.
    async fn post_stream(&self, path: &str, body: Value) -> Result<RunStream> {
        let response = self
            .add_headers(self.client.post(self.url(path)))
            .header(header::ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        Ok(parse_assistant_sse_stream(response.bytes_stream()))
    }

    /// Handle a unary response.
    async fn handle_response(response: Response) -> Result<Value> {
        if !response.status().is_success() {
            return Err(Self::handle_error_response(response).await);
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Handle an error response.
    async fn handle_error_response(response: Response) -> LlmError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if let Ok(error) = serde_json::from_str::<OpenAiErrorResponse>(&body) {
            match status.as_u16() {
                401 => LlmError::Auth(format!("Authentication failed: {}", error.error.message)),
                429 => LlmError::RateLimit(error.error.message),
                500..=599 => LlmError::Network(format!("Server error: {}", error.error.message)),
                _ => LlmError::Backend(error.error.message),
            }
        } else {
            LlmError::Backend(format!("HTTP {}: {}", status, body))
        }
    }
}

/// Extract the `id` field every Assistants create call returns.
fn object_id(value: &Value) -> Result<String> {
    value
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| LlmError::Serialization("response is missing 'id'".to_string()))
}

#[async_trait]
impl AssistantBackend for OpenAiAssistantBackend {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String> {
        tracing::debug!(
            backend = %self.config.name,
            model = %spec.model,
            tools = spec.tools.len(),
            "Creating assistant"
        );
        let body = serde_json::to_value(spec)?;
        let created = self.post_json("/assistants", body).await?;
        object_id(&created)
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.delete(&format!("/assistants/{}", assistant_id)).await
    }

    async fn create_thread(&self) -> Result<String> {
        let created = self.post_json("/threads", json!({})).await?;
        object_id(&created)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.delete(&format!("/threads/{}", thread_id)).await
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()> {
        self.post_json(
            &format!("/threads/{}/messages", thread_id),
            json!({ "role": "user", "content": content }),
        )
        .await
        .map(|_| ())
    }

    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream> {
        tracing::debug!(backend = %self.config.name, thread_id, assistant_id, "Starting run");
        self.post_stream(
            &format!("/threads/{}/runs", thread_id),
            json!({ "assistant_id": assistant_id, "stream": true }),
        )
        .await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream> {
        self.post_stream(
            &format!("/threads/{}/runs/{}/submit_tool_outputs", thread_id, run_id),
            json!({ "tool_outputs": outputs, "stream": true }),
        )
        .await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let response = self
            .add_headers(
                self.client
                    .post(self.url(&format!("/threads/{}/runs/{}/cancel", thread_id, run_id))),
            )
            .timeout(self.config.timeout)
            .send()
            .await?;
        Self::handle_response(response).await.map(|_| ())
    }

    fn name(&self) -> &str {
        &self.config.name
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI API Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiError,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    #[serde(default)]
    required_action: Option<RequiredAction>,
    #[serde(default)]
    last_error: Option<OpenAiError>,
}

#[derive(Debug, Deserialize)]
struct RequiredAction {
    submit_tool_outputs: SubmitToolOutputs,
}

#[derive(Debug, Deserialize)]
struct SubmitToolOutputs {
    tool_calls: Vec<RunToolCall>,
}

#[derive(Debug, Deserialize)]
struct RunToolCall {
    id: String,
    function: RunFunction,
}

#[derive(Debug, Deserialize)]
struct RunFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaBody,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    content: Vec<DeltaContent>,
}

#[derive(Debug, Deserialize)]
struct DeltaContent {
    #[serde(default)]
    text: Option<DeltaText>,
}

#[derive(Debug, Deserialize)]
struct DeltaText {
    #[serde(default)]
    value: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE Streaming
// ─────────────────────────────────────────────────────────────────────────────

/// Translate one SSE frame into a run event.
///
/// Returns `Ok(None)` for events that carry nothing the caller acts on.
fn parse_assistant_event(event: &str, data: &str) -> Result<Option<RunEvent>> {
    let parsed = match event {
        "thread.run.created" => {
            let run: RunObject = serde_json::from_str(data)?;
            Some(RunEvent::RunCreated { run_id: run.id })
        }
        "thread.message.delta" => {
            let delta: MessageDelta = serde_json::from_str(data)?;
            let text: String = delta
                .delta
                .content
                .into_iter()
                .filter_map(|c| c.text.and_then(|t| t.value))
                .collect();
            (!text.is_empty()).then_some(RunEvent::TextDelta(text))
        }
        "thread.run.requires_action" => {
            let run: RunObject = serde_json::from_str(data)?;
            let tool_calls = run
                .required_action
                .map(|a| a.submit_tool_outputs.tool_calls)
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCall {
                    id: tc.id,
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect();
            Some(RunEvent::RequiresAction {
                run_id: run.id,
                tool_calls,
            })
        }
        "thread.run.completed" => Some(RunEvent::Completed),
        "thread.run.cancelled" => Some(RunEvent::Cancelled),
        "thread.run.failed" | "thread.run.expired" | "thread.run.incomplete" => {
            let run: RunObject = serde_json::from_str(data)?;
            let message = run
                .last_error
                .map(|e| e.message)
                .unwrap_or_else(|| format!("run ended with {}", event));
            Some(RunEvent::Failed { message })
        }
        "error" => {
            let message = serde_json::from_str::<OpenAiError>(data)
                .map(|e| e.message)
                .unwrap_or_else(|_| data.to_string());
            return Err(LlmError::Backend(message));
        }
        _ => None,
    };
    Ok(parsed)
}

fn parse_assistant_sse_stream(
    byte_stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
) -> RunStream {
    Box::pin(futures::stream::unfold(
        AssistantSseState {
            byte_stream: Box::pin(byte_stream),
            buffer: BytesMut::new(),
            event: None,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }

            loop {
                // Process lines in buffer
                // Only complete lines are decoded so multi-byte characters
                // split across chunks stay intact.
                while let Some(line_end) = state.buffer.iter().position(|&b| b == b'\n') {
                    let raw = state.buffer.split_to(line_end + 1);
                    let line = String::from_utf8_lossy(&raw[..line_end]).trim().to_string();

                    if line.is_empty() {
                        state.event = None;
                        continue;
                    }

                    if let Some(name) = line.strip_prefix("event:") {
                        state.event = Some(name.trim().to_string());
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        state.done = true;
                        return None;
                    }

                    let event = state.event.clone().unwrap_or_default();
                    match parse_assistant_event(&event, data) {
                        Ok(Some(parsed)) => return Some((Ok(parsed), state)),
                        Ok(None) => {}
                        Err(e) => {
                            state.done = true;
                            return Some((Err(e), state));
                        }
                    }
                }

                // Need more data
                match state.byte_stream.next().await {
                    Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(LlmError::Network(e.to_string())), state));
                    }
                    None => {
                        // Stream exhausted - state is dropped
                        return None;
                    }
                }
            }
        },
    ))
}

struct AssistantSseState {
    byte_stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: BytesMut,
    event: Option<String>,
    done: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
