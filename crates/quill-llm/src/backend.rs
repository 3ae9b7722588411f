//! Assistant backend trait and shared types.
//!
//! This module defines the abstraction layer over assistant-style AI
//! providers: an assistant holds the instructions and tools, a thread holds
//! the conversation, and a run generates one streamed response.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, is_retryable};

// ─────────────────────────────────────────────────────────────────────────────
// Shared Retry Logic
// ─────────────────────────────────────────────────────────────────────────────

/// Execute an async operation with exponential backoff retry.
///
/// Retries only on transient errors (network failures, rate limits).
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(
    max_retries: u32,
    initial_backoff: Duration,
    backend_name: &str,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut backoff = initial_backoff;
    let mut attempt = 0;

    loop {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_retryable(&e) || attempt >= max_retries => return Err(e),
            Err(e) => {
                attempt += 1;
                tracing::warn!(
                    backend = backend_name,
                    attempt,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Run Streaming Types
// ─────────────────────────────────────────────────────────────────────────────

/// A streaming run from an assistant backend.
pub type RunStream = Pin<Box<dyn Stream<Item = Result<RunEvent>> + Send + 'static>>;

/// Events emitted while a run is generating.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The provider accepted the run and assigned it an id.
    RunCreated { run_id: String },
    /// Generated text.
    TextDelta(String),
    /// The run is paused waiting for tool outputs.
    RequiresAction {
        run_id: String,
        tool_calls: Vec<ToolCall>,
    },
    /// The run finished normally.
    Completed,
    /// The run was cancelled on the provider side.
    Cancelled,
    /// The run failed on the provider side.
    Failed { message: String },
}

impl RunEvent {
    /// Returns true if no further events follow this one for the run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::Completed | RunEvent::Cancelled | RunEvent::Failed { .. }
        )
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned id used to route the output back.
    pub id: String,
    /// Name of the function to call.
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

/// The output of one tool call, submitted back to the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl ToolOutput {
    pub fn new(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
        }
    }
}

/// Parameters used to create an assistant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantSpec {
    /// Display name.
    pub name: String,
    /// System instructions.
    pub instructions: String,
    /// Model to run.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Tool definitions in the provider's function-tool format.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
}

impl AssistantSpec {
    /// Create a spec with no tools.
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            model: model.into(),
            temperature: 0.7,
            tools: Vec::new(),
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Add a tool definition.
    pub fn with_tool(mut self, tool: serde_json::Value) -> Self {
        self.tools.push(tool);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assistant Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for assistant-style AI providers.
///
/// Implementations own the HTTP plumbing; callers only see ids and
/// [`RunEvent`] streams. Every create operation has a matching delete so
/// callers can release provider resources on every exit path.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Create an assistant and return its id.
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String>;

    /// Delete an assistant.
    async fn delete_assistant(&self, assistant_id: &str) -> Result<()>;

    /// Create an empty conversation thread and return its id.
    async fn create_thread(&self) -> Result<String>;

    /// Delete a conversation thread.
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    /// Append a user message to a thread.
    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()>;

    /// Start a run on the thread and stream its events.
    async fn stream_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunStream>;

    /// Submit tool outputs for a paused run and stream the continuation.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream>;

    /// Ask the provider to cancel a run.
    ///
    /// Cancellation is best-effort: the provider may still emit a few events.
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()>;

    /// Get the name of this backend.
    fn name(&self) -> &str;
}

/// A backend that can be shared across tasks.
pub type SharedBackend = Arc<dyn AssistantBackend>;

impl From<ToolCall> for ToolOutput {
    /// Placeholder output used when a tool call could not be dispatched.
    fn from(call: ToolCall) -> Self {
        let output = serde_json::json!({
            "error": format!("Unknown tool: {}", call.name),
        });
        ToolOutput::new(call.id, output.to_string())
    }
}
