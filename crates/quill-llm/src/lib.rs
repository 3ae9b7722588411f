//! AI provider abstraction for Quill.
//!
//! This crate provides a unified interface over assistant-style AI providers:
//! a persistent assistant, a conversation thread, and cancellable *runs* whose
//! output is delivered as a stream of events.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  AssistantBackend trait                      │
//! │  - create_assistant() / create_thread()      │
//! │  - stream_run() -> Stream<RunEvent>          │
//! │  - submit_tool_outputs() -> Stream<RunEvent> │
//! │  - cancel_run()                              │
//! └──────────────────────────────────────────────┘
//!                     │
//!          ┌──────────┴──────────┐
//!          ▼                     ▼
//!   ┌─────────────┐       ┌─────────────┐
//!   │   OpenAI    │       │    Mock     │
//!   │ Assistants  │       │  (testing)  │
//!   └─────────────┘       └─────────────┘
//! ```

pub mod backend;
pub mod error;
pub mod openai;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use backend::{
    AssistantBackend, AssistantSpec, RunEvent, RunStream, SharedBackend, ToolCall, ToolOutput,
    with_retry,
};
pub use error::{LlmError, Result};
pub use openai::{OpenAiAssistantBackend, OpenAiConfig};

#[cfg(any(test, feature = "testing"))]
pub use mock::{MockAssistantBackend, MockRun};
