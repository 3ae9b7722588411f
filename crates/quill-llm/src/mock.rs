//! Scripted assistant backend for tests.
//!
//! Runs are queued up front and handed out in order by `stream_run` and
//! `submit_tool_outputs`. Every provider-side resource is counted so tests
//! can assert that creates and deletes balance.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::backend::{AssistantBackend, AssistantSpec, RunEvent, RunStream, ToolOutput};
use crate::error::{LlmError, Result};

#[derive(Debug, Clone)]
enum MockStep {
    Event(RunEvent),
    Error(String),
}

/// A scripted run.
#[derive(Debug, Clone, Default)]
pub struct MockRun {
    steps: Vec<MockStep>,
    delay: Duration,
    hold_open: bool,
}

impl MockRun {
    /// A run that creates `run_id`, streams `chunks` and completes.
    pub fn streaming(run_id: &str, chunks: &[&str]) -> Self {
        let mut events = vec![RunEvent::RunCreated {
            run_id: run_id.to_string(),
        }];
        events.extend(chunks.iter().map(|c| RunEvent::TextDelta(c.to_string())));
        events.push(RunEvent::Completed);
        Self::events(events)
    }

    /// A run that creates `run_id`, streams `chunks` and then stays open
    /// until the consumer gives up on it.
    pub fn stalled(run_id: &str, chunks: &[&str]) -> Self {
        let mut run = Self::streaming(run_id, chunks);
        run.steps.pop();
        run.hold_open()
    }

    /// A run that emits exactly `events`.
    pub fn events(events: Vec<RunEvent>) -> Self {
        Self {
            steps: events.into_iter().map(MockStep::Event).collect(),
            ..Default::default()
        }
    }

    /// Append a stream error after the scripted events.
    pub fn then_error(mut self, message: impl Into<String>) -> Self {
        self.steps.push(MockStep::Error(message.into()));
        self
    }

    /// Sleep this long before every event.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Keep the stream pending forever after the scripted events.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    fn into_stream(self) -> RunStream {
        let delay = self.delay;
        let scripted = futures::stream::iter(self.steps).then(move |step| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match step {
                MockStep::Event(event) => Ok(event),
                MockStep::Error(message) => Err(LlmError::Backend(message)),
            }
        });

        if self.hold_open {
            Box::pin(scripted.chain(futures::stream::pending()))
        } else {
            Box::pin(scripted)
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    runs: VecDeque<MockRun>,
    assistants: Vec<AssistantSpec>,
    assistants_deleted: usize,
    threads_created: usize,
    threads_deleted: usize,
    user_messages: Vec<(String, String)>,
    cancelled_runs: Vec<String>,
    tool_outputs: Vec<ToolOutput>,
}

/// A mock assistant backend for testing purposes.
#[derive(Debug, Default)]
pub struct MockAssistantBackend {
    state: Mutex<MockState>,
    fail_create_assistant: Option<String>,
    fail_cancel: bool,
    create_delay: Duration,
}

impl MockAssistantBackend {
    /// Create a backend that will serve `runs` in order.
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            state: Mutex::new(MockState {
                runs: runs.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Make `create_assistant` fail with a backend error.
    pub fn failing_create(mut self, message: impl Into<String>) -> Self {
        self.fail_create_assistant = Some(message.into());
        self
    }

    /// Make `cancel_run` fail (it is still recorded).
    pub fn failing_cancel(mut self) -> Self {
        self.fail_cancel = true;
        self
    }

    /// Sleep inside `create_assistant`, widening race windows in tests.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Queue another run.
    pub fn push_run(&self, run: MockRun) {
        self.state.lock().runs.push_back(run);
    }

    /// Specs of every assistant created so far.
    pub fn assistants(&self) -> Vec<AssistantSpec> {
        self.state.lock().assistants.clone()
    }

    /// Assistants created minus assistants deleted.
    pub fn live_assistants(&self) -> usize {
        let state = self.state.lock();
        state.assistants.len() - state.assistants_deleted
    }

    /// Threads created minus threads deleted.
    pub fn live_threads(&self) -> usize {
        let state = self.state.lock();
        state.threads_created - state.threads_deleted
    }

    /// `(thread_id, content)` of every user message appended.
    pub fn user_messages(&self) -> Vec<(String, String)> {
        self.state.lock().user_messages.clone()
    }

    /// Run ids passed to `cancel_run`.
    pub fn cancelled_runs(&self) -> Vec<String> {
        self.state.lock().cancelled_runs.clone()
    }

    /// Every tool output submitted.
    pub fn tool_outputs(&self) -> Vec<ToolOutput> {
        self.state.lock().tool_outputs.clone()
    }

    fn next_run(&self) -> Result<RunStream> {
        self.state
            .lock()
            .runs
            .pop_front()
            .map(MockRun::into_stream)
            .ok_or_else(|| LlmError::Backend("MockAssistantBackend: no more runs".to_string()))
    }
}

#[async_trait]
impl AssistantBackend for MockAssistantBackend {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<String> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if let Some(ref message) = self.fail_create_assistant {
            return Err(LlmError::Backend(message.clone()));
        }
        let mut state = self.state.lock();
        state.assistants.push(spec.clone());
        Ok(format!("asst_{}", state.assistants.len()))
    }

    async fn delete_assistant(&self, _assistant_id: &str) -> Result<()> {
        self.state.lock().assistants_deleted += 1;
        Ok(())
    }

    async fn create_thread(&self) -> Result<String> {
        let mut state = self.state.lock();
        state.threads_created += 1;
        Ok(format!("thread_{}", uuid::Uuid::new_v4().simple()))
    }

    async fn delete_thread(&self, _thread_id: &str) -> Result<()> {
        self.state.lock().threads_deleted += 1;
        Ok(())
    }

    async fn add_user_message(&self, thread_id: &str, content: &str) -> Result<()> {
        self.state
            .lock()
            .user_messages
            .push((thread_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn stream_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<RunStream> {
        self.next_run()
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        _run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<RunStream> {
        self.state.lock().tool_outputs.extend(outputs);
        self.next_run()
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<()> {
        self.state.lock().cancelled_runs.push(run_id.to_string());
        if self.fail_cancel {
            return Err(LlmError::Backend("run is not cancellable".to_string()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streaming_run_events() {
        let backend = MockAssistantBackend::new(vec![MockRun::streaming("run_1", &["a", "b"])]);
        let stream = backend.stream_run("t", "a").await.unwrap();
        let events: Vec<RunEvent> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0],
            RunEvent::RunCreated {
                run_id: "run_1".to_string()
            }
        );
        assert_eq!(events[3], RunEvent::Completed);
    }

    #[tokio::test]
    async fn test_stalled_run_stays_open() {
        let backend = MockAssistantBackend::new(vec![MockRun::stalled("run_1", &["a"])]);
        let mut stream = backend.stream_run("t", "a").await.unwrap();
        assert!(stream.next().await.is_some());
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            RunEvent::TextDelta("a".to_string())
        );
        let pending =
            tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_exhausted_runs_error() {
        let backend = MockAssistantBackend::new(vec![]);
        assert!(backend.stream_run("t", "a").await.is_err());
    }

    #[tokio::test]
    async fn test_resource_accounting() {
        let backend = MockAssistantBackend::new(vec![]);
        let spec = AssistantSpec::new("n", "i", "m");
        let id = backend.create_assistant(&spec).await.unwrap();
        let thread = backend.create_thread().await.unwrap();
        assert_eq!(backend.live_assistants(), 1);
        assert_eq!(backend.live_threads(), 1);

        backend.delete_thread(&thread).await.unwrap();
        backend.delete_assistant(&id).await.unwrap();
        assert_eq!(backend.live_assistants(), 0);
        assert_eq!(backend.live_threads(), 0);
    }

    #[tokio::test]
    async fn test_failing_cancel_is_recorded() {
        let backend = MockAssistantBackend::new(vec![]).failing_cancel();
        assert!(backend.cancel_run("t", "run_1").await.is_err());
        assert_eq!(backend.cancelled_runs(), vec!["run_1".to_string()]);
    }
}
