//! Streaming response handler.
//!
//! A handler owns one provider run bound to one placeholder chat message. It
//! pumps generated text into that message with debounced partial updates and
//! ends in exactly one of three ways:
//!
//! ```text
//! Created ──run()──▶ Running ──┬── stream ends ────▶ Completed ──┐
//!                              ├── stop signal ────▶ Cancelled ──┼──▶ Disposed
//!                              └── stream/flush err ▶ Errored ───┘
//! ```
//!
//! All three paths converge on [`ResponseHandler::dispose`], which runs its
//! side effects once no matter how many paths reach it.

use futures::StreamExt;
use parking_lot::Mutex;
use quill_chat::{
    AiState, ChannelRef, ChatEvent, MessagePatch, SharedTransport, StopSubscription,
};
use quill_llm::{RunEvent, RunStream, SharedBackend, ToolOutput};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{AgentError, Result};
use crate::tools::{WebSearchTool, execute_tool_call};

/// Lifecycle phase of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerPhase {
    Created,
    Running,
    Completed,
    Cancelled,
    Errored,
    Disposed,
}

/// Everything a handler needs, supplied by its agent.
pub struct HandlerParts {
    pub backend: SharedBackend,
    pub transport: SharedTransport,
    pub web_search: Arc<WebSearchTool>,
    pub channel: ChannelRef,
    pub bot_user_id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub message_id: String,
    pub subscription: StopSubscription,
    pub flush_interval: Duration,
    /// How long a stop waits for the provider to report a run id it can cancel.
    pub cancel_grace: Duration,
}

struct HandlerState {
    text: String,
    chunk_counter: usize,
    run_id: Option<String>,
    last_flush: Instant,
    generating_announced: bool,
    phase: HandlerPhase,
}

enum Outcome {
    Completed,
    Stopped,
    Failed(AgentError),
}

enum Step {
    Continue,
    Replace(RunStream),
    Finish(Outcome),
}

type DisposeCallback = Box<dyn FnOnce() + Send>;

/// Drives one streamed AI response into one chat message.
pub struct ResponseHandler {
    backend: SharedBackend,
    transport: SharedTransport,
    web_search: Arc<WebSearchTool>,
    channel: ChannelRef,
    bot_user_id: String,
    thread_id: String,
    assistant_id: String,
    message_id: String,
    flush_interval: Duration,
    cancel_grace: Duration,
    state: Mutex<HandlerState>,
    disposed: AtomicBool,
    stop: CancellationToken,
    subscription: Mutex<Option<StopSubscription>>,
    on_dispose: Mutex<Option<DisposeCallback>>,
    done: CancellationToken,
}

impl ResponseHandler {
    pub fn new(parts: HandlerParts) -> Self {
        Self {
            backend: parts.backend,
            transport: parts.transport,
            web_search: parts.web_search,
            channel: parts.channel,
            bot_user_id: parts.bot_user_id,
            thread_id: parts.thread_id,
            assistant_id: parts.assistant_id,
            message_id: parts.message_id,
            flush_interval: parts.flush_interval,
            cancel_grace: parts.cancel_grace,
            state: Mutex::new(HandlerState {
                text: String::new(),
                chunk_counter: 0,
                run_id: None,
                last_flush: Instant::now(),
                generating_announced: false,
                phase: HandlerPhase::Created,
            }),
            disposed: AtomicBool::new(false),
            stop: parts.subscription.token(),
            subscription: Mutex::new(Some(parts.subscription)),
            on_dispose: Mutex::new(None),
            done: CancellationToken::new(),
        }
    }

    /// Register the owner notification, run once on dispose.
    pub fn on_dispose(&self, callback: impl FnOnce() + Send + 'static) {
        *self.on_dispose.lock() = Some(Box::new(callback));
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn phase(&self) -> HandlerPhase {
        self.state.lock().phase
    }

    pub fn text(&self) -> String {
        self.state.lock().text.clone()
    }

    pub fn chunk_count(&self) -> usize {
        self.state.lock().chunk_counter
    }

    pub fn run_id(&self) -> Option<String> {
        self.state.lock().run_id.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Request a stop, as if the user pressed "stop generating".
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Wait until the handler has disposed.
    pub async fn finished(&self) {
        self.done.cancelled().await;
    }

    /// Start the run and consume it to the end.
    pub async fn run(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase != HandlerPhase::Created {
                return;
            }
            state.phase = HandlerPhase::Running;
        }

        if self.stop.is_cancelled() {
            self.handle_stop().await;
            return;
        }

        // Not raced against the stop token: once the request is out the run
        // exists remotely and has to be cancelled by id.
        let started = self
            .backend
            .stream_run(&self.thread_id, &self.assistant_id)
            .await;

        let outcome = match started {
            Ok(stream) => self.consume(stream).await,
            Err(e) => Outcome::Failed(e.into()),
        };

        match outcome {
            Outcome::Completed => self.handle_completion().await,
            Outcome::Stopped => self.handle_stop().await,
            Outcome::Failed(err) => self.handle_error(err).await,
        }
    }

    async fn consume(&self, mut stream: RunStream) -> Outcome {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    self.await_run_id(&mut stream).await;
                    return Outcome::Stopped;
                }
                next = stream.next() => next,
            };

            let event = match next {
                None => return Outcome::Completed,
                Some(Err(e)) => return Outcome::Failed(e.into()),
                Some(Ok(event)) => event,
            };

            match self.on_event(event).await {
                Step::Continue => {}
                Step::Replace(continuation) => stream = continuation,
                Step::Finish(outcome) => return outcome,
            }
        }
    }

    /// Keep reading a stopped stream until the provider names the run, so
    /// that it can be cancelled. Gives up after `cancel_grace`.
    async fn await_run_id(&self, stream: &mut RunStream) {
        if self.is_disposed() || self.run_id().is_some() {
            return;
        }

        let found = tokio::time::timeout(self.cancel_grace, async {
            while let Some(Ok(event)) = stream.next().await {
                if let RunEvent::RunCreated { run_id } | RunEvent::RequiresAction { run_id, .. } =
                    event
                {
                    self.state.lock().run_id = Some(run_id);
                    return true;
                }
            }
            false
        })
        .await;

        if !matches!(found, Ok(true)) {
            tracing::warn!(message_id = %self.message_id, "Stopped before the run id was known");
        }
    }

    async fn on_event(&self, event: RunEvent) -> Step {
        match event {
            RunEvent::RunCreated { run_id } => {
                tracing::debug!(message_id = %self.message_id, %run_id, "Run created");
                self.state.lock().run_id = Some(run_id);
                Step::Continue
            }
            RunEvent::TextDelta(delta) => match self.on_text(delta).await {
                Ok(()) => Step::Continue,
                Err(e) => Step::Finish(Outcome::Failed(e)),
            },
            RunEvent::RequiresAction { run_id, tool_calls } => {
                self.state.lock().run_id = Some(run_id.clone());
                match self.run_tools(&run_id, tool_calls).await {
                    Ok(continuation) => Step::Replace(continuation),
                    Err(e) => Step::Finish(Outcome::Failed(e)),
                }
            }
            RunEvent::Completed | RunEvent::Cancelled => Step::Finish(Outcome::Completed),
            RunEvent::Failed { message } => Step::Finish(Outcome::Failed(
                quill_llm::LlmError::RunFailed(message).into(),
            )),
        }
    }

    async fn on_text(&self, delta: String) -> Result<()> {
        let announce = {
            let mut state = self.state.lock();
            !std::mem::replace(&mut state.generating_announced, true)
        };
        if announce {
            self.send_indicator(AiState::Generating).await?;
        }

        let flush = {
            let mut state = self.state.lock();
            state.text.push_str(&delta);
            state.chunk_counter += 1;
            if state.last_flush.elapsed() >= self.flush_interval {
                state.last_flush = Instant::now();
                Some(state.text.clone())
            } else {
                None
            }
        };

        if let Some(text) = flush {
            if self.is_disposed() {
                return Ok(());
            }
            self.transport
                .partial_update_message(
                    &self.message_id,
                    &self.bot_user_id,
                    &MessagePatch::streaming(text),
                )
                .await?;
        }
        Ok(())
    }

    async fn run_tools(
        &self,
        run_id: &str,
        tool_calls: Vec<quill_llm::ToolCall>,
    ) -> Result<RunStream> {
        self.send_indicator(AiState::ExternalSources).await?;

        let mut outputs: Vec<ToolOutput> = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            tracing::info!(
                message_id = %self.message_id,
                tool = %call.name,
                "Executing tool call"
            );
            outputs.push(execute_tool_call(&self.web_search, call).await);
        }

        Ok(self
            .backend
            .submit_tool_outputs(&self.thread_id, run_id, outputs)
            .await?)
    }

    async fn send_indicator(&self, state: AiState) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }
        let event = ChatEvent::indicator(state, &self.channel, &self.message_id);
        self.transport
            .send_event(&self.channel, &self.bot_user_id, &event)
            .await?;
        Ok(())
    }

    async fn send_clear(&self) {
        let event = ChatEvent::clear(&self.channel, &self.message_id);
        if let Err(e) = self
            .transport
            .send_event(&self.channel, &self.bot_user_id, &event)
            .await
        {
            tracing::warn!(message_id = %self.message_id, error = %e, "Failed to clear AI indicator");
        }
    }

    fn set_phase(&self, phase: HandlerPhase) {
        self.state.lock().phase = phase;
    }

    async fn handle_completion(&self) {
        if self.is_disposed() {
            return;
        }

        let (text, chunks) = {
            let state = self.state.lock();
            (state.text.clone(), state.chunk_counter)
        };

        if let Err(e) = self
            .transport
            .partial_update_message(
                &self.message_id,
                &self.bot_user_id,
                &MessagePatch::finished(text),
            )
            .await
        {
            self.handle_error(e.into()).await;
            return;
        }

        self.set_phase(HandlerPhase::Completed);
        self.send_clear().await;
        tracing::info!(message_id = %self.message_id, chunks, "Response complete");
        self.dispose();
    }

    async fn handle_stop(&self) {
        if self.is_disposed() {
            return;
        }
        tracing::info!(message_id = %self.message_id, "Stop generating");
        self.set_phase(HandlerPhase::Cancelled);

        let run_id = self.run_id();
        if let Some(run_id) = run_id {
            if let Err(e) = self.backend.cancel_run(&self.thread_id, &run_id).await {
                tracing::warn!(
                    message_id = %self.message_id,
                    %run_id,
                    error = %e,
                    "Error cancelling run"
                );
            }
        }

        self.send_clear().await;
        self.dispose();
    }

    async fn handle_error(&self, error: AgentError) {
        if self.is_disposed() {
            return;
        }
        tracing::error!(message_id = %self.message_id, error = %error, "Response failed");
        self.set_phase(HandlerPhase::Errored);

        if let Err(e) = self.send_indicator(AiState::Error).await {
            tracing::warn!(message_id = %self.message_id, error = %e, "Failed to send error indicator");
        }

        let description = error.to_string();
        if let Err(e) = self
            .transport
            .partial_update_message(
                &self.message_id,
                &self.bot_user_id,
                &MessagePatch::error(description),
            )
            .await
        {
            tracing::warn!(message_id = %self.message_id, error = %e, "Failed to write error message");
        }

        self.dispose();
    }

    /// Tear down the handler. Only the first call has any effect.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop.cancel();
        self.subscription.lock().take();
        self.set_phase(HandlerPhase::Disposed);

        let callback = self.on_dispose.lock().take();
        if let Some(callback) = callback {
            callback();
        }
        self.done.cancel();
        tracing::debug!(message_id = %self.message_id, "Handler disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_chat::{EventKind, MockTransport, StopRegistry};
    use quill_llm::{MockAssistantBackend, MockRun, ToolCall};
    use std::sync::atomic::AtomicUsize;

    use crate::tools::WebSearchConfig;

    struct Fixture {
        backend: Arc<MockAssistantBackend>,
        transport: Arc<MockTransport>,
        stops: StopRegistry,
        channel: ChannelRef,
    }

    impl Fixture {
        fn new(runs: Vec<MockRun>) -> Self {
            Self::with_backend(MockAssistantBackend::new(runs))
        }

        fn with_backend(backend: MockAssistantBackend) -> Self {
            Self {
                backend: Arc::new(backend),
                transport: Arc::new(MockTransport::new()),
                stops: StopRegistry::new(),
                channel: ChannelRef::new("messaging", "general"),
            }
        }

        fn handler(&self, message_id: &str, flush_interval: Duration) -> Arc<ResponseHandler> {
            Arc::new(ResponseHandler::new(HandlerParts {
                backend: self.backend.clone(),
                transport: self.transport.clone(),
                web_search: Arc::new(WebSearchTool::new(WebSearchConfig::new(None)).unwrap()),
                channel: self.channel.clone(),
                bot_user_id: "ai-bot-general".to_string(),
                thread_id: "thread_1".to_string(),
                assistant_id: "asst_1".to_string(),
                message_id: message_id.to_string(),
                subscription: self.stops.subscribe(message_id),
                flush_interval,
                cancel_grace: Duration::from_secs(1),
            }))
        }

        fn indicator_states(&self, message_id: &str) -> Vec<Option<AiState>> {
            self.transport
                .events_for(message_id)
                .into_iter()
                .map(|e| match e.kind {
                    EventKind::IndicatorClear => None,
                    _ => e.ai_state,
                })
                .collect()
        }
    }

    fn counting_callback(handler: &ResponseHandler) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        handler.on_dispose(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[tokio::test]
    async fn test_completion_flushes_full_text() {
        let fx = Fixture::new(vec![MockRun::streaming("run_1", &["Hel", "lo", " world"])]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));
        let disposals = counting_callback(&handler);

        handler.clone().run().await;

        assert_eq!(handler.phase(), HandlerPhase::Disposed);
        assert_eq!(handler.chunk_count(), 3);
        assert_eq!(handler.run_id().as_deref(), Some("run_1"));
        assert_eq!(
            fx.transport.patches_for("msg-1"),
            vec![MessagePatch::finished("Hello world")]
        );
        assert_eq!(
            fx.indicator_states("msg-1"),
            vec![Some(AiState::Generating), None]
        );
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(fx.stops.is_empty());
    }

    #[tokio::test]
    async fn test_debounce_limits_partial_updates() {
        let chunks: Vec<String> = (0..20).map(|i| format!("t{i} ")).collect();
        let chunk_refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
        let fx = Fixture::new(vec![MockRun::streaming("run_1", &chunk_refs)]);
        let handler = fx.handler("msg-1", Duration::from_secs(1));

        handler.clone().run().await;

        let patches = fx.transport.patches_for("msg-1");
        assert!(patches.len() < chunks.len());
        let last = patches.last().unwrap();
        assert_eq!(last.text.as_deref(), Some(chunks.concat().as_str()));
        assert_eq!(last.generating, Some(false));
    }

    #[tokio::test]
    async fn test_zero_interval_flushes_every_token() {
        let fx = Fixture::new(vec![MockRun::streaming("run_1", &["a", "b", "c"])]);
        let handler = fx.handler("msg-1", Duration::ZERO);

        handler.clone().run().await;

        let patches = fx.transport.patches_for("msg-1");
        assert_eq!(
            patches,
            vec![
                MessagePatch::streaming("a"),
                MessagePatch::streaming("ab"),
                MessagePatch::streaming("abc"),
                MessagePatch::finished("abc"),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_signal_cancels_run() {
        let fx = Fixture::new(vec![MockRun::stalled("run_1", &["partial"])]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));
        let disposals = counting_callback(&handler);

        let task = tokio::spawn(handler.clone().run());
        while handler.chunk_count() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(fx.stops.signal("msg-1"));
        task.await.unwrap();

        assert_eq!(handler.phase(), HandlerPhase::Disposed);
        assert_eq!(fx.backend.cancelled_runs(), vec!["run_1".to_string()]);
        assert_eq!(fx.indicator_states("msg-1").last(), Some(&None));
        assert!(fx.transport.patches_for("msg-1").is_empty());
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_created_still_cancels() {
        let fx = Fixture::new(vec![
            MockRun::stalled("run_1", &["partial"]).with_delay(Duration::from_millis(50)),
        ]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));

        let task = tokio::spawn(handler.clone().run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handler.run_id().is_none());
        handler.stop();
        task.await.unwrap();

        assert!(handler.is_disposed());
        assert_eq!(handler.chunk_count(), 0);
        assert_eq!(fx.backend.cancelled_runs(), vec!["run_1".to_string()]);
        assert!(fx.transport.patches_for("msg-1").is_empty());
    }

    #[tokio::test]
    async fn test_stop_without_run_id_gives_up_after_grace() {
        let fx = Fixture::new(vec![MockRun::events(vec![]).hold_open()]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));

        let task = tokio::spawn(handler.clone().run());
        handler.stop();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();

        assert!(handler.is_disposed());
        assert!(fx.backend.cancelled_runs().is_empty());
        assert_eq!(fx.indicator_states("msg-1").last(), Some(&None));
    }

    #[tokio::test]
    async fn test_stop_for_other_message_is_ignored() {
        let fx = Fixture::new(vec![
            MockRun::streaming("run_1", &["a", "b"]).with_delay(Duration::from_millis(20)),
        ]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));
        let _other = fx.stops.subscribe("msg-2");

        let task = tokio::spawn(handler.clone().run());
        assert!(fx.stops.signal("msg-2"));
        task.await.unwrap();

        assert!(fx.backend.cancelled_runs().is_empty());
        assert_eq!(
            fx.transport.patches_for("msg-1"),
            vec![MessagePatch::finished("ab")]
        );
    }

    #[tokio::test]
    async fn test_cancel_failure_still_disposes() {
        let fx = Fixture::with_backend(
            MockAssistantBackend::new(vec![MockRun::stalled("run_1", &["x"])])
                .failing_cancel(),
        );
        let handler = fx.handler("msg-1", Duration::from_secs(60));

        let task = tokio::spawn(handler.clone().run());
        while handler.chunk_count() == 0 {
            tokio::task::yield_now().await;
        }
        handler.stop();
        task.await.unwrap();

        assert!(handler.is_disposed());
        assert_eq!(fx.backend.cancelled_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_error_surfaces_in_channel() {
        let fx = Fixture::new(vec![
            MockRun::events(vec![
                RunEvent::RunCreated {
                    run_id: "run_1".to_string(),
                },
                RunEvent::TextDelta("Hel".to_string()),
            ])
            .then_error("connection reset"),
        ]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));

        handler.clone().run().await;

        let patches = fx.transport.patches_for("msg-1");
        assert_eq!(patches.len(), 1);
        assert!(patches[0].text.as_deref().unwrap().contains("connection reset"));
        assert!(fx.backend.cancelled_runs().is_empty());
        assert!(handler.is_disposed());
    }

    #[tokio::test]
    async fn test_provider_failure_writes_error() {
        let fx = Fixture::new(vec![MockRun::events(vec![
            RunEvent::RunCreated {
                run_id: "run_1".to_string(),
            },
            RunEvent::TextDelta("Hel".to_string()),
            RunEvent::Failed {
                message: "quota exhausted".to_string(),
            },
        ])]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));
        let disposals = counting_callback(&handler);

        handler.clone().run().await;

        let patches = fx.transport.patches_for("msg-1");
        assert_eq!(patches.len(), 1);
        let text = patches[0].text.clone().unwrap();
        assert!(text.contains("quota exhausted"));
        assert_eq!(patches[0].message.as_deref(), Some(text.as_str()));
        assert_eq!(
            fx.indicator_states("msg-1"),
            vec![Some(AiState::Generating), Some(AiState::Error)]
        );
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_is_an_error() {
        let fx = Fixture::new(vec![]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));

        handler.clone().run().await;

        assert_eq!(
            fx.indicator_states("msg-1"),
            vec![Some(AiState::Error)]
        );
        assert!(handler.is_disposed());
    }

    #[tokio::test]
    async fn test_flush_failure_is_an_error() {
        let fx = Fixture::new(vec![MockRun::streaming("run_1", &["a"])]);
        fx.transport.fail_updates(true);
        let handler = fx.handler("msg-1", Duration::ZERO);
        let disposals = counting_callback(&handler);

        handler.clone().run().await;

        assert_eq!(
            fx.indicator_states("msg-1"),
            vec![Some(AiState::Generating), Some(AiState::Error)]
        );
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let fx = Fixture::new(vec![
            MockRun::events(vec![
                RunEvent::RunCreated {
                    run_id: "run_1".to_string(),
                },
                RunEvent::RequiresAction {
                    run_id: "run_1".to_string(),
                    tool_calls: vec![
                        ToolCall {
                            id: "call_1".to_string(),
                            name: "web_search".to_string(),
                            arguments: r#"{"query":"rust 2024"}"#.to_string(),
                        },
                        ToolCall {
                            id: "call_2".to_string(),
                            name: "calculator".to_string(),
                            arguments: "{}".to_string(),
                        },
                    ],
                },
            ]),
            MockRun::events(vec![
                RunEvent::TextDelta("Search is offline.".to_string()),
                RunEvent::Completed,
            ]),
        ]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));

        handler.clone().run().await;

        let outputs = fx.backend.tool_outputs();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].output.contains("TAVILY_API_KEY"));
        assert!(outputs[1].output.contains("Unknown tool: calculator"));
        assert_eq!(
            fx.indicator_states("msg-1"),
            vec![
                Some(AiState::ExternalSources),
                Some(AiState::Generating),
                None
            ]
        );
        assert_eq!(
            fx.transport.patches_for("msg-1"),
            vec![MessagePatch::finished("Search is offline.")]
        );
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let fx = Fixture::new(vec![]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));
        let disposals = counting_callback(&handler);

        handler.dispose();
        handler.dispose();
        handler.dispose();

        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(fx.stops.is_empty());
        handler.finished().await;
    }

    #[tokio::test]
    async fn test_overlapping_triggers_dispose_once() {
        let fx = Fixture::new(vec![
            MockRun::streaming("run_1", &["a", "b"]).with_delay(Duration::from_millis(5)),
        ]);
        let handler = fx.handler("msg-1", Duration::from_secs(60));
        let disposals = counting_callback(&handler);

        let task = tokio::spawn(handler.clone().run());
        let stopper = {
            let stops = fx.stops.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(8)).await;
                stops.signal("msg-1");
            })
        };
        let disposer = {
            let handler = handler.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(8)).await;
                handler.dispose();
            })
        };

        task.await.unwrap();
        stopper.await.unwrap();
        disposer.await.unwrap();

        assert_eq!(disposals.load(Ordering::SeqCst), 1);
        assert!(handler.is_disposed());
    }

    #[tokio::test]
    async fn test_no_side_effects_after_dispose() {
        let fx = Fixture::new(vec![MockRun::streaming("run_1", &["a"])]);
        let handler = fx.handler("msg-1", Duration::ZERO);
        handler.dispose();

        handler.clone().run().await;

        assert!(fx.transport.patches_for("msg-1").is_empty());
    }
}
