//! Common test utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use quill_agent::{AgentConfig, AgentContext, OpenAiAgentFactory, WebSearchConfig, WebSearchTool};
use quill_chat::{EventHub, MockTransport, sign_payload};
use quill_llm::{MockAssistantBackend, MockRun};
use quill_server::{Server, ServerConfig, SessionRegistry};

pub const API_KEY: &str = "test-key";
pub const API_SECRET: &str = "test-secret";

/// A server running in the background over mock chat and model backends.
pub struct TestServer {
    /// The server's address.
    pub addr: SocketAddr,
    /// HTTP client configured for this server.
    pub client: Client,
    pub backend: Arc<MockAssistantBackend>,
    pub transport: Arc<MockTransport>,
    pub registry: Arc<SessionRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a new test server with default configuration.
    pub async fn start() -> Result<Self> {
        Self::start_with_runs(vec![MockRun::streaming("run_1", &["Test ", "response"])]).await
    }

    /// Start a new test server whose model replies with the given runs.
    pub async fn start_with_runs(runs: Vec<MockRun>) -> Result<Self> {
        let backend = Arc::new(MockAssistantBackend::new(runs));
        let transport = Arc::new(MockTransport::new());
        let events = EventHub::default();

        let ctx = AgentContext {
            backend: backend.clone(),
            transport: transport.clone(),
            events: events.clone(),
            web_search: Arc::new(WebSearchTool::new(WebSearchConfig::new(None))?),
            config: AgentConfig::default().with_flush_interval(Duration::from_millis(10)),
        };
        let factory = Arc::new(OpenAiAgentFactory::new(ctx));
        let registry = Arc::new(SessionRegistry::new(transport.clone(), factory));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let config = ServerConfig::new(API_KEY, API_SECRET)
            .with_bind_address(addr)
            .with_request_logging(false);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = Server::new(registry.clone(), events, config);
        let handle = tokio::spawn(async move {
            let _ = server
                .serve(listener, async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        let client = Client::new();
        wait_for_server(&client, addr).await?;

        Ok(Self {
            addr,
            client,
            backend,
            transport,
            registry,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL for the server.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base_url(), path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{}", self.base_url(), path))
    }

    /// POST a webhook payload signed with the server's secret.
    pub async fn webhook(&self, payload: &serde_json::Value) -> Result<reqwest::Response> {
        let body = payload.to_string();
        let signature = sign_payload(body.as_bytes(), API_SECRET)?;
        Ok(self
            .post("/webhook")
            .header("content-type", "application/json")
            .header("x-signature", signature)
            .body(body)
            .send()
            .await?)
    }

    /// Check if server is healthy.
    pub async fn health(&self) -> Result<bool> {
        let resp = self.get("/health").send().await?;
        Ok(resp.status().is_success())
    }

    /// Trigger graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            timeout(Duration::from_secs(5), handle).await??;
        }
        Ok(())
    }
}

/// Poll `check` until it holds or a few seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Wait for the server to become ready.
async fn wait_for_server(client: &Client, addr: SocketAddr) -> Result<()> {
    let url = format!("http://{}/health", addr);

    let result = timeout(Duration::from_secs(5), async {
        loop {
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => return,
                _ => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    })
    .await;

    match result {
        Ok(()) => Ok(()),
        Err(_) => anyhow::bail!("Timeout waiting for server to start"),
    }
}
