//! HTTP API server for Quill.
//!
//! This crate exposes agent lifecycle management to the chat frontend and
//! receives chat platform webhooks.
//!
//! # Features
//!
//! - Start, stop and query channel agents
//! - Short-lived user tokens for chat clients
//! - Signed webhook ingestion (`message.new`, `ai_indicator.stop`)
//! - Background disposal of idle agents
//! - Request tracing with status and latency
//!
//! # Example
//!
//! ```ignore
//! use quill_server::{Server, ServerConfig, SessionRegistry};
//!
//! let registry = Arc::new(SessionRegistry::new(transport, factory));
//! let config = ServerConfig::new(api_key, api_secret)
//!     .with_bind_address("127.0.0.1:3000".parse()?);
//!
//! Server::new(registry, events, config).run().await?;
//! ```

pub mod config;
pub mod error;
pub mod reaper;
pub mod registry;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ErrorResponse, Result, ServerError};
pub use reaper::spawn_reaper;
pub use registry::{AgentStatus, RegistryError, SessionRegistry};
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use quill_chat::EventHub;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, info};

/// The Quill HTTP server.
pub struct Server {
    /// Application state.
    state: AppState,
}

impl Server {
    /// Create a new server over the given registry and event hub.
    pub fn new(registry: Arc<SessionRegistry>, events: EventHub, config: ServerConfig) -> Self {
        Self {
            state: AppState::new(registry, events, config),
        }
    }

    /// Create a server from a pre-built application state.
    pub fn from_state(state: AppState) -> Self {
        Self { state }
    }

    /// Build the router with all routes and middleware.
    ///
    /// With request logging enabled every request gets an INFO span and a
    /// completion event carrying status and latency; otherwise tracing stays
    /// at the `tower_http` defaults (DEBUG).
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/", get(routes::root_handler))
            .merge(routes::health_routes())
            .route("/start-ai-agent", post(routes::start_agent_handler))
            .route("/stop-ai-agent", post(routes::stop_agent_handler))
            .route("/agent-status", get(routes::agent_status_handler))
            .route("/token", post(routes::token_handler))
            .route("/webhook", post(routes::webhook_handler))
            .layer(self.cors_layer());

        let router = if self.state.config.request_logging {
            router.layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(LatencyUnit::Millis),
                    )
                    .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
            )
        } else {
            router.layer(TraceLayer::new_for_http())
        };

        router.with_state(self.state.clone())
    }

    fn cors_layer(&self) -> CorsLayer {
        let origins = &self.state.config.cors_origins;
        if origins.is_empty() {
            return CorsLayer::permissive();
        }

        let allowed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(%origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(allowed)
            .allow_methods(Any)
            .allow_headers(Any)
    }

    /// Run the server until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server until `shutdown` resolves.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.state.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Internal(format!("Failed to bind: {}", e)))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener (useful for testing).
    ///
    /// The idle-agent reaper runs for the lifetime of the server. Once
    /// `shutdown` resolves, in-flight requests drain, the reaper stops and
    /// every registered agent is disposed.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(format!("Failed to read local address: {}", e)))?;

        let config = &self.state.config;
        let reaper_cancel = CancellationToken::new();
        let reaper = spawn_reaper(
            self.state.registry.clone(),
            config.reaper_interval,
            config.inactivity_timeout,
            reaper_cancel.clone(),
        );

        info!("Starting server on {}", addr);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(format!("Server error: {}", e)));

        reaper_cancel.cancel();
        if let Err(e) = reaper.await {
            tracing::warn!(error = %e, "Reaper task failed");
        }

        let disposed = self.state.registry.dispose_all().await;
        info!(disposed, "Server stopped");

        served
    }

    /// Get the configured bind address.
    pub fn bind_address(&self) -> SocketAddr {
        self.state.config.bind_address
    }
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{TestFactory, registry_with};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use quill_chat::{EventKind, UserClaims, sign_payload};
    use std::sync::atomic::Ordering;
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn test_server(factory: TestFactory) -> (Server, Arc<TestFactory>) {
        let (registry, factory, _) = registry_with(factory);
        let config = ServerConfig::new("test-key", SECRET).with_request_logging(false);
        (Server::new(registry, EventHub::default(), config), factory)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_key_and_agent_count() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();

        let (status, body) = send(&app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "AI Writing Assistant Server is running...");
        assert_eq!(body["apikey"], "test-key");
        assert_eq!(body["activeAgents"], 0);
    }

    #[tokio::test]
    async fn test_start_status_stop_flow() {
        let (server, factory) = test_server(TestFactory::default());
        let app = server.router();

        let (status, body) = send(
            &app,
            post_json("/start-ai-agent", serde_json::json!({"channel_id": "general"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"message": "AI Agent Started", "data": []}));
        let built = factory.built.lock().clone();
        assert_eq!(built.len(), 1);
        assert_eq!(quill_agent::AiAgent::channel(&*built[0]).channel_type, "messaging");

        let (_, body) = send(&app, get("/agent-status?channel_id=general")).await;
        assert_eq!(body["status"], "connected");

        let (status, body) = send(
            &app,
            post_json("/stop-ai-agent", serde_json::json!({"channel_id": "general"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "AI Agent Stopped");
        assert_eq!(factory.counters.disposes.load(Ordering::SeqCst), 1);

        let (_, body) = send(&app, get("/agent-status?channel_id=general")).await;
        assert_eq!(body["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_start_requires_channel_id() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();

        for body in [
            serde_json::json!({}),
            serde_json::json!({"channel_id": ""}),
            serde_json::json!({"channel_type": "messaging"}),
        ] {
            let (status, body) = send(&app, post_json("/start-ai-agent", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, serde_json::json!({"error": "Missing required fields"}));
        }

        let malformed = Request::builder()
            .method("POST")
            .uri("/start-ai-agent")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _) = send(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_failure_reports_reason() {
        let (server, _) = test_server(TestFactory {
            fail_init: true,
            ..Default::default()
        });
        let app = server.router();

        let (status, body) = send(
            &app,
            post_json("/start-ai-agent", serde_json::json!({"channel_id": "general"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to start AI Agent");
        assert!(body["reason"].as_str().unwrap().contains("init failed"));

        let (_, body) = send(&app, get("/agent-status?channel_id=general")).await;
        assert_eq!(body["status"], "disconnected");
    }

    #[tokio::test]
    async fn test_stop_without_agent_succeeds() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();

        let (status, _) = send(
            &app,
            post_json("/stop-ai-agent", serde_json::json!({"channel_id": "nobody"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(&app, post_json("/stop-ai-agent", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_status_requires_channel_id() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();

        let (status, body) = send(&app, get("/agent-status")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing channel_id");
    }

    #[tokio::test]
    async fn test_token_issues_hour_long_jwt() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();

        let (status, body) =
            send(&app, post_json("/token", serde_json::json!({"userId": "alice"}))).await;
        assert_eq!(status, StatusCode::OK);

        let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.required_spec_claims.clear();
        let claims = jsonwebtoken::decode::<UserClaims>(
            body["token"].as_str().unwrap(),
            &jsonwebtoken::DecodingKey::from_secret(SECRET.as_bytes()),
            &validation,
        )
        .unwrap()
        .claims;
        assert_eq!(claims.user_id, "alice");
        assert_eq!(claims.exp - claims.iat, 3600);

        let (status, body) = send(&app, post_json("/token", serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "userId is required");
    }

    fn webhook(payload: &str, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-signature", signature);
        }
        builder.body(Body::from(payload.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();
        let payload = r#"{"type":"ai_indicator.stop","message_id":"m1"}"#;

        let (status, _) = send(&app, webhook(payload, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, webhook(payload, Some("deadbeef"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid signature");
    }

    #[tokio::test]
    async fn test_webhook_stop_signals_subscription() {
        let (server, _) = test_server(TestFactory::default());
        let events = server.state.events.clone();
        let app = server.router();
        let subscription = events.stops().subscribe("m1");

        let payload = format!(r#"{{"type":"{}","message_id":"m1"}}"#, EventKind::IndicatorStop.as_str());
        let signature = sign_payload(payload.as_bytes(), SECRET).unwrap();

        let (status, body) = send(&app, webhook(&payload, Some(&signature))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({}));
        assert!(subscription.is_cancelled());
    }

    #[tokio::test]
    async fn test_webhook_malformed_body() {
        let (server, _) = test_server(TestFactory::default());
        let app = server.router();
        let payload = "not json";
        let signature = sign_payload(payload.as_bytes(), SECRET).unwrap();

        let (status, _) = send(&app, webhook(payload, Some(&signature))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_verification_can_be_disabled() {
        let (registry, _, _) = registry_with(TestFactory::default());
        let config = ServerConfig::new("k", SECRET).with_webhook_verification(false);
        let app = Server::new(registry, EventHub::default(), config).router();

        let (status, _) = send(&app, webhook(r#"{"type":"health.check"}"#, None)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
