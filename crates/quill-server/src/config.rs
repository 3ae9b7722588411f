//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default port, matching the frontend's expectations.
pub const DEFAULT_PORT: u16 = 3000;

/// Default period between inactivity sweeps (5 seconds).
pub const DEFAULT_REAPER_INTERVAL: Duration = Duration::from_secs(5);

/// Default idle time after which an agent is disposed (8 hours).
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(8 * 60 * 60);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Public chat API key, reported by `GET /`.
    pub api_key: String,

    /// Chat API secret. Signs user tokens and verifies webhooks.
    pub api_secret: String,

    /// Reject webhooks without a valid `X-Signature`.
    pub verify_webhooks: bool,

    /// Enable request logging.
    pub request_logging: bool,

    /// CORS allowed origins (empty = any origin).
    pub cors_origins: Vec<String>,

    /// Period between inactivity sweeps.
    pub reaper_interval: Duration,

    /// Idle time after which an agent is disposed.
    pub inactivity_timeout: Duration,
}

impl ServerConfig {
    /// Create a config for the given chat credentials.
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            verify_webhooks: true,
            request_logging: true,
            cors_origins: Vec::new(),
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
        }
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    /// Enable or disable webhook signature verification.
    pub fn with_webhook_verification(mut self, enabled: bool) -> Self {
        self.verify_webhooks = enabled;
        self
    }

    /// Enable or disable request logging.
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    /// Set CORS allowed origins.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    /// Set the period between inactivity sweeps.
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    /// Set the idle time after which agents are disposed.
    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }
}
