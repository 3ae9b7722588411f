//! Web search tool backed by the Tavily search API.
//!
//! The model calls `web_search` mid-run; whatever happens, the tool returns a
//! JSON string for the run to consume. Failures come back as an object with an
//! `error` field instead of failing the run.

use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use crate::error::{AgentError, Result};

/// Name the model uses to call the tool.
pub const WEB_SEARCH: &str = "web_search";

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// Configuration for web search.
#[derive(Debug, Clone)]
pub struct WebSearchConfig {
    /// Tavily API key. Search is unavailable without one.
    pub api_key: Option<String>,
    /// Search endpoint.
    pub endpoint: String,
    /// Maximum number of results to return.
    pub max_results: usize,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: TAVILY_ENDPOINT.to_string(),
            max_results: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

impl WebSearchConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            ..Default::default()
        }
    }

    /// Read `TAVILY_API_KEY` from the environment.
    pub fn from_env() -> Self {
        Self::new(std::env::var("TAVILY_API_KEY").ok())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Tool for searching the web.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    client: Client,
    config: WebSearchConfig,
}

impl WebSearchTool {
    pub fn new(config: WebSearchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AgentError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Function-tool definition registered with the assistant.
    pub fn definition() -> Value {
        json!({
            "type": "function",
            "function": {
                "name": WEB_SEARCH,
                "description": "Search the web for current information, news, facts, or research on any topic.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query to find information about"
                        }
                    },
                    "required": ["query"]
                }
            }
        })
    }

    /// Run a search and return the JSON result (or JSON error) as a string.
    pub async fn search(&self, query: &str) -> String {
        let Some(ref api_key) = self.config.api_key else {
            return json!({
                "error": "Web Search is not available, TAVILY_API_KEY is not configured."
            })
            .to_string();
        };

        tracing::info!(%query, "Performing web search");

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "query": query,
                "search_depth": "advanced",
                "max_results": self.config.max_results,
                "include_answer": true,
                "include_raw_content": false
            }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(%query, error = %e, "Web search request failed");
                return exception_payload();
            }
        };

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            tracing::warn!(%query, status = status.as_u16(), %details, "Web search failed");
            return json!({
                "error": format!("Search Failed With Status: {}", status.as_u16()),
                "details": details
            })
            .to_string();
        }

        match response.json::<Value>().await {
            Ok(data) => {
                tracing::info!(%query, "Web search successful");
                data.to_string()
            }
            Err(e) => {
                tracing::error!(%query, error = %e, "Web search returned an unreadable body");
                exception_payload()
            }
        }
    }
}

fn exception_payload() -> String {
    json!({ "error": "An Exception Occured During Web Search" }).to_string()
}
