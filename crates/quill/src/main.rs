//! Quill - AI writing assistant agents for chat channels.
//!
//! Main entry point for the Quill server.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use quill_agent::{AgentConfig, AgentContext, AgentPlatform, OpenAiAgentFactory, WebSearchConfig, WebSearchTool};
use quill_chat::{EventHub, StreamChatClient, StreamChatConfig};
use quill_llm::{OpenAiAssistantBackend, OpenAiConfig};
use quill_server::{Server, ServerConfig, SessionRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Quill - AI writing assistant agents for chat channels
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Chat platform API key
    #[arg(long, env = "STREAM_API_KEY", hide_env_values = true)]
    pub stream_api_key: String,

    /// Chat platform API secret
    #[arg(long, env = "STREAM_API_SECRET", hide_env_values = true)]
    pub stream_api_secret: String,

    /// Chat platform REST endpoint
    #[arg(long, env = "STREAM_BASE_URL")]
    pub stream_base_url: Option<String>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    /// OpenAI API endpoint
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Model used by new assistants
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o")]
    pub model: String,

    /// Agent flavour: `openai` or `writing_assistant`
    #[arg(long, env = "QUILL_AGENT_PLATFORM", default_value = "openai")]
    pub platform: AgentPlatform,

    /// Tavily API key; web search is disabled without it
    #[arg(long, env = "TAVILY_API_KEY", hide_env_values = true)]
    pub tavily_api_key: Option<String>,

    /// Interface to listen on
    #[arg(long, env = "QUILL_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = quill_server::config::DEFAULT_PORT)]
    pub port: u16,

    /// Seconds between idle-agent sweeps
    #[arg(
        long,
        env = "QUILL_REAPER_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub reaper_interval_secs: u64,

    /// Seconds without interaction before an agent is disposed
    #[arg(long, env = "QUILL_INACTIVITY_TIMEOUT_SECS", default_value_t = 28_800)]
    pub inactivity_timeout_secs: u64,

    /// Minimum milliseconds between streamed message updates
    #[arg(long, env = "QUILL_FLUSH_INTERVAL_MS", default_value_t = 1000)]
    pub flush_interval_ms: u64,

    /// Allowed CORS origins (comma-separated, empty = any)
    #[arg(long, env = "QUILL_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Accept webhooks without checking their signature
    #[arg(long, env = "QUILL_INSECURE_WEBHOOKS")]
    pub insecure_webhooks: bool,

    /// Directory for rotating JSON logs
    #[arg(long, env = "QUILL_LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig::new(&self.stream_api_key, &self.stream_api_secret)
            .with_bind_address(SocketAddr::new(self.host, self.port))
            .with_cors_origins(self.cors_origins.clone())
            .with_webhook_verification(!self.insecure_webhooks)
            .with_reaper_interval(Duration::from_secs(self.reaper_interval_secs))
            .with_inactivity_timeout(Duration::from_secs(self.inactivity_timeout_secs))
    }

    fn agent_config(&self) -> AgentConfig {
        AgentConfig::default()
            .with_platform(self.platform)
            .with_model(&self.model)
            .with_flush_interval(Duration::from_millis(self.flush_interval_ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; variables may come from the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        "quill=debug,quill_server=debug,quill_agent=debug,quill_llm=debug,quill_chat=debug,info"
    } else {
        "quill=info,quill_server=info,quill_agent=info,quill_llm=info,quill_chat=info,warn"
    };

    let file_appender = tracing_appender::rolling::daily(&cli.log_dir, "quill.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(tracing_subscriber::EnvFilter::new(
                    "quill=trace,quill_server=trace,quill_agent=trace,quill_llm=trace,quill_chat=trace,info",
                )),
        )
        .init();

    let mut chat_config = StreamChatConfig::new(&cli.stream_api_key, &cli.stream_api_secret);
    if let Some(ref url) = cli.stream_base_url {
        chat_config = chat_config.with_base_url(url);
    }
    let transport = Arc::new(StreamChatClient::new(chat_config).context("chat client")?);

    let mut openai_config = OpenAiConfig::new(&cli.openai_api_key);
    if let Some(ref url) = cli.openai_base_url {
        openai_config = openai_config.with_base_url(url);
    }
    let backend = Arc::new(OpenAiAssistantBackend::new(openai_config).context("OpenAI backend")?);

    let web_search = Arc::new(
        WebSearchTool::new(WebSearchConfig::new(cli.tavily_api_key.clone()))
            .context("web search tool")?,
    );
    if !web_search.is_configured() {
        tracing::warn!("TAVILY_API_KEY not set, web search will report itself unavailable");
    }

    let events = EventHub::default();
    let ctx = AgentContext {
        backend,
        transport: transport.clone(),
        events: events.clone(),
        web_search,
        config: cli.agent_config(),
    };
    tracing::info!(platform = %cli.platform, model = %cli.model, "Agents configured");

    let registry = Arc::new(SessionRegistry::new(
        transport,
        Arc::new(OpenAiAgentFactory::new(ctx)),
    ));
    let server = Server::new(registry, events, cli.server_config());

    server.run().await?;
    Ok(())
}
