//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::signal;
use tracing::{info, warn};

use patsim::config::Config;
use patsim::llm::{AnthropicProvider, LLMProvider, Provider};
use patsim::pipeline::{StageRuntime, TurnPipeline};
use patsim::quota::MemoryQuota;
use patsim::report::LlmReportBuilder;
use patsim::server::{self, AppState, SessionDirectory};
use patsim::session::SessionEngine;
use patsim::store::{FileSessionStorage, MemorySessionStorage, SessionStorage};
use patsim::transport::OutboxTransport;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path).await?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let api_key = match config.persona.api_key.clone() {
        Some(key) => key,
        None => std::env::var("ANTHROPIC_API_KEY")
            .context("no persona.api_key configured and ANTHROPIC_API_KEY is not set")?,
    };
    let base_url = config
        .persona
        .base_url
        .clone()
        .unwrap_or_else(|| AnthropicProvider::DEFAULT_BASE_URL.to_string());
    let provider: Arc<dyn LLMProvider> = match &config.persona.provider {
        Provider::Anthropic => Arc::new(AnthropicProvider::new(
            reqwest::Client::new(),
            api_key,
            base_url,
        )),
        Provider::Other(name) => bail!("unsupported persona provider '{name}'"),
    };

    let persona_prompt = config.persona.load_prompt().await?;
    let stage_timeout = Duration::from_secs(config.persona.stage_timeout_secs);
    let runtime = StageRuntime::new(
        provider.clone(),
        config.persona.model.clone(),
        stage_timeout,
        config.persona.max_tokens,
    );
    let pipeline = TurnPipeline::new(runtime, persona_prompt);

    let storage: Arc<dyn SessionStorage> = match &config.storage.sessions_dir {
        Some(dir) => {
            info!(path = %dir.display(), "using file session storage");
            Arc::new(FileSessionStorage::new(dir))
        }
        None => {
            warn!("no storage.sessions_dir configured, sessions are not durable");
            Arc::new(MemorySessionStorage::new())
        }
    };

    let outbox = Arc::new(OutboxTransport::new());
    let quota = Arc::new(MemoryQuota::new(config.quota.free_units));
    let reports = Arc::new(LlmReportBuilder::new(
        provider,
        config.persona.model.clone(),
        config.persona.max_tokens,
        stage_timeout,
    ));

    let engine = SessionEngine::new(
        outbox.clone(),
        storage,
        quota,
        reports,
        pipeline,
        config.session.engine_config(),
    );

    let state = AppState {
        engine: engine.clone(),
        outbox,
        directory: Arc::new(SessionDirectory::new()),
    };
    let app = server::build_app(
        state,
        config.server.request_timeout_seconds,
        config.server.max_concurrency,
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid server address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Close out open sessions before exiting.
    engine.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
