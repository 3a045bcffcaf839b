//! foreman daemon -- starts the orchestration API server: session
//! lifecycle, approval gate, hook dispatch, and per-session streaming.

use std::sync::Arc;

use anyhow::{Context, Result};
use fm_bridge::http_api::{api_router, ApiState};
use fm_core::config::Config;
use fm_gate::git::Git2Backend;
use fm_session::adapter::CliProviderAdapter;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    fm_telemetry::logging::init_logging("fm-daemon", "info");

    // Ensure the data directory exists
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let data_dir = std::path::Path::new(&home).join(".foreman");
    std::fs::create_dir_all(&data_dir).ok();

    // Load config (or use defaults)
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let workdir = config
        .providers
        .workdir
        .clone()
        .unwrap_or_else(|| ".".to_string());

    let adapter = Arc::new(CliProviderAdapter::new());
    let commit_backend = Arc::new(Git2Backend::new(&workdir));
    let state = ApiState::build(config.clone(), adapter, commit_backend);
    let router = api_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, workdir = %workdir, "foreman daemon listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("api server failed")?;

    info!("foreman daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
