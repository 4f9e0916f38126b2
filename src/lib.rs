pub mod actions;
pub mod ai;
pub mod api;
pub mod config;
pub mod db;
pub mod resources;
pub mod telemetry;
pub mod upload;

use anyhow::{Context, Result};
use std::sync::Arc;

/// Start the gateway: wait for Doris, then serve HTTP until ctrl-c.
pub async fn run() -> Result<()> {
    telemetry::init_tracing(env!("CARGO_PKG_NAME"));

    let config = config::GatewayConfig::from_env()?;
    let client = db::bootstrap(&config.doris).await?;
    if let Ok(version) = client.server_version().await {
        tracing::info!(version = %version, "connected to Doris");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = api::AppState::new(Arc::new(client), config);
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("server error")
}
