//! SBC governor daemon
//!
//! Runs on the board itself, sampling host resources and keeping memory,
//! storage and queued work within what the hardware can sustain.

use anyhow::Result;
use governor_lib::{OrchestratorBuilder, SysfsThermalMonitor};
use sbc_governor::{api, config};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting sbc-governor");

    let config = config::load()?;
    info!(
        node_name = %config.node_name,
        api_port = config.api_port,
        "Governor configured"
    );

    let thermal = Arc::new(SysfsThermalMonitor::new(
        config.thermal_monitor_config(),
        config.collector.host_paths.clone(),
    ));

    let api_port = config.api_port;
    let (orchestrator, mut dispatch_rx) = OrchestratorBuilder::new()
        .config(config)
        .thermal(thermal)
        .build::<serde_json::Value>()?;
    let orchestrator = Arc::new(orchestrator);

    orchestrator.start().await?;

    // The daemon accepts no work of its own; anything dispatched is acknowledged
    let executor = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move {
            while let Some(dispatched) = dispatch_rx.recv().await {
                let id = dispatched.request.id.clone();
                if dispatched.is_cancelled() {
                    continue;
                }
                if let Err(e) = orchestrator.complete_execution(&id).await {
                    warn!(id = %id, error = %e, "Failed to acknowledge dispatched request");
                }
            }
        })
    };

    let (api_shutdown_tx, api_shutdown_rx) = oneshot::channel::<()>();
    let app_state = Arc::new(api::AppState::new(orchestrator.clone()));
    let api_handle = tokio::spawn(api::serve(api_port, app_state, async move {
        let _ = api_shutdown_rx.await;
    }));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Err(e) = orchestrator.shutdown("SIGINT received").await {
        error!(error = %e, "Governor shutdown incomplete");
    }

    let _ = api_shutdown_tx.send(());
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }
    executor.abort();

    Ok(())
}
