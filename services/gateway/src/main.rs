mod config;
mod error;
mod handlers;
mod models;
mod router;
mod state;

use config::AppConfig;
use router::create_router;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting Gridwatch gateway");

    let config = AppConfig::load()?;
    let state = AppState::build(&config)?;

    // Collection runs beside the HTTP server until shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::clone(&state.scheduler);
    let collection = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let app = create_router(state);
    let listener = TcpListener::bind(config.listen_addr).await?;

    tracing::info!("Listening on {}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, stopping scheduler");
    let _ = shutdown_tx.send(true);
    let cycles = collection.await?;
    tracing::info!(cycles, "Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
