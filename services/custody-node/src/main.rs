use custody_core::logging;
use custody_handoff::ExpirySweeper;
use custody_node::{app, AppState, Config};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

const NODE_API_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct VersionHandshake {
    version: &'static str,
    api_version: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = VersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            api_version: NODE_API_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config = Config::load(&args)?;
    logging::init_with(config.custody.service.json_logs);

    let state = Arc::new(AppState::new(config.custody.clone())?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(
        Arc::clone(&state.service),
        config.custody.expiry.sweep_interval(),
    )
    .spawn(shutdown_rx);

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        addr = %config.bind_addr,
        ttl_secs = config.custody.expiry.ttl_secs,
        "Custody node listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        warn!("Expiry sweeper ended abnormally: {}", e);
    }
    Ok(())
}
