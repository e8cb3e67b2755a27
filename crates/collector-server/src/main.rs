//! # Collector Server
//!
//! Main entry point for the Collector job server.

use anyhow::Context;
use collector_config::ConfigLoader;
use collector_server::startup::{print_banner, print_startup_info};
use collector_server::AppBuilder;
use tokio::signal;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Application error: {:#}", e);
        eprintln!("collector-server: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ConfigLoader::from_default_location()
        .load()
        .context("Failed to load configuration")?;

    collector_core::init_logging(&config.observability).context("Failed to initialize logging")?;
    collector_jobs::register_metrics();

    print_banner();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    print_startup_info(&config);

    let app = AppBuilder::new(config)
        .build()
        .await
        .context("Failed to build application")?;

    app.start().await.context("Failed to start scheduler")?;

    shutdown_signal().await;

    let report = app.shutdown().await;
    if !report.interrupted.is_empty() {
        warn!(
            count = report.interrupted.len(),
            "Jobs interrupted by shutdown will resume on next start"
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        () = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        }
    }
}
