//! courier API server.
//!
//! Serves webhook endpoint management, event submission and delivery
//! history, and runs the delivery workers in the same process.

use std::net::SocketAddr;
use std::sync::Arc;

use courier_api::{build_router, logging, open_storage, Config, Workers};
use courier_webhooks::Dispatcher;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() {
    // Development convenience; real deployments set the environment directly.
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.host,
        port = config.port,
        env = %config.app_env,
        "Starting courier API"
    );

    for warning in config.insecure_settings() {
        tracing::warn!(target: "security", "{}", warning);
    }

    let (stores, storage) = match open_storage(&config).await {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Failed to open storage: {e}");
            std::process::exit(1);
        }
    };
    info!(storage = storage.as_str(), "Storage ready");

    let dispatcher = match Dispatcher::new(
        stores,
        config.webhooks.registry_config(),
        config.webhooks.dispatcher_config(),
    ) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            tracing::error!("Failed to create webhook dispatcher: {e}");
            std::process::exit(1);
        }
    };

    let workers = Workers::spawn(&dispatcher, &config.webhooks);
    let app = build_router(dispatcher, storage);

    let addr: SocketAddr = match config.bind_addr().parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {e}", config.bind_addr());
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to address {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%addr, "Server listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!("Server error: {e}");
    }

    info!("Draining webhook workers...");
    workers.stop().await;
    info!("Server shutdown complete");
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
