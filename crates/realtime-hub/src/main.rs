//! Crosswire Realtime Hub
//!
//! Stateful WebSocket coordinator for messaging and calling clients.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Wire the hub to its collaborators (unbacked development stand-ins
//!    until a real backend is integrated)
//! 3. Bind and serve the HTTP server (`/ws`, `/healthz`)
//! 4. Wait for shutdown signal, then drain gracefully

#![warn(clippy::pedantic)]

use std::sync::Arc;

use realtime_hub::collab::unbacked::{
    EmptyDirectory, EmptyMessageStore, LoggingNotifier, OpenConversationStore,
};
use realtime_hub::config::Config;
use realtime_hub::hub::Hub;
use realtime_hub::transport::router;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Realtime Hub");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    info!(
        hub_id = %config.hub_id,
        bind_address = %config.bind_address,
        send_queue_depth = config.send_queue_depth,
        "Configuration loaded successfully"
    );

    // Wire the hub. The collaborators here are development stand-ins;
    // a deployment replaces them with clients for the real backend.
    let hub = Hub::new(
        Arc::new(OpenConversationStore),
        Arc::new(EmptyMessageStore),
        Arc::new(EmptyDirectory),
        Arc::new(LoggingNotifier),
    );

    let app = router(Arc::clone(&hub), Arc::clone(&config));

    // Bind before spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind server");
            e
        })?;
    info!(addr = %config.bind_address, "Server bound successfully");

    let shutdown_token = CancellationToken::new();
    let server_shutdown_token = shutdown_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown_token.cancelled().await;
        info!("Server shutting down");
    });

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });

    // Wait for shutdown signal
    info!("Realtime Hub running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");
    shutdown_token.cancel();
    let _ = server_task.await;

    info!("Realtime Hub shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
