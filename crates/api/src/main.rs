use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cellcast_api::config::{LogFormat, ServerConfig};
use cellcast_api::lifecycle::Lifecycle;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");

    // --- Tracing ---
    let json = config.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cellcast_api=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();

    tracing::info!(
        host = %config.host,
        port = config.port,
        worker_port = config.worker_port,
        redis = %format!("{}:{}", config.redis_host, config.redis_port),
        "Loaded server configuration",
    );

    // --- Start ---
    let lifecycle = Lifecycle::start(config)
        .await
        .expect("Failed to start server");
    tracing::info!(
        http = %lifecycle.http_addr(),
        worker = ?lifecycle.worker_addr(),
        "Cellcast relay running",
    );

    shutdown_signal().await;

    // --- Shutdown ---
    let report = lifecycle.shutdown().await;
    if !report.is_clean() {
        std::process::exit(1);
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
