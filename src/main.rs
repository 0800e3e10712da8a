use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use service_matcher::api;
use service_matcher::config::Config;
use service_matcher::engine::scheduler::run_matching_scheduler;
use service_matcher::error::AppError;
use service_matcher::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let shared_state = Arc::new(AppState::in_memory(
        config.matching_policy(),
        config.event_buffer_size,
    ));

    let app = api::rest::router(shared_state.clone());

    let shutdown = CancellationToken::new();
    let scheduler = if config.scheduler_enabled {
        Some(tokio::spawn(run_matching_scheduler(
            shared_state.clone(),
            shutdown.clone(),
        )))
    } else {
        tracing::info!("matching scheduler disabled on this instance");
        None
    };

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            server_shutdown.cancel();
        })
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shutdown.cancel();
    if let Some(handle) = scheduler {
        match tokio::time::timeout(config.shutdown_grace(), handle).await {
            Ok(Ok(())) => tracing::info!("matching scheduler drained"),
            Ok(Err(err)) => tracing::error!(error = %err, "matching scheduler task failed"),
            Err(_) => tracing::warn!(
                grace_secs = config.shutdown_grace_secs,
                "matching scheduler did not drain in time"
            ),
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
