use std::sync::Arc;

use ride_dispatch::api;
use ride_dispatch::config::Config;
use ride_dispatch::engine::dispatch::run_dispatch_worker;
use ride_dispatch::error::AppError;
use ride_dispatch::integrations::payment::LoggingGateway;
use ride_dispatch::state::AppState;
use ride_dispatch::store::MemoryStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let http_port = config.http_port;
    let auto_dispatch = config.auto_dispatch;

    let (app_state, dispatch_rx) = AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(LoggingGateway::default()),
    );
    let shared_state = Arc::new(app_state);

    let app = api::rest::router(shared_state.clone());

    if auto_dispatch {
        tokio::spawn(run_dispatch_worker(shared_state.clone(), dispatch_rx));
    } else {
        tracing::info!("background dispatch disabled");
    }

    let bind_addr = format!("0.0.0.0:{http_port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
