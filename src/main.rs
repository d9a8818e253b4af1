use axum::Router;
use gapsync::config::Config;
use gapsync::services::{ControlPoller, SqliteStore};
use gapsync::sources::YahooFinanceClient;
use gapsync::{api, AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gapsync=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load and check configuration
    let config = Config::from_env();
    config.validate()?;
    info!("Starting GapSync server on {}:{}", config.host, config.port);
    info!(
        "Tracking {} symbols over {} years",
        config.sync.monitored_symbols.len(),
        config.sync.target_years
    );

    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    let source = Arc::new(YahooFinanceClient::new(config.yahoo_base_url.clone())?);
    let state = AppState::new(config, store.clone(), source)?;

    // Remote control poller
    let shutdown = CancellationToken::new();
    let poller = Arc::new(ControlPoller::new(
        store,
        state.orchestrator.clone(),
        state.config.control.clone(),
    ));
    let poller_handle = poller.spawn(shutdown.clone());

    if state.config.auto_start {
        match state.orchestrator.start().await {
            Ok(id) => info!("Auto-started sync session {}", id),
            Err(e) => error!("Auto-start failed: {}", e),
        }
    }

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Start the server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("GapSync server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    shutdown.cancel();
    if let Err(e) = poller_handle.await {
        warn!("Control poller ended abnormally: {}", e);
    }
    if state.orchestrator.is_running().await {
        state.orchestrator.stop().await?;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}
