mod config;
mod errors;
mod routes;
mod state;
mod stream;
mod writer;
mod writer_client;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::routes::build_router;
use crate::state::AppState;
use crate::writer::session::GenerationTracker;
use crate::writer_client::WriterClient;

/// How often finished sessions past their retention are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CVChatter writer v{}", env!("CARGO_PKG_VERSION"));

    // Initialize upstream writer client
    let writer = WriterClient::new(
        config.writer_upstream_url.clone(),
        config.writer_api_key.clone(),
        config.connect_timeout,
    )?;
    info!(
        "Writer client initialized (upstream: {}, framing: {:?})",
        writer.endpoint(),
        config.line_framing
    );

    // Initialize session tracker and its eviction sweep
    let sessions = Arc::new(GenerationTracker::with_retention(config.session_retention));
    sessions.clone().spawn_eviction(SESSION_SWEEP_INTERVAL);
    info!(
        "Session tracker initialized (retention: {}s)",
        config.session_retention.as_secs()
    );

    // Build app state
    let state = AppState {
        writer: Arc::new(writer),
        sessions,
        line_framing: config.line_framing,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the web app's domain

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
