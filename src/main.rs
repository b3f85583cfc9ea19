//! wa-relay - WhatsApp Web message relay
//!
//! Drives a pool of headless browser sessions against WhatsApp Web and
//! exposes message dispatch over a single HTTP endpoint.

mod api;
mod config;
mod dispatch;
mod session;
mod store;

use api::{create_router, AppState};
use config::Config;
use dispatch::Dispatcher;
use session::auth::Authenticator;
use session::SessionSupervisor;
use std::net::SocketAddr;
use std::sync::Arc;
use store::SessionStore;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wa_relay=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = Config::from_env();

    // Credential store (optional; WA_RELAY_EPHEMERAL disables it)
    let store = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "opening credential store");
            Some(SessionStore::open(path)?)
        }
        None => {
            tracing::info!("running ephemeral, sessions re-pair on every start");
            None
        }
    };

    // Session pool: authenticate the initial sessions in the background so
    // the HTTP surface comes up immediately.
    let authenticator = Authenticator::new(config.entry_url.clone(), config.headful, store);
    let supervisor = SessionSupervisor::new(authenticator, config.quota);
    for _ in 0..config.initial_sessions {
        supervisor.spawn_session();
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&supervisor), &config));
    let state = AppState {
        supervisor: Arc::clone(&supervisor),
        dispatcher,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("wa-relay listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release every browser before exiting.
    supervisor.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
}
