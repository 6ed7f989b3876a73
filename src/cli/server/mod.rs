//! HTTP server exposing the turn service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | /health | Health check |
//! | POST | /sessions/{id}/turns | Run one turn (`{question, scope_id}`) |
//! | GET | /sessions/{id} | Checkpointed conversation state |
//! | DELETE | /sessions/{id} | Forget a conversation |
//! | POST | /known-good | Store a known-good question (`{question, sql?}`) |
//!
//! Sessions are created implicitly by their first turn.
//!
//! This module is only available when the `server` feature is enabled.

mod handlers;
pub mod types;

pub use handlers::AppState;
pub use types::{ErrorResponse, HealthResponse, KnownGoodBody, SessionSnapshot, TurnBody};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::ai::TurnService;

/// How often idle conversation checkpoints are purged
const CHECKPOINT_PURGE_INTERVAL_SECS: u64 = 60;

/// Bind the server and serve in the background.
///
/// Port 0 binds a random free port. Returns the bound address and a token
/// that shuts the server down gracefully when cancelled.
pub async fn start_server(
    port: u16,
    service: Arc<TurnService>,
) -> anyhow::Result<(SocketAddr, CancellationToken)> {
    let (state, shutdown_token) = AppState::new(service.clone());

    let app = create_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("HTTP server listening on {}", actual_addr);

    let server_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    let cleanup_service = service.clone();
    let cleanup_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(CHECKPOINT_PURGE_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let purged = cleanup_service.engine().purge_expired();
                    if purged > 0 {
                        tracing::info!("Purged {} idle session(s)", purged);
                    }
                }
                _ = cleanup_shutdown.cancelled() => break,
            }
        }
    });

    Ok((actual_addr, shutdown_token))
}

/// Separated from `start_server` for testing.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions/{session_id}/turns", post(handlers::post_turn))
        .route(
            "/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route("/known-good", post(handlers::post_known_good))
        .with_state(state)
}
