//! Mock helpdesk backend.
//!
//! Serves the REST surface the dashboard talks to, keeps everything in
//! memory and fans push events out through a [`LocalPushHub`](crate::realtime::LocalPushHub):
//! - Auth (login, register, token validation)
//! - Conversations, messages and state changes
//! - Typing relay, onboarding and widget settings

pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::{GLOBAL_CHANNEL, MockState, Transition};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::core::errors::SyncResult;

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Router with CORS and request tracing layers.
pub fn app(state: Arc<MockState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<MockState>, port: u16) -> SyncResult<()> {
    run_server_with_shutdown(state, port, std::future::pending()).await
}

/// Start the HTTP server with graceful shutdown support.
///
/// The server will stop accepting new connections when `shutdown_signal` completes.
///
/// # Errors
/// Returns an error if the port cannot be bound.
pub async fn run_server_with_shutdown<F>(
    state: Arc<MockState>,
    port: u16,
    shutdown_signal: F,
) -> SyncResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown_signal).await
}

/// Serve on an already bound listener.
///
/// # Errors
/// Returns an error if accepting connections fails.
pub async fn serve<F>(listener: TcpListener, state: Arc<MockState>, shutdown_signal: F) -> SyncResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Helpdesk mock listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal)
        .await?;
    Ok(())
}
