//! Startup helpers for the binaries.

use std::process::ExitCode;
use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::app::HelpdeskApp;
use crate::core::config::SyncConfig;
use crate::core::errors::SyncResult;
use crate::realtime::LocalPushHub;
use crate::server::{self, MockState};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
}

fn runtime() -> Option<Runtime> {
    match Runtime::new() {
        Ok(rt) => Some(rt),
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Run the mock backend (used by the `helpdesk-mock` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on failure.
#[must_use]
pub fn run_mock() -> ExitCode {
    init_tracing();
    tracing::info!("Starting helpdesk mock v{}", env!("CARGO_PKG_VERSION"));

    let Some(rt) = runtime() else {
        return ExitCode::from(1);
    };
    let port = get_port();
    let state = MockState::demo(Some(Arc::new(LocalPushHub::new())));
    tracing::info!("Demo login: demo@example.com / demo");

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(state, port, shutdown_signal())) {
        tracing::error!("Server error: {e}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

/// Run the sync layer headless and log what it sees (used by `helpdesk-sync`).
///
/// # Returns
/// `ExitCode::SUCCESS` on Ctrl-C, `1` on failure.
#[must_use]
pub fn run_watcher() -> ExitCode {
    init_tracing();
    tracing::info!("Starting helpdesk sync v{}", env!("CARGO_PKG_VERSION"));

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            return ExitCode::from(1);
        }
    };
    tracing::info!("API endpoint: {}", config.api.base_url);

    let Some(rt) = runtime() else {
        return ExitCode::from(1);
    };
    match rt.block_on(watch(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Sync failed: {e}");
            ExitCode::from(1)
        }
    }
}

async fn watch(config: SyncConfig) -> SyncResult<()> {
    let summary_every = config.polling.list_interval;
    // In-process hub; a network push provider plugs in here.
    let app = HelpdeskApp::new(config, Arc::new(LocalPushHub::new()))?;
    app.start().await?;

    let mut ticker = tokio::time::interval(summary_every);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            _ = ticker.tick() => {
                let inbox = app.inbox();
                tracing::info!(
                    conversations = inbox.items().len(),
                    unread = inbox.unread_count(),
                    authenticated = app.session().is_authenticated(),
                    "Inbox"
                );
            }
        }
    }

    app.shutdown().await;
    Ok(())
}

/// Get configured mock server port.
#[must_use]
pub fn get_port() -> u16 {
    std::env::var("HELPDESK_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(server::DEFAULT_PORT)
}
