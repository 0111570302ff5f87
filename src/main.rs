//! jobs_crm server
//!
//! Opens the Sled store, creates the bootstrap admin if needed and serves
//! the REST API until SIGINT/SIGTERM, then flushes the store.
//!
//! Usage:
//!   cargo run --bin load_data    # populate sample data
//!   cargo run --bin jobs_crm     # start server (JWT_SECRET required)

use std::sync::Arc;

use tokio::net::TcpListener;

use jobs_crm::config::Config;
use jobs_crm::controller;
use jobs_crm::logging;
use jobs_crm::rest::{create_router, AppState};
use jobs_crm::storage::Storage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load();
    let _log_guard = logging::init(config.log_format, config.log_dir.as_deref());

    let addr = config.socket_addr()?;
    tracing::info!(
        %addr,
        database = %config.database_path.display(),
        env = ?config.app_env,
        "jobs_crm starting"
    );

    let storage = Storage::open(&config.database_path)?;
    if let Some((email, password)) = config.bootstrap_admin() {
        controller::bootstrap_admin(&storage, email, password)?;
    }

    let state = Arc::new(AppState::from_config(storage, &config)?);
    let app = create_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Handlers are gone once serve returns; the store can be flushed
    state.storage.flush()?;
    match Arc::try_unwrap(state) {
        Ok(state) => match Arc::try_unwrap(state.storage) {
            Ok(storage) => storage.close()?,
            Err(_) => tracing::warn!("storage still shared at shutdown, flushed only"),
        },
        Err(_) => tracing::warn!("app state still shared at shutdown, flushed only"),
    }
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
