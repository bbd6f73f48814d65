// src/lib.rs
//! Polling backend: polls with reconciled options, one vote per identity
//! (account or anonymous fingerprint plus session), per-option results and a
//! declarative access policy, served over a JSON HTTP API backed by SQLite.

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;
use tracing::info;

pub mod accounts;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod policy;
pub mod poll;
pub mod reconcile;
pub mod results;
pub mod routes;
pub mod state;
pub mod throttle;
pub mod vote;

use config::Config;
use error::{AppError, AppResult};
use state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub async fn start_server(config: Config) -> AppResult<()> {
    let address: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| AppError::Config(format!("invalid listen address: {e}")))?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    if let Some(seed) = &state.config.bootstrap_admin {
        accounts::ensure_admin(&state.pool, &state.password_policy(), seed).await?;
    }

    let app = routes::create_routes(state);

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| AppError::Internal(format!("server error: {e}")))?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}
