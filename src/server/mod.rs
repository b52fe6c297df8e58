//! HTTP API and the real-time scanning endpoint.

pub mod auth;
pub mod coordinator;
pub mod protocol;
pub mod routes;
pub mod tls;
pub mod websocket;

use crate::config::TlsConfig;
use crate::core::engine::Engine;
use crate::errors::AppResult;
use axum::Router;
use axum::routing::{get, post};
use coordinator::ScanCoordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub coordinator: Arc<ScanCoordinator>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        let coordinator = Arc::new(ScanCoordinator::new(engine.clone()));
        Self {
            engine,
            coordinator,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/divisions", get(routes::divisions))
        .route(
            "/api/guests",
            post(routes::register_guest).get(routes::guests_on_day),
        )
        .route("/api/guests/{guid}/status", get(routes::guest_status))
        .route("/api/guests/{guid}/visits", get(routes::guest_visits))
        .route("/api/guests/{guid}/contacts", get(routes::guest_contacts))
        .route("/ws/{division}", get(websocket::websocket_handler))
        .with_state(state)
}

/// Open connections get this long to finish after shutdown under TLS.
const TLS_GRACE: Duration = Duration::from_secs(10);

async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Serve until `shutdown` turns true, over HTTPS when `tls` is set.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    tls: Option<&TlsConfig>,
    shutdown: watch::Receiver<bool>,
) -> AppResult<()> {
    match tls {
        Some(tls) => serve_tls(state, addr, tls, shutdown).await?,
        None => {
            let listener = TcpListener::bind(addr).await?;
            info!(address = %listener.local_addr()?, "listening");
            axum::serve(listener, router(state))
                .with_graceful_shutdown(shutdown_requested(shutdown))
                .await?;
        }
    }

    info!("server stopped");
    Ok(())
}

async fn serve_tls(
    state: AppState,
    addr: SocketAddr,
    tls: &TlsConfig,
    shutdown: watch::Receiver<bool>,
) -> AppResult<()> {
    let config = tls::load_rustls_config(tls).await?;

    let handle = axum_server::Handle::new();
    let watcher = handle.clone();
    tokio::spawn(async move {
        shutdown_requested(shutdown).await;
        watcher.graceful_shutdown(Some(TLS_GRACE));
    });

    info!(address = %addr, cert = %tls.cert, "listening (TLS)");
    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(router(state).into_make_service())
        .await?;
    Ok(())
}
