use crate::cli::commands::open_engine;
use crate::cli::parser::Commands;
use crate::config::Config;
use crate::core::scheduler::{Job, Scheduler};
use crate::errors::{AppError, AppResult};
use crate::server::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Handle the `serve` command: engine, tracer worker, scheduler and the
/// HTTP/WebSocket listener, until Ctrl-C.
pub async fn handle(cmd: &Commands, cfg: &Config) -> AppResult<()> {
    let Commands::Serve { address, port } = cmd else {
        return Ok(());
    };

    let host = address.clone().unwrap_or_else(|| cfg.http.address.clone());
    let port = port.unwrap_or(cfg.http.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| AppError::Config(format!("invalid listen address {}:{}: {}", host, port, e)))?;

    let engine = open_engine(cfg)?;
    let tracer = engine.spawn_tracer();

    let state = AppState::new(engine.clone());

    // devices learn about counts a scheduled checkout changed
    let (finished_tx, mut finished_rx) = mpsc::unbounded_channel::<Job>();
    let refresher = {
        let coordinator = state.coordinator.clone();
        tokio::spawn(async move {
            while let Some(job) = finished_rx.recv().await {
                let delivered = coordinator.broadcast_all().await;
                debug!(job = job.name(), delivered, "counts refreshed after scheduled job");
            }
        })
    };

    let scheduler = Arc::new(Scheduler::from_settings(engine.clone()).notify_finished(finished_tx));
    if let Some(report) = scheduler.startup().await
        && !report.is_success()
    {
        warn!(failures = ?report.failures, "startup cleanup finished with errors");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = {
        let scheduler = scheduler.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    let server = server::serve(state, addr, cfg.http.tls.as_ref(), shutdown_rx);
    tokio::pin!(server);

    let result = tokio::select! {
        r = &mut server => r,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            server.await
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }
    refresher.abort();
    if let Some(handle) = tracer {
        handle.abort();
    }
    result
}
