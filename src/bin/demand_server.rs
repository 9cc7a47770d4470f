use std::net::SocketAddr;

use anyhow::Context;
use tokio::signal;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use stateset_demand as demand;
use demand::repositories::{InMemoryLedger, LedgerSnapshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = demand::config::load_config().context("loading configuration")?;
    demand::config::init_tracing(&cfg.log_level, cfg.log_json);

    let ledger = match &cfg.ledger_snapshot_path {
        Some(path) => {
            let snapshot = LedgerSnapshot::from_path(path)
                .with_context(|| format!("reading ledger snapshot {}", path.display()))?;
            info!(
                items = snapshot.items.len(),
                transactions = snapshot.transactions.len(),
                "ledger snapshot loaded"
            );
            InMemoryLedger::from_snapshot(snapshot)
        }
        None => {
            info!("no ledger snapshot configured; starting with an empty ledger");
            InMemoryLedger::new()
        }
    };

    std::fs::create_dir_all(&cfg.artifact_dir)
        .with_context(|| format!("creating artifact dir {}", cfg.artifact_dir.display()))?;
    match &cfg.model_worker_path {
        Some(worker) => info!(worker = %worker.display(), "model calls go through the worker"),
        None => info!(dir = %cfg.artifact_dir.display(), "serving models in-process"),
    }

    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };
    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;
    let request_timeout = cfg.training_timeout();

    let state = demand::AppState::from_config(cfg, demand::Repositories::in_memory(ledger));
    let app = demand::app_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors_layer);

    info!("stateset-demand listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
