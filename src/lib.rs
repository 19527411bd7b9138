//! opsdesk -- backend for a small operations dashboard.
//!
//! Submits jobs to Rundeck, keeps a local record of every execution it
//! started, and reconciles those records with the runner on a schedule.

pub mod api;
pub mod config;
pub mod executions;
pub mod forms;
pub mod links;
pub mod reconcile;
pub mod runner;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, LogFormat, LoggingConfig};
use crate::executions::ExecutionStore;
use crate::links::LinkCatalog;
use crate::reconcile::{ReconcileSchedule, Reconciler};
use crate::runner::{JobRunner, RundeckClient};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
    }
}

/// Resolve the configuration under a temporary stderr subscriber, so that
/// fallbacks taken while loading are reported before [`init_tracing`] runs.
pub fn resolve_config(explicit: Option<&Path>) -> Result<AppConfig> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(bootstrap, || AppConfig::resolve(explicit))
}

/// Start the opsdesk daemon: API server and reconciliation loop.
pub async fn serve(config: AppConfig) -> Result<()> {
    config.validate()?;
    let config = Arc::new(config);

    // 1. Initialize Storage
    let db_path = &config.storage.db_path;
    tracing::info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(db_path)?;
    let store = ExecutionStore::new(pool.clone());
    let links = LinkCatalog::new(pool);

    // 2. Runner client and reconciler
    let runner: Arc<dyn JobRunner> = Arc::new(RundeckClient::new(&config.runner)?);
    let reconciler = Reconciler::new(store.clone(), runner.clone(), &config.reconcile);

    // 3. Start reconciliation loop (background task)
    let cancel = CancellationToken::new();
    let loop_handle = if config.reconcile.enabled {
        let schedule = ReconcileSchedule::parse(&config.reconcile.schedule)
            .with_context(|| format!("invalid reconcile schedule '{}'", config.reconcile.schedule))?;
        Some(tokio::spawn(reconcile::run_reconcile_loop(
            reconciler.clone(),
            schedule,
            cancel.clone(),
        )))
    } else {
        tracing::warn!("Reconciliation loop disabled by configuration");
        None
    };

    // 4. Start API Server
    let state = api::state::AppState {
        store,
        links,
        runner,
        reconciler,
        config: config.clone(),
    };
    let app = api::router(state);

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", config.server.bind))?;
    tracing::info!(%addr, "opsdesk listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = loop_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Reconciliation loop panicked");
        }
    }

    Ok(())
}
