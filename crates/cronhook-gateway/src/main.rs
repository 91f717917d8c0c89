use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use cronhook_core::config::CronhookConfig;
use cronhook_scheduler::{DispatchEngine, HttpExecutor, TaskManager};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod app;
mod http;

/// Persistent one-off and cron HTTP callbacks.
#[derive(Debug, Parser)]
#[command(name = "cronhook", version)]
struct Cli {
    /// Path to the TOML config file. Falls back to `CRONHOOK_CONFIG`, then
    /// `~/.cronhook/cronhook.toml`.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cronhook_gateway=info,cronhook_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: --config > CRONHOOK_CONFIG env > ~/.cronhook/cronhook.toml
    let cli = Cli::parse();
    let config_path = cli.config.or_else(|| std::env::var("CRONHOOK_CONFIG").ok());
    let config = CronhookConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CronhookConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let tasks = Arc::new(TaskManager::new(db)?);
    info!("database ready");

    let executor = Arc::new(HttpExecutor::new(config.dispatch.request_timeout())?);
    let engine = DispatchEngine::new(tasks.clone(), executor, config.dispatch.clone()).start()?;

    let bind = config.server.bind.clone();
    let port = config.server.port;
    let state = Arc::new(app::AppState::new(config, tasks));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!(%addr, "cronhook listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(engine.cancel_token()))
        .await?;

    engine.shutdown().await;
    info!("cronhook stopped");
    Ok(())
}

/// Resolves on Ctrl-C, SIGTERM, or when the engine is cancelled elsewhere.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
        _ = cancel.cancelled() => info!("dispatch engine cancelled, shutting down"),
    }
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
