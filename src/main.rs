//! Timer Sync - Authoritative shared timers for live overlays
//!
//! This is the main entry point: the timer server by default, plus the
//! `watch` and `control` terminal clients.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use timer_sync::{
    api::create_router,
    client,
    clock::{Clock, SystemClock},
    config::{Command, Config, ServeArgs},
    state::{AppState, TimerService},
    store::SqliteStore,
    tasks::stale_cleanup_task,
    timer::TimerEngine,
    transport::Hub,
    utils::shutdown_signal,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins; otherwise follow --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("timer_sync={},tower_http=info", config.log_level()))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match config.command() {
        Command::Serve(args) => serve(args).await,
        Command::Watch(args) => client::watch::run(args).await,
        Command::Control(args) => client::control::run(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    info!("Starting timer-sync server v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration: host={}, port={}, db={}, sync={}ms, retention={}d",
        args.host,
        args.port,
        args.db_path.display(),
        args.sync_interval_ms,
        args.retention_days
    );

    if let Some(dir) = args.db_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(
        SqliteStore::open(&args.db_path, Arc::clone(&clock))
            .with_context(|| format!("Failed to open timer database {}", args.db_path.display()))?,
    );
    let hub = Hub::new();
    let service = TimerService::new(
        TimerEngine::new(store, clock),
        hub.clone(),
        args.sync_interval(),
    );

    // Timers that were running before the restart pick up where wall time says they are
    let resumed = service
        .restore()
        .await
        .context("Failed to restore running timers")?;
    info!("Resumed {} running timer(s)", resumed);

    // Start the stale timer cleanup background task
    let cleanup_service = service.clone();
    let (retention, every) = (args.retention(), args.cleanup_interval());
    tokio::spawn(async move {
        stale_cleanup_task(cleanup_service, retention, every).await;
    });

    let state = Arc::new(AppState::new(
        service.clone(),
        hub,
        args.host.clone(),
        args.port,
        args.rate_limit,
    ));
    let app = create_router(state, &args.cors_origins);

    // Bind to the specified address
    let addr = args.address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server running on http://{}", addr);
    info!("Endpoints:");
    info!("  GET  /ws                 - Timer session (WebSocket)");
    info!("  GET  /api/channel/:name  - Channel snapshot");
    info!("  GET  /status             - Server status");
    info!("  GET  /health             - Health check");

    // Setup graceful shutdown
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = async {
            if let Err(e) = shutdown_signal().await {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        } => {
            info!("Shutdown signal received");
        }
    }

    service.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
