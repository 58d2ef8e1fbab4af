//! lms-sync - Study Plan Sync service
//!
//! Replicates master study plans into per-student copies, consumes
//! enrollment events, runs the periodic consistency monitor, and serves
//! the study-plan read/edit API.

use anyhow::Result;
use clap::Parser;
use lms_common::db::init_database;
use lms_common::events::EventBus;
use lms_sync::config::Config;
use lms_sync::{build_router, enrollment, monitor, AppState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lms-sync", version, about = "Study plan sync service")]
struct Args {
    /// Database file path
    #[arg(long, env = "LMS_SYNC_DB")]
    db_path: Option<String>,

    /// HTTP listen port
    #[arg(long, env = "LMS_SYNC_PORT")]
    port: Option<u16>,

    /// Seconds between consistency-monitor scans
    #[arg(long, env = "LMS_SYNC_MONITOR_INTERVAL_SECS")]
    monitor_interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting LMSync Study Plan Sync (lms-sync) v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = Config::resolve(
        args.db_path.as_deref(),
        args.port,
        args.monitor_interval_secs,
    )?;
    info!("Database path: {}", config.db_path.display());

    let pool = init_database(&config.db_path).await?;
    let bus = Arc::new(EventBus::default());

    // Enrollment events flow: HTTP ingestion -> mpsc queue -> consumer loop
    let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity);
    enrollment::spawn_consumer(pool.clone(), bus.clone(), events_rx);

    monitor::spawn_periodic(
        pool.clone(),
        bus.clone(),
        config.monitor_interval,
        config.monitor_batch_size,
    );

    let state = AppState::new(pool, bus, events_tx);
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("lms-sync listening on http://{addr}");
    info!("Health check: http://{addr}/health");

    axum::serve(listener, app).await?;

    Ok(())
}
