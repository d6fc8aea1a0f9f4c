use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use opsdesk_scheduler::{
    AuditSink, FanoutAuditSink, RecurrenceScheduler, SqliteScheduleStore, SystemClock,
    TracingAuditSink,
};
use opsdesk_tasks::{ActivityLog, TaskManager};

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "opsdesk_gateway=info,opsdesk_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    // load config: OPSDESK_CONFIG env > ~/.opsdesk/opsdesk.toml
    let config_path = std::env::var("OPSDESK_CONFIG").ok();
    let config =
        opsdesk_core::OpsdeskConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            opsdesk_core::OpsdeskConfig::default()
        });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // initialize SQLite database (single file for all subsystems)
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path)?;
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    // run all schema migrations (idempotent)
    opsdesk_scheduler::db::init_db(&db)?;
    opsdesk_tasks::db::init_db(&db)?;
    info!("database migrations complete");

    // build subsystems; each gets its own connection for thread safety
    let store = Arc::new(SqliteScheduleStore::new(rusqlite::Connection::open(&db_path)?)?);
    let tasks = Arc::new(TaskManager::new(rusqlite::Connection::open(&db_path)?));
    let activity = Arc::new(ActivityLog::new(rusqlite::Connection::open(&db_path)?));

    let sinks: Vec<Arc<dyn AuditSink>> = vec![Arc::new(TracingAuditSink), activity.clone()];
    let scheduler = RecurrenceScheduler::new(
        config.scheduler.clone(),
        store.clone(),
        tasks.clone(),
        Arc::new(FanoutAuditSink::new(sinks)),
        Arc::new(SystemClock),
    );

    // replay missed occurrences before accepting any edits
    let report = scheduler.initialize().await?;
    if !report.failed.is_empty() {
        tracing::warn!(failed = ?report.failed, "some recurrences could not be caught up");
    }

    let state = Arc::new(app::AppState::new(
        config,
        store,
        tasks,
        activity,
        scheduler.clone(),
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Opsdesk gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // cancel pending timers; in-flight runs finish on their own
    scheduler.shutdown();
    Ok(())
}

fn ensure_parent_dir(path: &str) -> opsdesk_core::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
