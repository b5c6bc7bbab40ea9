//! scourt-sync - Court portal synchronization service
//!
//! Keeps locally managed legal cases in step with the national court portal:
//! schedules per-case sync jobs, drains them through a rate-limited worker,
//! and reconciles hearings, deadlines, parties and related cases from the
//! portal responses.

use anyhow::Result;
use scourt_common::config::ServiceConfig;
use scourt_sync::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting scourt-sync service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli_db_path = std::env::args().nth(1);
    let config = ServiceConfig::resolve(cli_db_path.as_deref())?;
    info!("Database: {}", config.database_path.display());

    let db_pool = scourt_common::db::init_database(&config.database_path).await?;
    info!("Database connection established");

    let bind_addr = config.bind_addr;
    let state = AppState::new(db_pool, config);
    let app = scourt_sync::build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Listening on http://{bind_addr}");
    info!("Health check: http://{bind_addr}/health");

    axum::serve(listener, app).await?;

    Ok(())
}
