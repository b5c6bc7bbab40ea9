//! scourt-sync library interface
//!
//! Exposes the sync engine's modules for integration testing.

pub mod api;
pub mod captcha;
pub mod error;
pub mod fragments;
pub mod pool;
pub mod portal;
pub mod queue;
pub mod reconcile;
pub mod sync;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use scourt_common::config::ServiceConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Static service configuration (bind address, trigger secret)
    pub config: Arc<ServiceConfig>,
    /// Serializes scheduler passes; overlapping triggers would double-enqueue
    pub scheduler_lock: Arc<Mutex<()>>,
    /// Serializes worker passes
    pub worker_lock: Arc<Mutex<()>>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: ServiceConfig) -> Self {
        Self {
            db,
            config: Arc::new(config),
            scheduler_lock: Arc::new(Mutex::new(())),
            worker_lock: Arc::new(Mutex::new(())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::trigger_routes())
        .merge(api::job_routes())
        .merge(api::identity_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
