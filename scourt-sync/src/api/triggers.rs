//! Scheduler and worker trigger endpoints
//!
//! The service runs no internal timers; an external cron POSTs here. Both
//! endpoints are guarded by the shared trigger secret and serialized by a
//! try-lock so overlapping invocations return 409 instead of stacking up.

use crate::error::{ApiError, ApiResult};
use crate::queue::{scheduler, worker};
use crate::sync::CaseSyncExecutor;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use scourt_common::settings::SyncSettings;
use serde::Deserialize;
use uuid::Uuid;

pub fn trigger_routes() -> Router<AppState> {
    Router::new()
        .route("/scheduler/run", post(run_scheduler))
        .route("/worker/run", post(run_worker))
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerParams {
    secret: Option<String>,
}

/// The secret travels in the `x-trigger-secret` header or a `secret` query
/// parameter. A service configured without one accepts every caller.
fn check_secret(state: &AppState, headers: &HeaderMap, params: &TriggerParams) -> ApiResult<()> {
    let Some(expected) = &state.config.trigger_secret else {
        return Ok(());
    };

    let provided = headers
        .get("x-trigger-secret")
        .and_then(|v| v.to_str().ok())
        .or(params.secret.as_deref());

    match provided {
        Some(p) if p == expected => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "missing or invalid trigger secret".to_string(),
        )),
    }
}

async fn run_scheduler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> ApiResult<Json<scheduler::SchedulerReport>> {
    check_secret(&state, &headers, &params)?;

    let Ok(_guard) = state.scheduler_lock.try_lock() else {
        return Err(ApiError::Conflict(
            "a scheduler pass is already running".to_string(),
        ));
    };

    let settings = SyncSettings::load(&state.db).await?;
    let report = scheduler::run_scheduler_pass(&state.db, &settings, Utc::now()).await?;
    Ok(Json(report))
}

async fn run_worker(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> ApiResult<Json<worker::WorkerReport>> {
    check_secret(&state, &headers, &params)?;

    let Ok(_guard) = state.worker_lock.try_lock() else {
        return Err(ApiError::Conflict(
            "a worker pass is already running".to_string(),
        ));
    };

    let settings = SyncSettings::load(&state.db).await?;
    let executor = CaseSyncExecutor::live(state.db.clone());
    let worker_id = format!("worker-{}", &Uuid::new_v4().to_string()[..8]);
    let report = worker::run_worker_pass(&state.db, &settings, &executor, &worker_id).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use scourt_common::config::ServiceConfig;
    use scourt_common::db::init_memory_database;
    use tower::ServiceExt;

    fn secured_config() -> ServiceConfig {
        let mut config = ServiceConfig::for_tests();
        config.trigger_secret = Some("s3cret".to_string());
        config
    }

    #[tokio::test]
    async fn scheduler_requires_secret() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, secured_config()));

        let response = app
            .oneshot(
                Request::post("/scheduler/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn scheduler_accepts_header_secret() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, secured_config()));

        let response = app
            .oneshot(
                Request::post("/scheduler/run")
                    .header("x-trigger-secret", "s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scheduler_accepts_query_secret() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, secured_config()));

        let response = app
            .oneshot(
                Request::post("/scheduler/run?secret=s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unsecured_service_accepts_bare_triggers() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let response = app
            .oneshot(
                Request::post("/scheduler/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn concurrent_scheduler_pass_conflicts() {
        let db = init_memory_database().await.unwrap();
        let state = AppState::new(db, ServiceConfig::for_tests());

        // hold the lock as a concurrent pass would
        let _guard = state.scheduler_lock.clone().try_lock_owned().unwrap();

        let app = crate::build_router(state);
        let response = app
            .oneshot(
                Request::post("/scheduler/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn worker_pass_runs_on_empty_queue() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let response = app
            .oneshot(Request::post("/worker/run").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["claimed"], 0);
    }
}
