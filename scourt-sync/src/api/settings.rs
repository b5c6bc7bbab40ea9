//! Runtime sync settings endpoints
//!
//! Settings live in the database as one JSON document, so a PUT takes
//! effect on the next scheduler or worker pass without a restart.

use crate::error::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use scourt_common::settings::SyncSettings;

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).put(put_settings))
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<SyncSettings>> {
    Ok(Json(SyncSettings::load(&state.db).await?))
}

async fn put_settings(
    State(state): State<AppState>,
    Json(settings): Json<SyncSettings>,
) -> ApiResult<Json<SyncSettings>> {
    validate(&settings)?;
    settings.save(&state.db).await?;
    Ok(Json(settings))
}

fn validate(settings: &SyncSettings) -> ApiResult<()> {
    if settings.progress_interval_hours == 0 {
        return Err(ApiError::BadRequest(
            "progressIntervalHours must be at least 1".to_string(),
        ));
    }
    if settings.worker_concurrency == 0 {
        return Err(ApiError::BadRequest(
            "workerConcurrency must be at least 1".to_string(),
        ));
    }
    if settings.rate_limit_per_minute == 0 {
        return Err(ApiError::BadRequest(
            "rateLimitPerMinute must be at least 1".to_string(),
        ));
    }
    if settings.request_jitter_ms.min_ms > settings.request_jitter_ms.max_ms {
        return Err(ApiError::BadRequest(
            "requestJitterMs range is inverted".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use scourt_common::config::ServiceConfig;
    use scourt_common::db::init_memory_database;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn defaults_served_before_first_save() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let response = app
            .oneshot(Request::get("/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["autoSyncEnabled"], true);
        assert_eq!(body["progressIntervalHours"], 6);
    }

    #[tokio::test]
    async fn put_round_trips_through_get() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let mut settings = SyncSettings::default();
        settings.progress_interval_hours = 12;
        settings.rate_limit_per_minute = 5;

        let put = app
            .clone()
            .oneshot(
                Request::put("/settings")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&settings).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);

        let get = app
            .oneshot(Request::get("/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(get).await;
        assert_eq!(body["progressIntervalHours"], 12);
        assert_eq!(body["rateLimitPerMinute"], 5);
    }

    #[tokio::test]
    async fn invalid_settings_rejected() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let mut settings = SyncSettings::default();
        settings.worker_concurrency = 0;

        let response = app
            .oneshot(
                Request::put("/settings")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::to_string(&settings).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
