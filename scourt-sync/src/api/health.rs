//! Health check endpoint

use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde_json::json;

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(_) => "ok",
        Err(_) => "unavailable",
    };

    let uptime = (Utc::now() - state.startup_time).num_seconds();

    Json(json!({
        "status": if database == "ok" { "ok" } else { "degraded" },
        "service": "scourt-sync",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
        "uptimeSeconds": uptime,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use scourt_common::config::ServiceConfig;
    use scourt_common::db::init_memory_database;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_reports_ok() {
        let db = init_memory_database().await.unwrap();
        let state = AppState::new(db, ServiceConfig::for_tests());
        let app = crate::build_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "scourt-sync");
    }
}
