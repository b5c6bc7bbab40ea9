//! Manual job submission and queue inspection

use crate::error::{ApiError, ApiResult};
use crate::queue::store::{
    self, NewJob, JOB_FULL, JOB_GENERAL, JOB_PROGRESS, PRIORITY_MANUAL,
};
use crate::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_jobs))
        .route("/queue/status", get(queue_status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobsRequest {
    pub case_ids: Vec<String>,
    #[serde(default = "default_job_type")]
    pub job_type: String,
}

fn default_job_type() -> String {
    JOB_PROGRESS.to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobsResponse {
    pub enqueued: usize,
    pub deduplicated: usize,
    pub not_found: Vec<String>,
}

/// Bulk manual enqueue. Submissions for cases that already have a live job
/// of the same type collapse onto it; unknown case ids are reported back
/// rather than failing the batch.
async fn submit_jobs(
    State(state): State<AppState>,
    Json(request): Json<SubmitJobsRequest>,
) -> ApiResult<Json<SubmitJobsResponse>> {
    if !matches!(
        request.job_type.as_str(),
        JOB_PROGRESS | JOB_GENERAL | JOB_FULL
    ) {
        return Err(ApiError::BadRequest(format!(
            "unknown job type: {}",
            request.job_type
        )));
    }
    if request.case_ids.is_empty() {
        return Err(ApiError::BadRequest("caseIds is empty".to_string()));
    }

    let mut response = SubmitJobsResponse {
        enqueued: 0,
        deduplicated: 0,
        not_found: Vec::new(),
    };

    for case_id in &request.case_ids {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM legal_cases WHERE id = ?")
            .bind(case_id)
            .fetch_one(&state.db)
            .await
            .map_err(scourt_common::Error::from)?;
        if exists == 0 {
            response.not_found.push(case_id.clone());
            continue;
        }

        let job = NewJob {
            legal_case_id: Some(case_id.clone()),
            job_type: request.job_type.clone(),
            dedup_key: format!("{}:{case_id}", request.job_type),
            priority: PRIORITY_MANUAL,
            scheduled_at: Utc::now(),
            payload: Some(json!({ "triggerSource": "manual" })),
        };
        let outcome = store::enqueue(&state.db, &job).await?;
        if outcome.deduplicated {
            response.deduplicated += 1;
        } else {
            response.enqueued += 1;
        }
    }

    Ok(Json(response))
}

async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let status = store::queue_status(&state.db).await?;
    let recent_jobs = store::recent_jobs(&state.db, 20).await?;
    let recent_logs = store::recent_logs(&state.db, 20).await?;
    Ok(Json(json!({
        "by_status": status.by_status,
        "queued_by_type": status.queued_by_type,
        "wmonid_by_status": status.wmonid_by_status,
        "oldest_queued_age_seconds": status.oldest_queued_age_seconds,
        "recent_jobs": recent_jobs,
        "recent_logs": recent_logs,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use scourt_common::config::ServiceConfig;
    use scourt_common::db::init_memory_database;
    use sqlx::SqlitePool;
    use tower::ServiceExt;

    async fn seed_case(db: &SqlitePool, id: &str) {
        sqlx::query(
            "INSERT INTO legal_cases (id, case_number, court_name, party_name)
             VALUES (?, ?, '평택가정', '김철수')",
        )
        .bind(id)
        .bind(format!("2024드단{id}"))
        .execute(db)
        .await
        .unwrap();
    }

    fn post_jobs(body: serde_json::Value) -> Request<Body> {
        Request::post("/jobs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn bulk_submit_is_idempotent() {
        let db = init_memory_database().await.unwrap();
        seed_case(&db, "1").await;
        seed_case(&db, "2").await;
        let app = crate::build_router(AppState::new(db.clone(), ServiceConfig::for_tests()));

        let body = json!({ "caseIds": ["1", "2"] });
        let first = app
            .clone()
            .oneshot(post_jobs(body.clone()))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first = body_json(first).await;
        assert_eq!(first["enqueued"], 2);
        assert_eq!(first["deduplicated"], 0);

        let second = app.oneshot(post_jobs(body)).await.unwrap();
        let second = body_json(second).await;
        assert_eq!(second["enqueued"], 0);
        assert_eq!(second["deduplicated"], 2);

        let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_jobs")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(queued, 2);
    }

    #[tokio::test]
    async fn unknown_cases_reported_not_failed() {
        let db = init_memory_database().await.unwrap();
        seed_case(&db, "1").await;
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let response = app
            .oneshot(post_jobs(json!({ "caseIds": ["1", "ghost"] })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["enqueued"], 1);
        assert_eq!(body["notFound"], json!(["ghost"]));
    }

    #[tokio::test]
    async fn bad_job_type_rejected() {
        let db = init_memory_database().await.unwrap();
        let app = crate::build_router(AppState::new(db, ServiceConfig::for_tests()));

        let response = app
            .oneshot(post_jobs(json!({ "caseIds": ["1"], "jobType": "bogus" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn queue_status_counts_by_state() {
        let db = init_memory_database().await.unwrap();
        seed_case(&db, "1").await;
        let app = crate::build_router(AppState::new(db.clone(), ServiceConfig::for_tests()));

        app.clone()
            .oneshot(post_jobs(json!({ "caseIds": ["1"] })))
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::get("/queue/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["by_status"]["queued"], 1);
        assert_eq!(body["queued_by_type"]["progress"], 1);
        assert_eq!(body["recent_jobs"].as_array().unwrap().len(), 1);
    }
}
