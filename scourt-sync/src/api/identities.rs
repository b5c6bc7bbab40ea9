//! Identity pool inspection and rotation

use crate::error::{ApiError, ApiResult};
use crate::pool::{profiles, wmonid};
use crate::queue::store::{self, NewJob};
use crate::AppState;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use scourt_common::settings::SyncSettings;
use serde::{Deserialize, Serialize};
use serde_json::json;

pub fn identity_routes() -> Router<AppState> {
    Router::new()
        .route("/identities/rotate", post(rotate))
        .route("/pool/status", get(pool_status))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateRequest {
    #[serde(default)]
    pub token_ids: Vec<String>,
    #[serde(default)]
    pub force_all_expiring: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateResponse {
    pub enqueued: usize,
    pub deduplicated: usize,
}

/// Enqueue renewal jobs for the named tokens, or for every token within the
/// configured renewal window. Rotation itself happens on the worker.
async fn rotate(
    State(state): State<AppState>,
    Json(request): Json<RotateRequest>,
) -> ApiResult<Json<RotateResponse>> {
    let settings = SyncSettings::load(&state.db).await?;
    let token_ids = if request.force_all_expiring {
        wmonid::expiring_tokens(&state.db, settings.wmonid.renewal_before_days)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect()
    } else {
        if !settings.wmonid.early_rotate_enabled {
            for token_id in &request.token_ids {
                reject_if_outside_window(
                    &state.db,
                    token_id,
                    settings.wmonid.renewal_before_days,
                )
                .await?;
            }
        }
        request.token_ids
    };

    if token_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "no tokens to rotate: pass tokenIds or forceAllExpiring".to_string(),
        ));
    }

    let mut response = RotateResponse {
        enqueued: 0,
        deduplicated: 0,
    };
    for token_id in &token_ids {
        let outcome = store::enqueue(&state.db, &NewJob::wmonid_renewal(token_id)).await?;
        if outcome.deduplicated {
            response.deduplicated += 1;
        } else {
            response.enqueued += 1;
        }
    }

    Ok(Json(response))
}

/// Unless early rotation is enabled, an active token outside the renewal
/// window cannot be rotated by hand.
async fn reject_if_outside_window(
    db: &sqlx::SqlitePool,
    token_id: &str,
    lead_days: u32,
) -> ApiResult<()> {
    let row: Option<(String, chrono::DateTime<chrono::Utc>)> = sqlx::query_as(
        "SELECT status, expires_at FROM scourt_wmonid_tokens WHERE id = ?",
    )
    .bind(token_id)
    .fetch_optional(db)
    .await
    .map_err(scourt_common::Error::from)?;

    let Some((status, expires_at)) = row else {
        return Err(ApiError::NotFound(format!("token {token_id}")));
    };
    let window = chrono::Utc::now() + chrono::Duration::days(lead_days as i64);
    if status == "active" && expires_at > window {
        return Err(ApiError::BadRequest(format!(
            "token {token_id} is not near expiry; enable earlyRotateEnabled to rotate it now"
        )));
    }
    Ok(())
}

async fn pool_status(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let settings = SyncSettings::load(&state.db).await?;
    let usage = profiles::usage(&state.db, &settings.pool).await?;
    let status = store::queue_status(&state.db).await?;

    Ok(Json(json!({
        "profiles": usage.profiles,
        "maxProfiles": usage.max_profiles,
        "linkedCases": usage.linked_cases,
        "capacity": usage.capacity,
        "tokensByStatus": status.wmonid_by_status,
    })))
}
