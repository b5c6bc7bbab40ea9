//! Browser-identity (WMONID) lifecycle
//!
//! WMONID cookies live for two years; every stored encrypted case number is
//! bound to one. Tokens move through active -> expiring -> migrating ->
//! expired. Rotation mints a replacement identity and re-derives every
//! encrypted number under it before the old token is retired; a partial
//! migration leaves the old token expiring so the next pass retries.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use scourt_common::db::models::{CaseLink, WmonidToken};
use scourt_common::{Error, Result};
use sqlx::SqlitePool;
use uuid::Uuid;

// fallback when the portal cookie carries no Expires attribute
const WMONID_LIFETIME_DAYS: i64 = 730;

/// Record a freshly issued identity for a profile. Any previous live token
/// of the profile is retired. `expires_at` is the cookie's own expiry when
/// the portal sent one.
pub async fn record_issued(
    pool: &SqlitePool,
    profile_id: &str,
    wmonid: &str,
    expires_at: Option<DateTime<Utc>>,
) -> Result<WmonidToken> {
    sqlx::query(
        "UPDATE scourt_wmonid_tokens
         SET status = 'expired', retired_at = ?
         WHERE profile_id = ? AND status IN ('active', 'expiring', 'migrating')",
    )
    .bind(Utc::now())
    .bind(profile_id)
    .execute(pool)
    .await?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO scourt_wmonid_tokens (id, profile_id, wmonid, status, issued_at, expires_at)
         VALUES (?, ?, ?, 'active', ?, ?)",
    )
    .bind(&id)
    .bind(profile_id)
    .bind(wmonid)
    .bind(now)
    .bind(expires_at.unwrap_or(now + Duration::days(WMONID_LIFETIME_DAYS)))
    .execute(pool)
    .await?;

    sqlx::query_as::<_, WmonidToken>("SELECT * FROM scourt_wmonid_tokens WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .map_err(Error::from)
}

/// Mark active tokens inside the renewal window as expiring and return every
/// token currently needing renewal.
pub async fn expiring_tokens(pool: &SqlitePool, lead_days: u32) -> Result<Vec<WmonidToken>> {
    let cutoff = Utc::now() + Duration::days(lead_days as i64);

    sqlx::query(
        "UPDATE scourt_wmonid_tokens SET status = 'expiring'
         WHERE status = 'active' AND expires_at <= ?",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, WmonidToken>(
        "SELECT * FROM scourt_wmonid_tokens
         WHERE status IN ('active', 'expiring') AND expires_at <= ?
         ORDER BY expires_at ASC",
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .map_err(Error::from)
}

/// Retire tokens already past their expiry.
pub async fn cleanup_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE scourt_wmonid_tokens
         SET status = 'expired', retired_at = ?
         WHERE status IN ('active', 'expiring') AND expires_at <= ?",
    )
    .bind(Utc::now())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Re-derives a case link's encrypted number under a new identity.
/// Production wires this to the sync executor's search path; tests stub it.
#[async_trait]
pub trait CaseRelinker: Send + Sync {
    async fn relink(&self, link: &CaseLink, new_wmonid: &str) -> Result<String>;
}

/// Outcome of one token rotation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RotationOutcome {
    pub token_id: String,
    pub new_token_id: String,
    pub links_total: usize,
    pub links_migrated: usize,
    pub completed: bool,
}

/// Rotate one identity token: mint a replacement, migrate every case link of
/// the profile to it, and retire the old token only when every link made it.
pub async fn rotate_token(
    pool: &SqlitePool,
    token_id: &str,
    new_wmonid: &str,
    new_expires_at: Option<DateTime<Utc>>,
    relinker: &dyn CaseRelinker,
) -> Result<RotationOutcome> {
    let token = sqlx::query_as::<_, WmonidToken>(
        "SELECT * FROM scourt_wmonid_tokens WHERE id = ?",
    )
    .bind(token_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::InvalidInput(format!("unknown wmonid token: {token_id}")))?;

    sqlx::query("UPDATE scourt_wmonid_tokens SET status = 'migrating' WHERE id = ?")
        .bind(token_id)
        .execute(pool)
        .await?;

    let new_token = record_issued(pool, &token.profile_id, new_wmonid, new_expires_at).await?;

    let links = sqlx::query_as::<_, CaseLink>(
        "SELECT * FROM scourt_case_links WHERE profile_id = ? ORDER BY created_at ASC",
    )
    .bind(&token.profile_id)
    .fetch_all(pool)
    .await?;

    let mut migrated = 0usize;
    for link in &links {
        match relinker.relink(link, new_wmonid).await {
            Ok(enc_cs_no) => {
                super::profiles::update_enc_cs_no(pool, &link.id, &enc_cs_no).await?;
                migrated += 1;
            }
            Err(e) => {
                tracing::warn!(
                    case_number = %link.case_number,
                    error = %e,
                    "Case link migration failed, leaving old identity in place"
                );
            }
        }
    }

    let completed = migrated == links.len();
    if completed {
        sqlx::query(
            "UPDATE scourt_wmonid_tokens SET status = 'expired', retired_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(token_id)
        .execute(pool)
        .await?;
    } else {
        // retry on the next renewal pass
        sqlx::query("UPDATE scourt_wmonid_tokens SET status = 'expiring' WHERE id = ?")
            .bind(token_id)
            .execute(pool)
            .await?;
    }

    Ok(RotationOutcome {
        token_id: token_id.to_string(),
        new_token_id: new_token.id,
        links_total: links.len(),
        links_migrated: migrated,
        completed,
    })
}
