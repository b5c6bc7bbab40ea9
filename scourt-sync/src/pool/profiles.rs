//! Profile pool management

use chrono::Utc;
use scourt_common::db::models::{CaseLink, ScourtProfile};
use scourt_common::settings::PoolSettings;
use scourt_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Pool usage numbers, reported in capacity errors and the status API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolUsage {
    pub profiles: i64,
    pub max_profiles: i64,
    pub linked_cases: i64,
    pub capacity: i64,
}

/// Pick the profile a new case should be linked under: the active profile
/// with the fewest linked cases that still has room. When every profile is
/// full and the pool has room, a new profile is created.
pub async fn acquire_profile(pool: &SqlitePool, settings: &PoolSettings) -> Result<ScourtProfile> {
    let candidate = sqlx::query_as::<_, ScourtProfile>(
        "SELECT * FROM scourt_profiles
         WHERE status = 'active' AND case_count < ?
         ORDER BY case_count ASC, created_at ASC
         LIMIT 1",
    )
    .bind(settings.max_cases_per_profile as i64)
    .fetch_optional(pool)
    .await?;

    if let Some(profile) = candidate {
        return Ok(profile);
    }

    let profile_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scourt_profiles")
        .fetch_one(pool)
        .await?;

    if profile_count >= settings.max_profiles as i64 {
        let usage = usage(pool, settings).await?;
        return Err(Error::PoolExhausted(format!(
            "{}/{} profiles, {}/{} cases linked",
            usage.profiles, usage.max_profiles, usage.linked_cases, usage.capacity
        )));
    }

    create_profile(pool, &format!("profile-{}", profile_count + 1)).await
}

pub async fn create_profile(pool: &SqlitePool, label: &str) -> Result<ScourtProfile> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO scourt_profiles (id, label, status, case_count) VALUES (?, ?, 'active', 0)",
    )
    .bind(&id)
    .bind(label)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, ScourtProfile>("SELECT * FROM scourt_profiles WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await
        .map_err(Error::from)
}

/// Bind a case to a profile. Re-linking an existing binding refreshes the
/// encrypted number instead of creating a second row; a brand-new binding
/// counts against the profile's capacity.
pub async fn link_case(
    pool: &SqlitePool,
    profile_id: &str,
    case_number: &str,
    court_name: &str,
    enc_cs_no: Option<&str>,
    settings: &PoolSettings,
) -> Result<CaseLink> {
    let existing = sqlx::query_scalar::<_, String>(
        "SELECT id FROM scourt_case_links WHERE profile_id = ? AND case_number = ?",
    )
    .bind(profile_id)
    .bind(case_number)
    .fetch_optional(pool)
    .await?;

    if existing.is_none() {
        let case_count: i64 =
            sqlx::query_scalar("SELECT case_count FROM scourt_profiles WHERE id = ?")
                .bind(profile_id)
                .fetch_one(pool)
                .await?;
        if case_count >= settings.max_cases_per_profile as i64 {
            return Err(Error::ProfileFull(format!(
                "profile {profile_id}: {case_count}/{} cases",
                settings.max_cases_per_profile
            )));
        }
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO scourt_case_links (id, profile_id, case_number, court_name, enc_cs_no)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(profile_id, case_number) DO UPDATE SET
             enc_cs_no = COALESCE(excluded.enc_cs_no, scourt_case_links.enc_cs_no),
             court_name = excluded.court_name,
             updated_at = datetime('now')",
    )
    .bind(&id)
    .bind(profile_id)
    .bind(case_number)
    .bind(court_name)
    .bind(enc_cs_no)
    .execute(pool)
    .await?;

    if existing.is_none() {
        sqlx::query(
            "UPDATE scourt_profiles
             SET case_count = case_count + 1, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(profile_id)
        .execute(pool)
        .await?;
    }
    derive_status(pool, profile_id, settings).await?;

    sqlx::query_as::<_, CaseLink>(
        "SELECT * FROM scourt_case_links WHERE profile_id = ? AND case_number = ?",
    )
    .bind(profile_id)
    .bind(case_number)
    .fetch_one(pool)
    .await
    .map_err(Error::from)
}

/// Re-derive a profile's status from its case count: `full` exactly at the
/// capacity bound, `active` below it. Disabled profiles are left alone.
async fn derive_status(
    pool: &SqlitePool,
    profile_id: &str,
    settings: &PoolSettings,
) -> Result<()> {
    sqlx::query(
        "UPDATE scourt_profiles
         SET status = CASE WHEN case_count >= ?1 THEN 'full' ELSE 'active' END,
             updated_at = datetime('now')
         WHERE id = ?2 AND status IN ('active', 'full')",
    )
    .bind(settings.max_cases_per_profile as i64)
    .bind(profile_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// The link for a case, along with the active WMONID of its profile.
pub async fn find_link(
    pool: &SqlitePool,
    case_number: &str,
) -> Result<Option<(CaseLink, Option<String>)>> {
    let link = sqlx::query_as::<_, CaseLink>(
        "SELECT * FROM scourt_case_links WHERE case_number = ? ORDER BY created_at ASC LIMIT 1",
    )
    .bind(case_number)
    .fetch_optional(pool)
    .await?;

    let Some(link) = link else {
        return Ok(None);
    };

    let wmonid = sqlx::query_scalar::<_, String>(
        "SELECT wmonid FROM scourt_wmonid_tokens
         WHERE profile_id = ? AND status IN ('active', 'expiring')
         ORDER BY issued_at DESC LIMIT 1",
    )
    .bind(&link.profile_id)
    .fetch_optional(pool)
    .await?;

    Ok(Some((link, wmonid)))
}

/// Touch a link's access bookkeeping after a successful portal call.
pub async fn record_access(pool: &SqlitePool, link_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE scourt_case_links SET last_accessed_at = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(link_id)
    .execute(pool)
    .await?;

    sqlx::query(
        "UPDATE scourt_profiles SET last_used_at = ?, updated_at = datetime('now')
         WHERE id = (SELECT profile_id FROM scourt_case_links WHERE id = ?)",
    )
    .bind(Utc::now())
    .bind(link_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Store a freshly derived encrypted case number on a link.
pub async fn update_enc_cs_no(pool: &SqlitePool, link_id: &str, enc_cs_no: &str) -> Result<()> {
    sqlx::query(
        "UPDATE scourt_case_links SET enc_cs_no = ?, updated_at = datetime('now') WHERE id = ?",
    )
    .bind(enc_cs_no)
    .bind(link_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn usage(pool: &SqlitePool, settings: &PoolSettings) -> Result<PoolUsage> {
    let row = sqlx::query(
        "SELECT
            (SELECT COUNT(*) FROM scourt_profiles) AS profiles,
            (SELECT COUNT(*) FROM scourt_case_links) AS linked_cases",
    )
    .fetch_one(pool)
    .await?;

    Ok(PoolUsage {
        profiles: row.get("profiles"),
        max_profiles: settings.max_profiles as i64,
        linked_cases: row.get("linked_cases"),
        capacity: settings.max_profiles as i64 * settings.max_cases_per_profile as i64,
    })
}
