//! Scheduler pass
//!
//! Runs on an external trigger (cron hitting the HTTP surface). Cases get a
//! deterministic initial slot derived from their id so a large portfolio
//! spreads evenly across the progress interval instead of stampeding; due
//! cases are enqueued and pushed one interval (plus jitter) forward. Identity
//! tokens nearing expiry get renewal jobs independently of case scheduling.

use crate::pool::wmonid;
use crate::queue::store::{self, NewJob, JOB_PROGRESS, PRIORITY_AUTO};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use scourt_common::db::models::LegalCase;
use scourt_common::settings::SyncSettings;
use scourt_common::Result;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SchedulerReport {
    pub candidates: usize,
    pub slotted: usize,
    pub queued_progress: usize,
    pub skipped_by_rule: usize,
    pub skipped_unlinked: usize,
    pub queued_renewals: usize,
    pub expired_tokens: u64,
    pub duration_ms: u64,
}

/// Deterministic minute offset within the progress interval for a case id.
pub fn hash_to_offset_minutes(case_id: &str, interval_minutes: i64) -> i64 {
    if interval_minutes <= 0 {
        return 0;
    }
    let digest = Sha256::digest(case_id.as_bytes());
    let mut value: u64 = 0;
    for byte in digest.iter().take(8) {
        value = (value << 8) | u64::from(*byte);
    }
    (value % interval_minutes as u64) as i64
}

/// The initial slot for a first-seen case: the hash offset on the interval
/// grid, pushed one interval forward when it lands in the past.
fn initial_slot(case_id: &str, now: DateTime<Utc>, interval_minutes: i64) -> DateTime<Utc> {
    let offset = hash_to_offset_minutes(case_id, interval_minutes);
    let grid_start_epoch =
        (now.timestamp() / 60 / interval_minutes.max(1)) * interval_minutes.max(1) * 60;
    let mut slot = DateTime::<Utc>::from_timestamp(grid_start_epoch + offset * 60, 0)
        .unwrap_or(now);
    if slot <= now {
        slot += Duration::minutes(interval_minutes);
    }
    slot
}

/// One scheduler pass over due cases and expiring identities.
pub async fn run_scheduler_pass(
    pool: &SqlitePool,
    settings: &SyncSettings,
    now: DateTime<Utc>,
) -> Result<SchedulerReport> {
    let started = std::time::Instant::now();
    let mut report = SchedulerReport::default();

    if !settings.auto_sync_enabled {
        tracing::info!("Auto sync disabled, scheduler pass is a no-op");
        return Ok(report);
    }

    let interval_minutes = settings.progress_interval_hours as i64 * 60;

    // over-fetch so filtered-out rows do not starve the batch; the
    // rule-driven filters run per row below
    let candidates = sqlx::query_as::<_, LegalCase>(
        "SELECT * FROM legal_cases
         WHERE auto_sync_enabled = 1
           AND (cooldown_until IS NULL OR cooldown_until <= ?)
         ORDER BY next_progress_sync_at ASC
         LIMIT ?",
    )
    .bind(now)
    .bind(settings.scheduler_batch_size as i64 * 2)
    .fetch_all(pool)
    .await?;

    report.candidates = candidates.len();
    let rule = &settings.active_case_rule;

    for case in &candidates {
        if report.queued_progress >= settings.scheduler_batch_size as usize {
            break;
        }

        if !rule.status_qualifies(&case.status) {
            report.skipped_by_rule += 1;
            continue;
        }
        if rule.exclude_final_result
            && (case.final_result.is_some() || case.final_result_date.is_some())
        {
            report.skipped_by_rule += 1;
            continue;
        }

        let Some(next_at) = case.next_progress_sync_at else {
            let slot = initial_slot(&case.id, now, interval_minutes);
            sqlx::query(
                "UPDATE legal_cases SET next_progress_sync_at = ?, updated_at = datetime('now')
                 WHERE id = ?",
            )
            .bind(slot)
            .bind(&case.id)
            .execute(pool)
            .await?;
            report.slotted += 1;
            continue;
        };

        if next_at > now {
            continue;
        }

        // progress sync wants a bound identity; when the rule requires one,
        // unlinked cases wait for their first full sync to establish it
        if rule.require_linked {
            let link = crate::pool::profiles::find_link(pool, &case.case_number).await?;
            let linked = matches!(
                &link,
                Some((l, Some(_))) if l.enc_cs_no.is_some()
            );
            if !linked {
                report.skipped_unlinked += 1;
                continue;
            }
        }

        let outcome = store::enqueue(
            pool,
            &NewJob {
                scheduled_at: now,
                ..NewJob::case_sync(&case.id, JOB_PROGRESS, PRIORITY_AUTO)
            },
        )
        .await?;
        if !outcome.deduplicated {
            report.queued_progress += 1;
        }

        let jitter = if settings.progress_jitter_minutes > 0 {
            rand::thread_rng().gen_range(0..settings.progress_jitter_minutes as i64)
        } else {
            0
        };
        sqlx::query(
            "UPDATE legal_cases SET next_progress_sync_at = ?, updated_at = datetime('now')
             WHERE id = ?",
        )
        .bind(now + Duration::minutes(interval_minutes + jitter))
        .bind(&case.id)
        .execute(pool)
        .await?;
    }

    report.expired_tokens = wmonid::cleanup_expired(pool).await?;

    if settings.wmonid.auto_rotate_enabled {
        let due = wmonid::expiring_tokens(pool, settings.wmonid.renewal_before_days).await?;
        for token in &due {
            let outcome = store::enqueue(pool, &NewJob::wmonid_renewal(&token.id)).await?;
            if !outcome.deduplicated {
                report.queued_renewals += 1;
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    store::log(
        pool,
        None,
        "info",
        "scheduler pass",
        Some(&serde_json::json!({
            "candidates": report.candidates,
            "slotted": report.slotted,
            "queuedProgress": report.queued_progress,
            "skippedByRule": report.skipped_by_rule,
            "skippedUnlinked": report.skipped_unlinked,
            "queuedRenewals": report.queued_renewals,
            "expiredTokens": report.expired_tokens,
            "durationMs": report.duration_ms,
        })),
    )
    .await?;

    tracing::info!(
        candidates = report.candidates,
        queued = report.queued_progress,
        renewals = report.queued_renewals,
        "Scheduler pass complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{profiles, wmonid};
    use scourt_common::db::init_memory_database;
    use scourt_common::settings::PoolSettings;

    async fn seed_case(pool: &SqlitePool, id: &str, case_number: &str) {
        sqlx::query(
            "INSERT INTO legal_cases (id, case_number, court_name, party_name, status)
             VALUES (?, ?, '평택가정', '김철수', 'active')",
        )
        .bind(id)
        .bind(case_number)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn link(pool: &SqlitePool, case_number: &str) {
        let ps = PoolSettings::default();
        let profile = profiles::acquire_profile(pool, &ps).await.unwrap();
        profiles::link_case(pool, &profile.id, case_number, "평택가정", Some("enc"), &ps)
            .await
            .unwrap();
        wmonid::record_issued(pool, &profile.id, "WM-1", None).await.unwrap();
    }

    #[test]
    fn offsets_are_deterministic_and_bounded() {
        let a = hash_to_offset_minutes("case-1", 360);
        let b = hash_to_offset_minutes("case-1", 360);
        assert_eq!(a, b);
        assert!((0..360).contains(&a));
        // different ids land on different slots often enough to matter
        let c = hash_to_offset_minutes("case-2", 360);
        assert!((0..360).contains(&c));
    }

    #[test]
    fn initial_slot_is_grid_aligned_and_future() {
        let now = Utc::now();
        let slot = initial_slot("case-1", now, 360);
        assert!(slot > now);
        let offset = hash_to_offset_minutes("case-1", 360);
        assert_eq!((slot.timestamp() / 60 - offset) % 360, 0);
    }

    #[tokio::test]
    async fn first_pass_slots_second_pass_enqueues() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        link(&pool, "2024드단1").await;
        let settings = SyncSettings::default();
        let now = Utc::now();

        let first = run_scheduler_pass(&pool, &settings, now).await.unwrap();
        assert_eq!(first.slotted, 1);
        assert_eq!(first.queued_progress, 0);

        // jump past the assigned slot
        let second = run_scheduler_pass(&pool, &settings, now + Duration::hours(13))
            .await
            .unwrap();
        assert_eq!(second.queued_progress, 1);
    }

    #[tokio::test]
    async fn repeated_pass_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        link(&pool, "2024드단1").await;
        let settings = SyncSettings::default();
        let now = Utc::now();

        run_scheduler_pass(&pool, &settings, now).await.unwrap();
        let later = now + Duration::hours(13);
        run_scheduler_pass(&pool, &settings, later).await.unwrap();
        // same trigger again: the case was pushed forward and the job deduped
        let again = run_scheduler_pass(&pool, &settings, later).await.unwrap();
        assert_eq!(again.queued_progress, 0);

        let queued: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sync_jobs WHERE status = 'queued'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(queued, 1);
    }

    #[tokio::test]
    async fn unlinked_cases_are_skipped() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        let settings = SyncSettings::default();
        let now = Utc::now();

        run_scheduler_pass(&pool, &settings, now).await.unwrap();
        let report = run_scheduler_pass(&pool, &settings, now + Duration::hours(13))
            .await
            .unwrap();
        assert_eq!(report.queued_progress, 0);
        assert_eq!(report.skipped_unlinked, 1);
    }

    #[tokio::test]
    async fn final_result_cases_are_excluded() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        sqlx::query("UPDATE legal_cases SET final_result = '원고승' WHERE id = 'case-1'")
            .execute(&pool)
            .await
            .unwrap();

        let report = run_scheduler_pass(&pool, &SyncSettings::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.skipped_by_rule, 1);
        assert_eq!(report.slotted, 0);
        assert_eq!(report.queued_progress, 0);
    }

    #[tokio::test]
    async fn status_block_list_filters_cases() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        sqlx::query("UPDATE legal_cases SET status = 'closed' WHERE id = 'case-1'")
            .execute(&pool)
            .await
            .unwrap();

        let mut settings = SyncSettings::default();
        settings.active_case_rule.status_allow_list.clear();
        settings.active_case_rule.status_block_list = vec!["closed".to_string()];

        let report = run_scheduler_pass(&pool, &settings, Utc::now()).await.unwrap();
        assert_eq!(report.skipped_by_rule, 1);
    }

    #[tokio::test]
    async fn optional_link_requirement_enqueues_unlinked_cases() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        let mut settings = SyncSettings::default();
        settings.active_case_rule.require_linked = false;
        let now = Utc::now();

        run_scheduler_pass(&pool, &settings, now).await.unwrap();
        let report = run_scheduler_pass(&pool, &settings, now + Duration::hours(13))
            .await
            .unwrap();
        assert_eq!(report.queued_progress, 1);
        assert_eq!(report.skipped_unlinked, 0);
    }

    #[tokio::test]
    async fn disabled_master_switch_is_a_noop() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1", "2024드단1").await;
        let settings = SyncSettings {
            auto_sync_enabled: false,
            ..SyncSettings::default()
        };
        let report = run_scheduler_pass(&pool, &settings, Utc::now()).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert_eq!(report.slotted, 0);
    }

    #[tokio::test]
    async fn expiring_tokens_get_renewal_jobs() {
        let pool = init_memory_database().await.unwrap();
        let ps = PoolSettings::default();
        let profile = profiles::acquire_profile(&pool, &ps).await.unwrap();
        wmonid::record_issued(&pool, &profile.id, "WM-1", None).await.unwrap();
        sqlx::query("UPDATE scourt_wmonid_tokens SET expires_at = datetime('now', '+5 days')")
            .execute(&pool)
            .await
            .unwrap();

        let report = run_scheduler_pass(&pool, &SyncSettings::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(report.queued_renewals, 1);

        // renewal jobs dedup like everything else
        let again = run_scheduler_pass(&pool, &SyncSettings::default(), Utc::now())
            .await
            .unwrap();
        assert_eq!(again.queued_renewals, 0);
    }
}
