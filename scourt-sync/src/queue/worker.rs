//! Worker pass
//!
//! Claims a batch of due jobs and drains them under the portal rate budget.
//! Failures retry with exponential backoff; capacity failures use the longer
//! fixed floor since an exhausted pool does not recover in seconds. A
//! successful auto progress sync that saw changes escalates to a general
//! sync so structural updates (parties, deadlines) are picked up promptly.

use crate::queue::store::{
    self, JOB_GENERAL, JOB_PROGRESS, PRIORITY_ESCALATED, PRIORITY_MANUAL,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use governor::{Quota, RateLimiter};
use rand::Rng;
use scourt_common::db::models::SyncJob;
use scourt_common::settings::SyncSettings;
use scourt_common::{Error, Result, RetryClass};
use sqlx::SqlitePool;
use std::num::NonZeroU32;

/// What one executed job reports back.
#[derive(Debug, Clone, Default)]
pub struct JobOutcome {
    /// True when the sync detected changes worth escalating
    pub changed: bool,
    pub summary: String,
}

/// Executes one claimed job. Production wires this to the case sync
/// executor; tests substitute deterministic stubs.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &SyncJob) -> Result<JobOutcome>;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorkerReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub escalated: usize,
    pub duration_ms: u64,
}

/// Retry delay in milliseconds: exponential in the attempt count with the
/// exponent capped, plus 5-15 s of jitter, bounded by the configured max.
pub fn backoff_delay_ms(attempts: i64, base_ms: u64, max_ms: u64, jitter_ms: u64) -> u64 {
    let exponent = attempts.clamp(1, 6) as u32 - 1;
    let exponential = base_ms.saturating_mul(1u64 << exponent);
    exponential.saturating_add(jitter_ms).min(max_ms)
}

fn retry_jitter_ms() -> u64 {
    rand::thread_rng().gen_range(5_000..15_000)
}

fn is_manual(job: &SyncJob) -> bool {
    if job.priority >= PRIORITY_MANUAL {
        return true;
    }
    job.payload
        .as_deref()
        .and_then(|p| serde_json::from_str::<serde_json::Value>(p).ok())
        .map(|v| v["triggerSource"].as_str() == Some("manual"))
        .unwrap_or(false)
}

/// One worker pass. Jobs run sequentially inside the pass; concurrency
/// across cases comes from `worker_concurrency` parallel lanes over the
/// claimed batch.
pub async fn run_worker_pass(
    pool: &SqlitePool,
    settings: &SyncSettings,
    executor: &dyn JobExecutor,
    worker_id: &str,
) -> Result<WorkerReport> {
    let started = std::time::Instant::now();
    let now = Utc::now();

    let jobs = store::claim_batch(pool, worker_id, settings.worker_batch_size, now).await?;
    let mut report = WorkerReport {
        claimed: jobs.len(),
        ..WorkerReport::default()
    };

    let per_minute = NonZeroU32::new(settings.rate_limit_per_minute.max(1))
        .unwrap_or(NonZeroU32::MIN);
    let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

    let concurrency = settings.worker_concurrency.max(1) as usize;
    let results = futures::stream::iter(jobs.into_iter().map(|job| {
        let limiter = &limiter;
        async move {
            let disposition = run_one_job(pool, settings, executor, limiter, &job).await;
            (job, disposition)
        }
    }))
    .buffer_unordered(concurrency)
    .collect::<Vec<_>>()
    .await;

    for (job, disposition) in results {
        match disposition {
            Ok(JobDisposition::Succeeded { escalated }) => {
                report.succeeded += 1;
                if escalated {
                    report.escalated += 1;
                }
            }
            Ok(JobDisposition::Requeued) => report.requeued += 1,
            Ok(JobDisposition::Failed) => report.failed += 1,
            Ok(JobDisposition::Cancelled) => report.cancelled += 1,
            Err(e) => {
                // store-level failure, not job-level; surface and keep going
                tracing::error!(job_id = %job.id, error = %e, "Job bookkeeping failed");
                report.failed += 1;
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    store::log(
        pool,
        None,
        "info",
        "worker pass",
        Some(&serde_json::json!({
            "workerId": worker_id,
            "claimed": report.claimed,
            "succeeded": report.succeeded,
            "requeued": report.requeued,
            "failed": report.failed,
            "cancelled": report.cancelled,
            "escalated": report.escalated,
            "durationMs": report.duration_ms,
        })),
    )
    .await?;

    tracing::info!(
        claimed = report.claimed,
        succeeded = report.succeeded,
        requeued = report.requeued,
        failed = report.failed,
        "Worker pass complete"
    );

    Ok(report)
}

enum JobDisposition {
    Succeeded { escalated: bool },
    Requeued,
    Failed,
    Cancelled,
}

async fn run_one_job(
    pool: &SqlitePool,
    settings: &SyncSettings,
    executor: &dyn JobExecutor,
    limiter: &governor::DefaultDirectRateLimiter,
    job: &SyncJob,
) -> Result<JobDisposition> {
    // auto progress jobs honor the per-case cooldown; manual triggers do not
    if job.job_type == JOB_PROGRESS && !is_manual(job) {
        if let Some(case_id) = &job.legal_case_id {
            let cooldown: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
                "SELECT cooldown_until FROM legal_cases WHERE id = ?",
            )
            .bind(case_id)
            .fetch_optional(pool)
            .await?;
            if let Some(Some(until)) = cooldown {
                if until > Utc::now() {
                    store::cancel(pool, &job.id, "case in cooldown").await?;
                    store::log(pool, Some(&job.id), "info", "skipped: cooldown", None).await?;
                    return Ok(JobDisposition::Cancelled);
                }
            }
        }
    }

    limiter.until_ready().await;
    let jitter = {
        let range = &settings.request_jitter_ms;
        if range.max_ms > range.min_ms {
            rand::thread_rng().gen_range(range.min_ms..range.max_ms)
        } else {
            range.min_ms
        }
    };
    tokio::time::sleep(std::time::Duration::from_millis(jitter)).await;

    match executor.execute(job).await {
        Ok(outcome) => {
            store::complete(pool, &job.id).await?;
            store::log(
                pool,
                Some(&job.id),
                "info",
                "succeeded",
                Some(&serde_json::json!({
                    "changed": outcome.changed,
                    "summary": outcome.summary,
                })),
            )
            .await?;

            apply_cooldown(pool, settings, job).await?;
            let escalated = maybe_escalate(pool, settings, job, &outcome).await?;
            Ok(JobDisposition::Succeeded { escalated })
        }
        Err(e) => handle_failure(pool, settings, job, e).await,
    }
}

/// Stamp the per-case rest period after a successful sync. Manual triggers
/// get the shorter window so operators can re-run soon after.
async fn apply_cooldown(
    pool: &SqlitePool,
    settings: &SyncSettings,
    job: &SyncJob,
) -> Result<()> {
    let Some(case_id) = &job.legal_case_id else {
        return Ok(());
    };
    let minutes = if is_manual(job) {
        settings.manual_cooldown_minutes
    } else {
        settings.auto_cooldown_minutes
    };
    let until = Utc::now() + Duration::minutes(minutes as i64);
    sqlx::query(
        "UPDATE legal_cases SET cooldown_until = ?, updated_at = datetime('now') WHERE id = ?",
    )
    .bind(until)
    .bind(case_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// A successful auto progress sync with changes escalates to a general sync
/// when the last one is older than the general backoff window.
async fn maybe_escalate(
    pool: &SqlitePool,
    settings: &SyncSettings,
    job: &SyncJob,
    outcome: &JobOutcome,
) -> Result<bool> {
    if job.job_type != JOB_PROGRESS || !outcome.changed || is_manual(job) {
        return Ok(false);
    }
    let Some(case_id) = &job.legal_case_id else {
        return Ok(false);
    };

    let last_general: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
        "SELECT last_general_sync_at FROM legal_cases WHERE id = ?",
    )
    .bind(case_id)
    .fetch_optional(pool)
    .await?;

    let threshold = Utc::now() - Duration::hours(settings.general_backoff_hours as i64);
    let recent_enough = matches!(last_general, Some(Some(at)) if at > threshold);
    if recent_enough {
        return Ok(false);
    }

    let outcome = store::enqueue(
        pool,
        &store::NewJob::case_sync(case_id, JOB_GENERAL, PRIORITY_ESCALATED),
    )
    .await?;
    Ok(!outcome.deduplicated)
}

async fn handle_failure(
    pool: &SqlitePool,
    settings: &SyncSettings,
    job: &SyncJob,
    error: Error,
) -> Result<JobDisposition> {
    let class = error.retry_class();
    let out_of_attempts = job.attempts >= settings.max_retries as i64;

    if class == RetryClass::Terminal || out_of_attempts {
        store::fail(pool, &job.id, &error.to_string()).await?;
        store::log(
            pool,
            Some(&job.id),
            "error",
            "failed",
            Some(&serde_json::json!({
                "error": error.to_string(),
                "attempts": job.attempts,
                "terminal": class == RetryClass::Terminal,
            })),
        )
        .await?;
        return Ok(JobDisposition::Failed);
    }

    let delay_ms = match class {
        RetryClass::Capacity => settings.capacity_backoff_ms,
        _ => backoff_delay_ms(
            job.attempts,
            settings.backoff_base_ms,
            settings.backoff_max_ms,
            retry_jitter_ms(),
        ),
    };
    let retry_at = Utc::now() + Duration::milliseconds(delay_ms as i64);

    store::requeue(pool, &job.id, retry_at, &error.to_string()).await?;
    store::log(
        pool,
        Some(&job.id),
        "warn",
        "requeued",
        Some(&serde_json::json!({
            "error": error.to_string(),
            "attempts": job.attempts,
            "retryInMs": delay_ms,
        })),
    )
    .await?;
    Ok(JobDisposition::Requeued)
}
