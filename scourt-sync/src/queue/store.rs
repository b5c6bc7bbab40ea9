//! Job store
//!
//! Jobs are rows in `sync_jobs`. Enqueueing is idempotent: the partial
//! unique index on `dedup_key` over live rows turns a duplicate insert into
//! a no-op, so schedulers and API callers can re-submit freely. Claims go
//! through a single `UPDATE ... RETURNING` so concurrent workers never pick
//! up the same job.

use chrono::{DateTime, Utc};
use scourt_common::db::models::{SyncJob, SyncLog};
use scourt_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

pub const JOB_PROGRESS: &str = "progress";
pub const JOB_GENERAL: &str = "general";
pub const JOB_FULL: &str = "full";
pub const JOB_WMONID_RENEWAL: &str = "wmonid_renewal";

pub const PRIORITY_AUTO: i64 = 0;
pub const PRIORITY_ESCALATED: i64 = 1;
pub const PRIORITY_RENEWAL: i64 = 5;
pub const PRIORITY_MANUAL: i64 = 10;

/// A job to enqueue.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub legal_case_id: Option<String>,
    pub job_type: String,
    pub dedup_key: String,
    pub priority: i64,
    pub scheduled_at: DateTime<Utc>,
    pub payload: Option<serde_json::Value>,
}

impl NewJob {
    pub fn case_sync(case_id: &str, job_type: &str, priority: i64) -> Self {
        Self {
            legal_case_id: Some(case_id.to_string()),
            job_type: job_type.to_string(),
            dedup_key: format!("{job_type}:{case_id}"),
            priority,
            scheduled_at: Utc::now(),
            payload: None,
        }
    }

    pub fn wmonid_renewal(token_id: &str) -> Self {
        Self {
            legal_case_id: None,
            job_type: JOB_WMONID_RENEWAL.to_string(),
            dedup_key: format!("wmonid:{token_id}"),
            priority: PRIORITY_RENEWAL,
            scheduled_at: Utc::now(),
            payload: Some(serde_json::json!({ "tokenId": token_id })),
        }
    }
}

/// Result of an enqueue attempt.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EnqueueOutcome {
    pub job_id: Option<String>,
    /// True when an equivalent live job already existed
    pub deduplicated: bool,
}

/// Insert a job; a live job with the same dedup key makes this a no-op.
pub async fn enqueue(pool: &SqlitePool, job: &NewJob) -> Result<EnqueueOutcome> {
    let id = Uuid::new_v4().to_string();
    let payload = match &job.payload {
        Some(v) => Some(
            serde_json::to_string(v)
                .map_err(|e| Error::Internal(format!("payload serialize: {e}")))?,
        ),
        None => None,
    };

    let result = sqlx::query(
        "INSERT INTO sync_jobs (id, legal_case_id, job_type, dedup_key, status, priority, scheduled_at, payload)
         VALUES (?, ?, ?, ?, 'queued', ?, ?, ?)
         ON CONFLICT(dedup_key) WHERE status IN ('queued', 'running') DO NOTHING",
    )
    .bind(&id)
    .bind(&job.legal_case_id)
    .bind(&job.job_type)
    .bind(&job.dedup_key)
    .bind(job.priority)
    .bind(job.scheduled_at)
    .bind(payload)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        Ok(EnqueueOutcome {
            job_id: None,
            deduplicated: true,
        })
    } else {
        Ok(EnqueueOutcome {
            job_id: Some(id),
            deduplicated: false,
        })
    }
}

/// Claim up to `limit` due jobs for a worker. Highest priority first, oldest
/// schedule first within a priority. Attempts are counted at claim time.
pub async fn claim_batch(
    pool: &SqlitePool,
    worker_id: &str,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<Vec<SyncJob>> {
    let mut jobs = sqlx::query_as::<_, SyncJob>(
        "UPDATE sync_jobs
         SET status = 'running',
             worker_id = ?1,
             started_at = ?2,
             attempts = attempts + 1,
             last_error = NULL,
             updated_at = datetime('now')
         WHERE id IN (
             SELECT id FROM sync_jobs
             WHERE status = 'queued' AND scheduled_at <= ?2
             ORDER BY priority DESC, scheduled_at ASC
             LIMIT ?3
         )
         RETURNING *",
    )
    .bind(worker_id)
    .bind(now)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    // the subquery's ORDER BY only selects the rows; RETURNING emits them
    // in unspecified order
    jobs.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.scheduled_at.cmp(&b.scheduled_at))
    });
    Ok(jobs)
}

/// Mark a running job succeeded.
pub async fn complete(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE sync_jobs
         SET status = 'succeeded', finished_at = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Requeue a failed job for a later retry.
pub async fn requeue(
    pool: &SqlitePool,
    job_id: &str,
    retry_at: DateTime<Utc>,
    error: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE sync_jobs
         SET status = 'queued', scheduled_at = ?, last_error = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(retry_at)
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a job permanently failed.
pub async fn fail(pool: &SqlitePool, job_id: &str, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE sync_jobs
         SET status = 'failed', finished_at = ?, last_error = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Cancel a job without running it (cooldown skips and the like).
pub async fn cancel(pool: &SqlitePool, job_id: &str, reason: &str) -> Result<()> {
    sqlx::query(
        "UPDATE sync_jobs
         SET status = 'cancelled', finished_at = ?, last_error = ?, updated_at = datetime('now')
         WHERE id = ?",
    )
    .bind(Utc::now())
    .bind(reason)
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append a log line, optionally attached to a job.
pub async fn log(
    pool: &SqlitePool,
    job_id: Option<&str>,
    level: &str,
    message: &str,
    detail: Option<&serde_json::Value>,
) -> Result<()> {
    let detail = match detail {
        Some(v) => Some(
            serde_json::to_string(v)
                .map_err(|e| Error::Internal(format!("log detail serialize: {e}")))?,
        ),
        None => None,
    };
    sqlx::query("INSERT INTO sync_logs (id, job_id, level, message, detail) VALUES (?, ?, ?, ?, ?)")
        .bind(Uuid::new_v4().to_string())
        .bind(job_id)
        .bind(level)
        .bind(message)
        .bind(detail)
        .execute(pool)
        .await?;
    Ok(())
}

/// Queue status summary for the status API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub by_status: std::collections::BTreeMap<String, i64>,
    pub queued_by_type: std::collections::BTreeMap<String, i64>,
    pub wmonid_by_status: std::collections::BTreeMap<String, i64>,
    pub oldest_queued_age_seconds: Option<i64>,
}

pub async fn queue_status(pool: &SqlitePool) -> Result<QueueStatus> {
    let mut by_status = std::collections::BTreeMap::new();
    for row in sqlx::query("SELECT status, COUNT(*) AS n FROM sync_jobs GROUP BY status")
        .fetch_all(pool)
        .await?
    {
        by_status.insert(row.get::<String, _>("status"), row.get::<i64, _>("n"));
    }

    let mut queued_by_type = std::collections::BTreeMap::new();
    for row in sqlx::query(
        "SELECT job_type, COUNT(*) AS n FROM sync_jobs WHERE status = 'queued' GROUP BY job_type",
    )
    .fetch_all(pool)
    .await?
    {
        queued_by_type.insert(row.get::<String, _>("job_type"), row.get::<i64, _>("n"));
    }

    let mut wmonid_by_status = std::collections::BTreeMap::new();
    for row in
        sqlx::query("SELECT status, COUNT(*) AS n FROM scourt_wmonid_tokens GROUP BY status")
            .fetch_all(pool)
            .await?
    {
        wmonid_by_status.insert(row.get::<String, _>("status"), row.get::<i64, _>("n"));
    }

    let oldest_queued_age_seconds: Option<i64> = sqlx::query_scalar(
        "SELECT CAST(strftime('%s','now') - strftime('%s', MIN(scheduled_at)) AS INTEGER)
         FROM sync_jobs WHERE status = 'queued'",
    )
    .fetch_one(pool)
    .await?;

    Ok(QueueStatus {
        by_status,
        queued_by_type,
        wmonid_by_status,
        oldest_queued_age_seconds,
    })
}

/// Most recently touched jobs, newest first.
pub async fn recent_jobs(pool: &SqlitePool, limit: u32) -> Result<Vec<SyncJob>> {
    sqlx::query_as("SELECT * FROM sync_jobs ORDER BY updated_at DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Error::from)
}

/// Latest log lines, newest first.
pub async fn recent_logs(pool: &SqlitePool, limit: u32) -> Result<Vec<SyncLog>> {
    sqlx::query_as("SELECT * FROM sync_logs ORDER BY created_at DESC LIMIT ?")
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scourt_common::db::init_memory_database;

    async fn seed_case(pool: &SqlitePool, id: &str) {
        sqlx::query(
            "INSERT INTO legal_cases (id, case_number, court_name, party_name)
             VALUES (?, '2024드단1', '평택가정', '김철수')",
        )
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_for_live_jobs() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1").await;

        let job = NewJob::case_sync("case-1", JOB_PROGRESS, PRIORITY_AUTO);
        let first = enqueue(&pool, &job).await.unwrap();
        let second = enqueue(&pool, &job).await.unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert!(second.job_id.is_none());

        // once the job is terminal, the key opens up again
        fail(&pool, first.job_id.as_deref().unwrap(), "boom")
            .await
            .unwrap();
        let third = enqueue(&pool, &job).await.unwrap();
        assert!(!third.deduplicated);
    }

    #[tokio::test]
    async fn claim_orders_by_priority_then_age() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1").await;

        let now = Utc::now();
        let mut low = NewJob::case_sync("case-1", JOB_PROGRESS, PRIORITY_AUTO);
        low.scheduled_at = now - chrono::Duration::minutes(10);
        let mut high = NewJob::case_sync("case-1", JOB_GENERAL, PRIORITY_MANUAL);
        high.scheduled_at = now - chrono::Duration::minutes(1);
        enqueue(&pool, &low).await.unwrap();
        enqueue(&pool, &high).await.unwrap();

        let claimed = claim_batch(&pool, "w1", 10, now).await.unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].job_type, JOB_GENERAL);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[1].job_type, JOB_PROGRESS);
    }

    #[tokio::test]
    async fn claim_skips_future_jobs() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1").await;

        let mut job = NewJob::case_sync("case-1", JOB_PROGRESS, PRIORITY_AUTO);
        job.scheduled_at = Utc::now() + chrono::Duration::hours(1);
        enqueue(&pool, &job).await.unwrap();

        let claimed = claim_batch(&pool, "w1", 10, Utc::now()).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn requeue_returns_job_to_queue() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1").await;

        let job = NewJob::case_sync("case-1", JOB_PROGRESS, PRIORITY_AUTO);
        let outcome = enqueue(&pool, &job).await.unwrap();
        let id = outcome.job_id.unwrap();

        let claimed = claim_batch(&pool, "w1", 1, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);

        requeue(&pool, &id, Utc::now() + chrono::Duration::minutes(2), "timeout")
            .await
            .unwrap();

        // not due yet
        let claimed = claim_batch(&pool, "w1", 1, Utc::now()).await.unwrap();
        assert!(claimed.is_empty());

        // due later, attempts keep counting
        let claimed = claim_batch(&pool, "w1", 1, Utc::now() + chrono::Duration::minutes(3))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);
    }

    #[tokio::test]
    async fn status_summary_counts() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool, "case-1").await;

        enqueue(&pool, &NewJob::case_sync("case-1", JOB_PROGRESS, PRIORITY_AUTO))
            .await
            .unwrap();
        enqueue(&pool, &NewJob::wmonid_renewal("tok-1")).await.unwrap();

        let status = queue_status(&pool).await.unwrap();
        assert_eq!(status.by_status.get("queued"), Some(&2));
        assert_eq!(status.queued_by_type.get(JOB_PROGRESS), Some(&1));
        assert_eq!(status.queued_by_type.get(JOB_WMONID_RENEWAL), Some(&1));
        assert!(status.oldest_queued_age_seconds.is_some());
    }
}
