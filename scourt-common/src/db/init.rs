//! Database initialization
//!
//! Creates the database file on first run and brings the schema up with
//! idempotent `CREATE TABLE IF NOT EXISTS` statements, so the service can be
//! pointed at an empty path and come up cleanly.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL keeps the worker's writes from blocking scheduler reads
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create an in-memory database with the full schema, for tests.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (idempotent).
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    create_settings_table(pool).await?;
    create_profiles_table(pool).await?;
    create_wmonid_tokens_table(pool).await?;
    create_case_links_table(pool).await?;
    create_legal_cases_table(pool).await?;
    create_sync_jobs_table(pool).await?;
    create_sync_logs_table(pool).await?;
    create_case_snapshots_table(pool).await?;
    create_court_hearings_table(pool).await?;
    create_case_deadlines_table(pool).await?;
    create_case_parties_table(pool).await?;
    create_related_cases_table(pool).await?;
    create_xml_cache_table(pool).await?;
    Ok(())
}

/// Key-value settings storage (single JSON document per concern).
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Portal identity profiles; each carries one browser identity at a time
/// and a bounded set of linked cases.
async fn create_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scourt_profiles (
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            case_count INTEGER NOT NULL DEFAULT 0,
            last_used_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Browser-identity tokens. At most one active token per profile; superseded
/// tokens are kept for audit.
async fn create_wmonid_tokens_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scourt_wmonid_tokens (
            id TEXT PRIMARY KEY,
            profile_id TEXT NOT NULL REFERENCES scourt_profiles(id),
            wmonid TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            issued_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            expires_at TIMESTAMP NOT NULL,
            retired_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_wmonid_profile_status
         ON scourt_wmonid_tokens(profile_id, status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Case-to-profile bindings. The per-case access token is only valid under
/// the identity that performed the original search, so the binding is sticky.
async fn create_case_links_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scourt_case_links (
            id TEXT PRIMARY KEY,
            profile_id TEXT NOT NULL REFERENCES scourt_profiles(id),
            case_number TEXT NOT NULL,
            court_name TEXT NOT NULL,
            enc_cs_no TEXT,
            last_accessed_at TIMESTAMP,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(profile_id, case_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_case_links_case
         ON scourt_case_links(case_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Cases under management, with sync bookkeeping columns.
async fn create_legal_cases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legal_cases (
            id TEXT PRIMARY KEY,
            case_number TEXT NOT NULL,
            court_name TEXT NOT NULL,
            party_name TEXT NOT NULL,
            case_title TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            final_result TEXT,
            final_result_date TEXT,
            auto_sync_enabled INTEGER NOT NULL DEFAULT 1,
            next_progress_sync_at TIMESTAMP,
            cooldown_until TIMESTAMP,
            last_general_sync_at TIMESTAMP,
            last_synced_at TIMESTAMP,
            last_sync_status TEXT,
            last_sync_error TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(case_number, court_name, party_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Sync job queue. The partial unique index enforces at most one live
/// (queued or running) job per dedup key; terminal jobs stay as history.
async fn create_sync_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_jobs (
            id TEXT PRIMARY KEY,
            legal_case_id TEXT REFERENCES legal_cases(id),
            job_type TEXT NOT NULL,
            dedup_key TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            priority INTEGER NOT NULL DEFAULT 10,
            worker_id TEXT,
            scheduled_at TIMESTAMP NOT NULL,
            started_at TIMESTAMP,
            finished_at TIMESTAMP,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            payload TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_dedup_live
         ON sync_jobs(dedup_key) WHERE status IN ('queued', 'running')",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_jobs_claim
         ON sync_jobs(status, scheduled_at, priority)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Execution log lines for operator visibility. job_id is null for
/// pass-level entries (scheduler/worker summaries).
async fn create_sync_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_logs (
            id TEXT PRIMARY KEY,
            job_id TEXT REFERENCES sync_jobs(id),
            level TEXT NOT NULL DEFAULT 'info',
            message TEXT NOT NULL,
            detail TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sync_logs_job ON sync_logs(job_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Append-only raw portal snapshots; change detection diffs the two most
/// recent rows per case and kind.
async fn create_case_snapshots_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_snapshots (
            id TEXT PRIMARY KEY,
            legal_case_id TEXT NOT NULL REFERENCES legal_cases(id),
            snapshot_kind TEXT NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_case_kind
         ON case_snapshots(legal_case_id, snapshot_kind, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Hearings keyed by a content hash of date, time and type so reruns
/// update rather than duplicate.
async fn create_court_hearings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS court_hearings (
            id TEXT PRIMARY KEY,
            legal_case_id TEXT NOT NULL REFERENCES legal_cases(id),
            content_hash TEXT NOT NULL,
            hearing_date TEXT NOT NULL,
            hearing_time TEXT,
            hearing_type TEXT NOT NULL,
            hearing_type_raw TEXT NOT NULL,
            location TEXT,
            result TEXT,
            result_raw TEXT,
            status TEXT NOT NULL DEFAULT 'SCHEDULED',
            source TEXT NOT NULL DEFAULT 'scourt',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(legal_case_id, content_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Deadlines derived from progress events; unique per case, type and
/// triggering date so reprocessing old progress is a no-op.
async fn create_case_deadlines_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_deadlines (
            id TEXT PRIMARY KEY,
            legal_case_id TEXT NOT NULL REFERENCES legal_cases(id),
            deadline_type TEXT NOT NULL,
            trigger_date TEXT NOT NULL,
            due_date TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            source TEXT NOT NULL DEFAULT 'auto',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(legal_case_id, deadline_type, trigger_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Parties on a case. Manual edits win over portal data via the
/// manual_override flag.
async fn create_case_parties_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS case_parties (
            id TEXT PRIMARY KEY,
            legal_case_id TEXT NOT NULL REFERENCES legal_cases(id),
            party_type TEXT NOT NULL,
            party_name TEXT NOT NULL,
            representative TEXT,
            manual_override INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(legal_case_id, party_name, party_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Related-case references reported by the portal (lower instance,
/// counterclaims and the like).
async fn create_related_cases_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS related_cases (
            id TEXT PRIMARY KEY,
            legal_case_id TEXT NOT NULL REFERENCES legal_cases(id),
            related_case_number TEXT NOT NULL,
            court_name TEXT,
            relation TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE(legal_case_id, related_case_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Cache of portal UI XML fragments, keyed by sub-path.
async fn create_xml_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS xml_cache (
            xml_path TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            fetched_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
