//! Runtime sync settings
//!
//! Tunable knobs live in the `settings` table as one JSON document and are
//! re-read at the start of every scheduler and worker pass, so operators can
//! adjust pacing without a restart. Unknown keys in the stored document are
//! ignored; missing keys fall back to the compiled defaults.

use crate::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

const SETTINGS_KEY: &str = "scourt_sync_settings";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Master switch; scheduler enqueues nothing when false
    pub auto_sync_enabled: bool,
    /// Target interval between progress syncs per case
    pub progress_interval_hours: u32,
    /// Random slot jitter applied around each case's scheduled slot
    pub progress_jitter_minutes: u32,
    /// Minimum gap after a failed sync before the same case is rescheduled
    pub general_backoff_hours: u32,
    /// Max cases considered per scheduler pass
    pub scheduler_batch_size: u32,
    /// Max jobs claimed per worker pass
    pub worker_batch_size: u32,
    /// Concurrent job executions within a worker pass
    pub worker_concurrency: u32,
    /// Per-request sleep range before each portal call
    pub request_jitter_ms: JitterRange,
    /// Sliding-window portal request budget
    pub rate_limit_per_minute: u32,
    /// Base for exponential retry backoff
    pub backoff_base_ms: u64,
    /// Upper bound on the exponential component
    pub backoff_max_ms: u64,
    /// Fixed delay for capacity-class failures
    pub capacity_backoff_ms: u64,
    /// Attempts before a job is marked failed
    pub max_retries: u32,
    /// Portal session cookies older than this are re-established
    pub session_max_age_minutes: u32,
    /// When a full sync is unavailable, allow falling back to progress-only
    pub allow_full_fallback: bool,
    /// Rest stamped on a case after an automatic progress sync
    pub auto_cooldown_minutes: u32,
    /// Rest stamped on a case after a manually triggered sync
    pub manual_cooldown_minutes: u32,
    pub active_case_rule: ActiveCaseRule,
    pub wmonid: WmonidSettings,
    pub captcha: CaptchaSettings,
    pub pool: PoolSettings,
}

/// Which cases the scheduler considers for automatic sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveCaseRule {
    /// When non-empty, only these statuses qualify
    pub status_allow_list: Vec<String>,
    /// Consulted only when the allow list is empty
    pub status_block_list: Vec<String>,
    /// Skip cases that already carry a final result or result date
    pub exclude_final_result: bool,
    /// Skip cases without a bound identity (they wait for a full sync)
    pub require_linked: bool,
}

impl ActiveCaseRule {
    pub fn status_qualifies(&self, status: &str) -> bool {
        if !self.status_allow_list.is_empty() {
            return self.status_allow_list.iter().any(|s| s == status);
        }
        !self.status_block_list.iter().any(|s| s == status)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JitterRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WmonidSettings {
    /// Issue replacement identities automatically as expiry approaches
    pub auto_rotate_enabled: bool,
    /// Days before expiry at which renewal jobs are enqueued
    pub renewal_before_days: u32,
    /// Allow operators to rotate tokens that are not yet in the window
    pub early_rotate_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptchaSettings {
    /// "manual", "remote", or "stub"
    pub solver: String,
    /// Answers below this confidence are not submitted
    pub min_confidence: f64,
    /// Remote solver endpoint, if any
    pub remote_endpoint: Option<String>,
    /// In-process solve attempts per search
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolSettings {
    pub max_profiles: u32,
    pub max_cases_per_profile: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync_enabled: true,
            progress_interval_hours: 6,
            progress_jitter_minutes: 30,
            general_backoff_hours: 24,
            scheduler_batch_size: 300,
            worker_batch_size: 20,
            worker_concurrency: 4,
            request_jitter_ms: JitterRange::default(),
            rate_limit_per_minute: 30,
            backoff_base_ms: 60_000,
            backoff_max_ms: 1_800_000,
            capacity_backoff_ms: 3_600_000,
            max_retries: 5,
            session_max_age_minutes: 30,
            allow_full_fallback: true,
            auto_cooldown_minutes: 60,
            manual_cooldown_minutes: 10,
            active_case_rule: ActiveCaseRule::default(),
            wmonid: WmonidSettings::default(),
            captcha: CaptchaSettings::default(),
            pool: PoolSettings::default(),
        }
    }
}

impl Default for JitterRange {
    fn default() -> Self {
        Self {
            min_ms: 500,
            max_ms: 2_000,
        }
    }
}

impl Default for ActiveCaseRule {
    fn default() -> Self {
        Self {
            status_allow_list: vec!["active".to_string()],
            status_block_list: Vec::new(),
            exclude_final_result: true,
            require_linked: true,
        }
    }
}

impl Default for WmonidSettings {
    fn default() -> Self {
        Self {
            auto_rotate_enabled: true,
            renewal_before_days: 45,
            early_rotate_enabled: false,
        }
    }
}

impl Default for CaptchaSettings {
    fn default() -> Self {
        Self {
            solver: "manual".to_string(),
            min_confidence: 0.8,
            remote_endpoint: None,
            max_attempts: 3,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_profiles: 6,
            max_cases_per_profile: 50,
        }
    }
}

impl SyncSettings {
    /// Load settings from the database, falling back to defaults when the
    /// row is absent or unparseable.
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(SETTINGS_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) => {
                let raw: String = row.get("value");
                match serde_json::from_str(&raw) {
                    Ok(settings) => Ok(settings),
                    Err(e) => {
                        tracing::warn!(error = %e, "Stored sync settings unparseable, using defaults");
                        Ok(Self::default())
                    }
                }
            }
            None => Ok(Self::default()),
        }
    }

    /// Persist settings as the single JSON document.
    pub async fn save(&self, pool: &SqlitePool) -> Result<()> {
        let raw = serde_json::to_string(self)
            .map_err(|e| crate::Error::Internal(format!("settings serialize: {e}")))?;
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(SETTINGS_KEY)
        .bind(raw)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = SyncSettings::default();
        assert!(s.auto_sync_enabled);
        assert_eq!(s.progress_interval_hours, 6);
        assert_eq!(s.max_retries, 5);
        assert_eq!(s.pool.max_profiles, 6);
        assert_eq!(s.pool.max_cases_per_profile, 50);
        assert!(s.request_jitter_ms.min_ms <= s.request_jitter_ms.max_ms);
        assert!(s.backoff_base_ms <= s.backoff_max_ms);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let s: SyncSettings =
            serde_json::from_str(r#"{"progressIntervalHours": 12, "pool": {"maxProfiles": 2}}"#)
                .unwrap();
        assert_eq!(s.progress_interval_hours, 12);
        assert_eq!(s.pool.max_profiles, 2);
        // untouched keys keep compiled defaults
        assert_eq!(s.pool.max_cases_per_profile, 50);
        assert_eq!(s.worker_batch_size, 20);
    }

    #[test]
    fn status_rule_allow_list_wins_over_block_list() {
        let mut rule = ActiveCaseRule::default();
        assert!(rule.status_qualifies("active"));
        assert!(!rule.status_qualifies("closed"));

        rule.status_allow_list.clear();
        rule.status_block_list = vec!["closed".to_string()];
        assert!(rule.status_qualifies("active"));
        assert!(rule.status_qualifies("anything"));
        assert!(!rule.status_qualifies("closed"));
    }

    #[test]
    fn camel_case_round_trip() {
        let s = SyncSettings::default();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("autoSyncEnabled"));
        assert!(json.contains("renewalBeforeDays"));
        let back: SyncSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.rate_limit_per_minute, s.rate_limit_per_minute);
    }
}
