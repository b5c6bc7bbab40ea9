//! Database row models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Portal identity profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScourtProfile {
    pub id: String,
    pub label: String,
    pub status: String,
    pub case_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Browser-identity token bound to a profile.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WmonidToken {
    pub id: String,
    pub profile_id: String,
    pub wmonid: String,
    pub status: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Sticky binding of a case to the profile that first searched it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CaseLink {
    pub id: String,
    pub profile_id: String,
    pub case_number: String,
    pub court_name: String,
    pub enc_cs_no: Option<String>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Case under management.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LegalCase {
    pub id: String,
    pub case_number: String,
    pub court_name: String,
    pub party_name: String,
    pub case_title: Option<String>,
    pub status: String,
    pub final_result: Option<String>,
    pub final_result_date: Option<String>,
    pub auto_sync_enabled: bool,
    pub next_progress_sync_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_general_sync_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queued, running or terminal sync job.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncJob {
    pub id: String,
    pub legal_case_id: Option<String>,
    pub job_type: String,
    pub dedup_key: String,
    pub status: String,
    pub priority: i64,
    pub worker_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One execution log line, attached to a job or to a whole pass.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncLog {
    pub id: String,
    pub job_id: Option<String>,
    pub level: String,
    pub message: String,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Raw portal snapshot row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CaseSnapshot {
    pub id: String,
    pub legal_case_id: String,
    pub snapshot_kind: String,
    pub content: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Hearing row; identity is (case, content_hash).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CourtHearing {
    pub id: String,
    pub legal_case_id: String,
    pub content_hash: String,
    pub hearing_date: String,
    pub hearing_time: Option<String>,
    pub hearing_type: String,
    pub hearing_type_raw: String,
    pub location: Option<String>,
    pub result: Option<String>,
    pub result_raw: Option<String>,
    pub status: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived procedural deadline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CaseDeadline {
    pub id: String,
    pub legal_case_id: String,
    pub deadline_type: String,
    pub trigger_date: String,
    pub due_date: String,
    pub description: String,
    pub status: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Party on a case.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CaseParty {
    pub id: String,
    pub legal_case_id: String,
    pub party_type: String,
    pub party_name: String,
    pub representative: Option<String>,
    pub manual_override: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Related-case reference reported by the portal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RelatedCase {
    pub id: String,
    pub legal_case_id: String,
    pub related_case_number: String,
    pub court_name: Option<String>,
    pub relation: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cached portal UI fragment.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct XmlCacheEntry {
    pub xml_path: String,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Identity token lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    Expiring,
    Migrating,
    Expired,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Expiring => "expiring",
            TokenStatus::Migrating => "migrating",
            TokenStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TokenStatus::Active),
            "expiring" => Some(TokenStatus::Expiring),
            "migrating" => Some(TokenStatus::Migrating),
            "expired" => Some(TokenStatus::Expired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips() {
        for s in ["queued", "running", "succeeded", "failed", "cancelled"] {
            assert_eq!(JobStatus::parse(s).unwrap().as_str(), s);
        }
        assert!(JobStatus::parse("bogus").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }
}
