//! Snapshot diffing and progress classification
//!
//! Compares the previous stored snapshot against freshly parsed documents
//! and emits typed updates. Classification drives deadline registration, so
//! the vocabulary checks are ordered carefully: an entry that merely
//! schedules a hearing ("선고기일 지정") contains result vocabulary ("선고")
//! but announces nothing, so the scheduling check runs first.

use crate::portal::types::{
    DocumentEntry, HearingEntry, ProgressEntry, RelatedCaseEntry,
};
use chrono::{DateTime, Utc};
use scourt_common::kst;
use scourt_common::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Structured view of one sync, persisted append-only in `case_snapshots`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub basic_info: BTreeMap<String, String>,
    pub hearings: Vec<HearingEntry>,
    pub progress: Vec<ProgressEntry>,
    pub documents: Vec<DocumentEntry>,
    pub related_cases: Vec<RelatedCaseEntry>,
}

impl SnapshotData {
    /// Fast equality check across syncs. Documents and related cases are
    /// additive side tables; the hash covers the fields that drive updates.
    pub fn content_hash(&self) -> String {
        let body = serde_json::json!({
            "basicInfo": self.basic_info,
            "hearings": self.hearings,
            "progress": self.progress,
        });
        let serialized = body.to_string();
        format!("{:x}", Sha256::digest(serialized.as_bytes()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    HearingNew,
    HearingChanged,
    HearingCancelled,
    HearingResult,
    /// A progress entry that schedules a hearing; never mints deadlines
    HearingScheduled,
    DocumentFiled,
    DocumentServed,
    Served,
    ResultAnnounced,
    AppealFiled,
    StatusChanged,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    High,
    Normal,
    Low,
}

/// One detected change, carrying enough detail for deadline derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseUpdate {
    pub update_type: UpdateType,
    pub summary: String,
    pub details: serde_json::Value,
    pub importance: Importance,
}

/// Diff two snapshots. A missing previous snapshot is a first sync: only
/// the next upcoming hearing and an existing final result are surfaced.
pub fn detect_changes(previous: Option<&SnapshotData>, current: &SnapshotData) -> Vec<CaseUpdate> {
    let Some(previous) = previous else {
        return initial_updates(current);
    };

    let mut updates = Vec::new();
    updates.extend(hearing_changes(&previous.hearings, &current.hearings));
    updates.extend(progress_changes(&previous.progress, &current.progress));
    updates.extend(basic_info_changes(&previous.basic_info, &current.basic_info));
    updates
}

fn initial_updates(snapshot: &SnapshotData) -> Vec<CaseUpdate> {
    let mut updates = Vec::new();

    if let Some(next) = next_upcoming_hearing(&snapshot.hearings) {
        updates.push(CaseUpdate {
            update_type: UpdateType::HearingNew,
            summary: format!("{} {} {}", next.date, next.time, next.kind),
            details: serde_json::to_value(next).unwrap_or_default(),
            importance: Importance::High,
        });
    }

    if let Some(result) = snapshot.basic_info.get("종국결과") {
        if !result.trim().is_empty() {
            updates.push(CaseUpdate {
                update_type: UpdateType::ResultAnnounced,
                summary: result.clone(),
                details: serde_json::json!({ "result": result }),
                importance: Importance::High,
            });
        }
    }

    updates
}

fn hearing_key(h: &HearingEntry) -> String {
    format!("{}_{}_{}", h.date, h.time, h.kind)
}

fn hearing_changes(old: &[HearingEntry], new: &[HearingEntry]) -> Vec<CaseUpdate> {
    let old_map: HashMap<String, &HearingEntry> =
        old.iter().map(|h| (hearing_key(h), h)).collect();
    let new_map: HashMap<String, &HearingEntry> =
        new.iter().map(|h| (hearing_key(h), h)).collect();

    let mut updates = Vec::new();

    for hearing in new {
        if !old_map.contains_key(&hearing_key(hearing)) {
            updates.push(CaseUpdate {
                update_type: UpdateType::HearingNew,
                summary: format!("{} {} {} 지정", hearing.date, hearing.time, hearing.kind),
                details: serde_json::to_value(hearing).unwrap_or_default(),
                importance: Importance::High,
            });
        }
    }

    // a future hearing that disappeared was cancelled; past ones just aged
    // off the portal's recent-hearings window
    for hearing in old {
        if !new_map.contains_key(&hearing_key(hearing)) && is_future_date(&hearing.date) {
            updates.push(CaseUpdate {
                update_type: UpdateType::HearingCancelled,
                summary: format!("{} {} 취소", hearing.date, hearing.kind),
                details: serde_json::to_value(hearing).unwrap_or_default(),
                importance: Importance::High,
            });
        }
    }

    for hearing in new {
        if let Some(old_hearing) = old_map.get(&hearing_key(hearing)) {
            if old_hearing.result.is_empty() && !hearing.result.is_empty() {
                updates.push(CaseUpdate {
                    update_type: UpdateType::HearingResult,
                    summary: format!("{} {}: {}", hearing.date, hearing.kind, hearing.result),
                    details: serde_json::to_value(hearing).unwrap_or_default(),
                    importance: Importance::High,
                });
            }
        }
    }

    updates
}

fn progress_key(p: &ProgressEntry) -> String {
    let head: String = p.content.chars().take(50).collect();
    format!("{}_{}", p.date, head)
}

fn progress_changes(old: &[ProgressEntry], new: &[ProgressEntry]) -> Vec<CaseUpdate> {
    let seen: HashSet<String> = old.iter().map(progress_key).collect();
    new.iter()
        .filter(|p| !seen.contains(&progress_key(p)))
        .map(classify_progress_entry)
        .collect()
}

/// Classify one new progress entry.
///
/// Scheduling entries are checked before result vocabulary: "선고기일 지정"
/// schedules a judgment date, it does not announce a judgment, and treating
/// it as `ResultAnnounced` would start an appeal clock that has not begun.
pub fn classify_progress_entry(entry: &ProgressEntry) -> CaseUpdate {
    let content = entry.content.as_str();
    let details = serde_json::to_value(entry).unwrap_or_default();

    if content.contains("기일") && (content.contains("지정") || content.contains("변경")) {
        return CaseUpdate {
            update_type: UpdateType::HearingScheduled,
            summary: content.to_string(),
            details,
            importance: Importance::High,
        };
    }

    if entry.result.contains("도달") {
        return CaseUpdate {
            update_type: UpdateType::Served,
            summary: format!("{} ({})", content, entry.result),
            details,
            importance: Importance::Normal,
        };
    }

    if content.contains("송달") {
        return CaseUpdate {
            update_type: UpdateType::DocumentServed,
            summary: content.to_string(),
            details,
            importance: Importance::Normal,
        };
    }

    if content.contains("제출") || content.contains("접수") {
        return CaseUpdate {
            update_type: UpdateType::DocumentFiled,
            summary: content.to_string(),
            details,
            importance: Importance::Normal,
        };
    }

    if content.contains("판결") || content.contains("결정") || content.contains("선고") {
        return CaseUpdate {
            update_type: UpdateType::ResultAnnounced,
            summary: content.to_string(),
            details,
            importance: Importance::High,
        };
    }

    if content.contains("항소") || content.contains("상고") || content.contains("항고") {
        return CaseUpdate {
            update_type: UpdateType::AppealFiled,
            summary: content.to_string(),
            details,
            importance: Importance::High,
        };
    }

    if content.contains("기일") {
        return CaseUpdate {
            update_type: UpdateType::HearingChanged,
            summary: content.to_string(),
            details,
            importance: Importance::High,
        };
    }

    CaseUpdate {
        update_type: UpdateType::Other,
        summary: content.to_string(),
        details,
        importance: Importance::Low,
    }
}

fn basic_info_changes(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> Vec<CaseUpdate> {
    let mut updates = Vec::new();

    let old_result = old.get("종국결과").map(String::as_str).unwrap_or("");
    let new_result = new.get("종국결과").map(String::as_str).unwrap_or("");
    if old_result != new_result && !new_result.is_empty() {
        updates.push(CaseUpdate {
            update_type: UpdateType::ResultAnnounced,
            summary: format!("종국결과: {new_result}"),
            details: serde_json::json!({
                "result": new_result,
                "previous": old_result,
            }),
            importance: Importance::High,
        });
    }

    let old_panel = old.get("재판부").map(String::as_str).unwrap_or("");
    let new_panel = new.get("재판부").map(String::as_str).unwrap_or("");
    if old_panel != new_panel && !new_panel.is_empty() {
        updates.push(CaseUpdate {
            update_type: UpdateType::StatusChanged,
            summary: format!("재판부 변경: {new_panel}"),
            details: serde_json::json!({
                "panel": new_panel,
                "previous": old_panel,
            }),
            importance: Importance::Normal,
        });
    }

    updates
}

fn next_upcoming_hearing(hearings: &[HearingEntry]) -> Option<&HearingEntry> {
    let today = kst::today_kst();
    hearings
        .iter()
        .filter(|h| h.result.is_empty())
        .filter_map(|h| kst::parse_portal_date(&h.date).ok().map(|d| (d, h)))
        .filter(|(d, _)| *d >= today)
        .min_by_key(|(d, _)| *d)
        .map(|(_, h)| h)
}

fn is_future_date(raw: &str) -> bool {
    match kst::parse_portal_date(raw) {
        Ok(d) => d >= kst::today_kst(),
        Err(_) => false,
    }
}

/// Load the latest stored snapshot for a case.
pub async fn load_latest_snapshot(
    pool: &SqlitePool,
    legal_case_id: &str,
) -> Result<Option<SnapshotData>> {
    let row: Option<String> = sqlx::query_scalar(
        "SELECT content FROM case_snapshots
         WHERE legal_case_id = ? AND snapshot_kind = 'structured'
         ORDER BY created_at DESC, rowid DESC
         LIMIT 1",
    )
    .bind(legal_case_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(content) => {
            let snapshot = serde_json::from_str(&content).map_err(|e| {
                scourt_common::Error::Parse {
                    path: "case_snapshots".to_string(),
                    message: format!("stored snapshot: {e}"),
                }
            })?;
            Ok(Some(snapshot))
        }
        None => Ok(None),
    }
}

/// Append a new snapshot row. Snapshots are never updated in place.
pub async fn save_snapshot(
    pool: &SqlitePool,
    legal_case_id: &str,
    snapshot: &SnapshotData,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    let content = serde_json::to_string(snapshot)
        .map_err(|e| scourt_common::Error::Internal(format!("snapshot serialize: {e}")))?;
    let now: DateTime<Utc> = Utc::now();

    sqlx::query(
        "INSERT INTO case_snapshots (id, legal_case_id, snapshot_kind, content, content_hash, created_at)
         VALUES (?, ?, 'structured', ?, ?, ?)",
    )
    .bind(&id)
    .bind(legal_case_id)
    .bind(&content)
    .bind(snapshot.content_hash())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hearing(date: &str, time: &str, kind: &str, result: &str) -> HearingEntry {
        HearingEntry {
            date: date.to_string(),
            time: time.to_string(),
            kind: kind.to_string(),
            location: "법정 301호".to_string(),
            result: result.to_string(),
        }
    }

    fn progress(date: &str, content: &str, result: &str) -> ProgressEntry {
        ProgressEntry {
            date: date.to_string(),
            content: content.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn scheduling_entries_are_not_results() {
        let update = classify_progress_entry(&progress("2025.06.10", "선고기일 지정", ""));
        assert_eq!(update.update_type, UpdateType::HearingScheduled);

        let update = classify_progress_entry(&progress("2025.06.10", "변론기일 지정", ""));
        assert_eq!(update.update_type, UpdateType::HearingScheduled);

        let update = classify_progress_entry(&progress("2025.06.10", "조정기일 변경", ""));
        assert_eq!(update.update_type, UpdateType::HearingScheduled);
    }

    #[test]
    fn actual_results_still_classify() {
        let update = classify_progress_entry(&progress("2025.06.17", "판결선고", ""));
        assert_eq!(update.update_type, UpdateType::ResultAnnounced);

        let update = classify_progress_entry(&progress("2025.06.17", "화해권고결정", ""));
        assert_eq!(update.update_type, UpdateType::ResultAnnounced);
    }

    #[test]
    fn service_and_filing_vocabulary() {
        let update = classify_progress_entry(&progress(
            "2025.06.01",
            "소장부본 송달",
            "2025.06.03 도달",
        ));
        assert_eq!(update.update_type, UpdateType::Served);

        let update = classify_progress_entry(&progress("2025.06.01", "판결정본 송달", ""));
        assert_eq!(update.update_type, UpdateType::DocumentServed);

        let update = classify_progress_entry(&progress("2025.06.02", "답변서 제출", ""));
        assert_eq!(update.update_type, UpdateType::DocumentFiled);

        let update = classify_progress_entry(&progress("2025.07.01", "항소장 접수", ""));
        // filing vocabulary wins over appeal: the entry records a document
        assert_eq!(update.update_type, UpdateType::DocumentFiled);

        let update = classify_progress_entry(&progress("2025.07.01", "항소 제기", ""));
        assert_eq!(update.update_type, UpdateType::AppealFiled);
    }

    #[test]
    fn new_hearing_detected() {
        let old = SnapshotData {
            hearings: vec![hearing("2025.03.12", "14:00", "변론기일", "속행")],
            ..SnapshotData::default()
        };
        let new = SnapshotData {
            hearings: vec![
                hearing("2025.03.12", "14:00", "변론기일", "속행"),
                hearing("2099.04.02", "10:00", "변론기일", ""),
            ],
            ..SnapshotData::default()
        };
        let updates = detect_changes(Some(&old), &new);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::HearingNew);
    }

    #[test]
    fn vanished_future_hearing_is_cancelled() {
        let old = SnapshotData {
            hearings: vec![
                hearing("2000.01.10", "10:00", "변론기일", "속행"),
                hearing("2099.04.02", "10:00", "변론기일", ""),
            ],
            ..SnapshotData::default()
        };
        let new = SnapshotData::default();
        let updates = detect_changes(Some(&old), &new);
        // the past hearing aged off quietly; the future one was cancelled
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::HearingCancelled);
    }

    #[test]
    fn result_added_to_known_hearing() {
        let old = SnapshotData {
            hearings: vec![hearing("2025.03.12", "14:00", "조정기일", "")],
            ..SnapshotData::default()
        };
        let new = SnapshotData {
            hearings: vec![hearing("2025.03.12", "14:00", "조정기일", "조정성립")],
            ..SnapshotData::default()
        };
        let updates = detect_changes(Some(&old), &new);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::HearingResult);
        assert!(updates[0].summary.contains("조정성립"));
    }

    #[test]
    fn final_result_change_detected() {
        let mut old = SnapshotData::default();
        old.basic_info.insert("종국결과".to_string(), String::new());
        let mut new = SnapshotData::default();
        new.basic_info
            .insert("종국결과".to_string(), "원고승".to_string());

        let updates = detect_changes(Some(&old), &new);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].update_type, UpdateType::ResultAnnounced);
    }

    #[test]
    fn unchanged_snapshots_produce_no_updates() {
        let snapshot = SnapshotData {
            hearings: vec![hearing("2025.03.12", "14:00", "변론기일", "속행")],
            progress: vec![progress("2025.03.12", "변론기일 진행", "")],
            ..SnapshotData::default()
        };
        assert!(detect_changes(Some(&snapshot), &snapshot.clone()).is_empty());
        assert_eq!(snapshot.content_hash(), snapshot.clone().content_hash());
    }

    #[tokio::test]
    async fn snapshots_append_and_load_latest() {
        let pool = scourt_common::db::init_memory_database().await.unwrap();
        sqlx::query(
            "INSERT INTO legal_cases (id, case_number, court_name, party_name)
             VALUES ('case-1', '2024드단1', '평택가정', '김철수')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut first = SnapshotData::default();
        first
            .basic_info
            .insert("사건명".to_string(), "이혼".to_string());
        save_snapshot(&pool, "case-1", &first).await.unwrap();

        let mut second = first.clone();
        second
            .basic_info
            .insert("종국결과".to_string(), "원고승".to_string());
        save_snapshot(&pool, "case-1", &second).await.unwrap();

        let loaded = load_latest_snapshot(&pool, "case-1").await.unwrap().unwrap();
        assert_eq!(loaded.basic_info.get("종국결과").unwrap(), "원고승");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM case_snapshots")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
