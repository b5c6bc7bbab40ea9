//! Hearing reconciliation
//!
//! Portal hearing rows carry free-text Korean type and result strings. They
//! are mapped to typed values (exact match first, then substring), hashed on
//! the raw (date, time, type) triple, and upserted so repeated syncs update
//! the mutable fields without duplicating rows.

use crate::portal::types::HearingEntry;
use scourt_common::{kst, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HearingType {
    HearingMain,
    HearingMediation,
    HearingInvestigation,
    HearingJudgment,
    HearingInterim,
    HearingParenting,
}

impl HearingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HearingType::HearingMain => "HEARING_MAIN",
            HearingType::HearingMediation => "HEARING_MEDIATION",
            HearingType::HearingInvestigation => "HEARING_INVESTIGATION",
            HearingType::HearingJudgment => "HEARING_JUDGMENT",
            HearingType::HearingInterim => "HEARING_INTERIM",
            HearingType::HearingParenting => "HEARING_PARENTING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HearingResult {
    Continued,
    Concluded,
    Postponed,
    Dismissed,
}

impl HearingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            HearingResult::Continued => "CONTINUED",
            HearingResult::Concluded => "CONCLUDED",
            HearingResult::Postponed => "POSTPONED",
            HearingResult::Dismissed => "DISMISSED",
        }
    }
}

/// Portal hearing-type strings seen in the wild, exact matches.
fn exact_hearing_type(raw: &str) -> Option<HearingType> {
    let mapped = match raw {
        "변론" | "변론기일" | "변론준비" | "변론준비기일" | "증인신문" | "증인신문기일"
        | "당사자신문" | "당사자신문기일" | "공판" | "공판기일" => HearingType::HearingMain,
        "조정" | "조정기일" | "조정조치" | "화해권고" | "화해권고기일" | "조정회부" => {
            HearingType::HearingMediation
        }
        "조사" | "조사기일" | "면접조사" | "사실조회" | "현장조사" => {
            HearingType::HearingInvestigation
        }
        "선고" | "선고기일" | "판결선고" | "판결선고기일" | "결정선고" => {
            HearingType::HearingJudgment
        }
        "심문" | "심문기일" | "가처분" | "가처분심문" | "가압류" | "보전처분" => {
            HearingType::HearingInterim
        }
        "상담" | "양육상담" | "부모교육" | "면접교섭" => HearingType::HearingParenting,
        _ => return None,
    };
    Some(mapped)
}

/// Map a portal hearing-type string; unknown strings default to the main
/// hearing type rather than erroring.
pub fn map_hearing_type(raw: &str) -> HearingType {
    if let Some(exact) = exact_hearing_type(raw) {
        return exact;
    }
    if raw.contains("변론") || raw.contains("공판") || raw.contains("신문") {
        return HearingType::HearingMain;
    }
    if raw.contains("조정") || raw.contains("화해") {
        return HearingType::HearingMediation;
    }
    if raw.contains("조사") || raw.contains("면접") {
        return HearingType::HearingInvestigation;
    }
    if raw.contains("선고") || raw.contains("판결") {
        return HearingType::HearingJudgment;
    }
    if raw.contains("심문") || raw.contains("보전") || raw.contains("가처분") || raw.contains("가압류")
    {
        return HearingType::HearingInterim;
    }
    if raw.contains("상담") || raw.contains("교육") || raw.contains("양육") {
        return HearingType::HearingParenting;
    }
    HearingType::HearingMain
}

/// Map a portal result string; blank or unrecognized results stay untyped.
pub fn map_hearing_result(raw: &str) -> Option<HearingResult> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let exact = match trimmed {
        "속행" | "변론속행" | "조정속행" => Some(HearingResult::Continued),
        "종결" | "변론종결" | "조정종결" | "조정성립" => Some(HearingResult::Concluded),
        "연기" | "기일연기" => Some(HearingResult::Postponed),
        "취하" | "각하" | "기각" => Some(HearingResult::Dismissed),
        _ => None,
    };
    if exact.is_some() {
        return exact;
    }
    if trimmed.contains("속행") {
        return Some(HearingResult::Continued);
    }
    if trimmed.contains("종결") || trimmed.contains("성립") {
        return Some(HearingResult::Concluded);
    }
    if trimmed.contains("연기") {
        return Some(HearingResult::Postponed);
    }
    if trimmed.contains("취하") || trimmed.contains("각하") || trimmed.contains("기각") {
        return Some(HearingResult::Dismissed);
    }
    None
}

/// Natural key for dedup across syncs: raw portal strings, not the mapped
/// values, so a vocabulary-map change never orphans existing rows.
pub fn hearing_hash(entry: &HearingEntry) -> String {
    let content = format!("{}|{}|{}", entry.date, entry.time, entry.kind);
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// A hearing with a result, or one whose date has passed, is completed.
pub fn hearing_status(entry: &HearingEntry) -> &'static str {
    if !entry.result.trim().is_empty() {
        return "COMPLETED";
    }
    match kst::parse_portal_date(&entry.date) {
        Ok(d) if d < kst::today_kst() => "COMPLETED",
        _ => "SCHEDULED",
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HearingReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Upsert portal hearings for a case. Existing rows (matched on content
/// hash) only have their result and status refreshed; rows the portal no
/// longer reports are left alone.
pub async fn sync_hearings(
    pool: &SqlitePool,
    legal_case_id: &str,
    hearings: &[HearingEntry],
) -> Result<HearingReport> {
    let mut report = HearingReport::default();

    for entry in hearings {
        if entry.date.trim().is_empty() {
            report.skipped += 1;
            continue;
        }

        let hash = hearing_hash(entry);
        let status = hearing_status(entry);
        let result = map_hearing_result(&entry.result);
        let hearing_type = map_hearing_type(&entry.kind);
        let hearing_date = match kst::parse_portal_date(&entry.date) {
            Ok(d) => kst::to_iso_date(d),
            Err(_) => {
                report.skipped += 1;
                continue;
            }
        };
        let hearing_time = kst::parse_portal_time(&entry.time).format("%H:%M").to_string();

        let existing: Option<(String, Option<String>, String)> = sqlx::query_as(
            "SELECT id, result, status FROM court_hearings
             WHERE legal_case_id = ? AND content_hash = ?",
        )
        .bind(legal_case_id)
        .bind(&hash)
        .fetch_optional(pool)
        .await?;

        match existing {
            Some((id, old_result, old_status)) => {
                let new_result = result.map(|r| r.as_str().to_string());
                let result_changed = new_result.is_some() && new_result != old_result;
                let status_changed = status != old_status;
                if result_changed || status_changed {
                    sqlx::query(
                        "UPDATE court_hearings
                         SET result = COALESCE(?, result),
                             result_raw = ?,
                             status = ?,
                             updated_at = datetime('now')
                         WHERE id = ?",
                    )
                    .bind(&new_result)
                    .bind(&entry.result)
                    .bind(status)
                    .bind(&id)
                    .execute(pool)
                    .await?;
                    report.updated += 1;
                } else {
                    report.skipped += 1;
                }
            }
            None => {
                sqlx::query(
                    "INSERT INTO court_hearings
                       (id, legal_case_id, content_hash, hearing_date, hearing_time,
                        hearing_type, hearing_type_raw, location, result, result_raw,
                        status, source)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'scourt')
                     ON CONFLICT(legal_case_id, content_hash) DO NOTHING",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(legal_case_id)
                .bind(&hash)
                .bind(&hearing_date)
                .bind(&hearing_time)
                .bind(hearing_type.as_str())
                .bind(&entry.kind)
                .bind(&entry.location)
                .bind(result.map(|r| r.as_str()))
                .bind(&entry.result)
                .bind(status)
                .execute(pool)
                .await?;
                report.created += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scourt_common::db::init_memory_database;

    fn entry(date: &str, time: &str, kind: &str, result: &str) -> HearingEntry {
        HearingEntry {
            date: date.to_string(),
            time: time.to_string(),
            kind: kind.to_string(),
            location: "301호 법정".to_string(),
            result: result.to_string(),
        }
    }

    async fn seed_case(pool: &SqlitePool) {
        sqlx::query(
            "INSERT INTO legal_cases (id, case_number, court_name, party_name)
             VALUES ('case-1', '2024드단1', '평택가정', '김철수')",
        )
        .execute(pool)
        .await
        .unwrap();
    }

    #[test]
    fn type_mapping_exact_and_substring() {
        assert_eq!(map_hearing_type("변론기일"), HearingType::HearingMain);
        assert_eq!(map_hearing_type("조정기일"), HearingType::HearingMediation);
        assert_eq!(map_hearing_type("판결선고기일"), HearingType::HearingJudgment);
        // substring fallback
        assert_eq!(map_hearing_type("제1회 변론"), HearingType::HearingMain);
        assert_eq!(
            map_hearing_type("가처분 심문기일"),
            HearingType::HearingInterim
        );
        // unknown defaults to main
        assert_eq!(map_hearing_type("뭔가 새로운 기일"), HearingType::HearingMain);
    }

    #[test]
    fn result_mapping() {
        assert_eq!(map_hearing_result("속행"), Some(HearingResult::Continued));
        assert_eq!(map_hearing_result("조정성립"), Some(HearingResult::Concluded));
        assert_eq!(map_hearing_result("기일연기"), Some(HearingResult::Postponed));
        assert_eq!(map_hearing_result("소취하"), Some(HearingResult::Dismissed));
        assert_eq!(map_hearing_result(""), None);
        assert_eq!(map_hearing_result("알 수 없음"), None);
    }

    #[test]
    fn hash_covers_raw_triple() {
        let a = entry("2025.03.12", "14:00", "변론기일", "");
        let b = entry("2025.03.12", "14:00", "변론기일", "속행");
        let c = entry("2025.03.12", "15:00", "변론기일", "");
        // result does not participate in identity
        assert_eq!(hearing_hash(&a), hearing_hash(&b));
        assert_ne!(hearing_hash(&a), hearing_hash(&c));
        assert_eq!(hearing_hash(&a).len(), 64);
    }

    #[test]
    fn status_derivation() {
        assert_eq!(hearing_status(&entry("2000.01.01", "10:00", "변론기일", "")), "COMPLETED");
        assert_eq!(hearing_status(&entry("2099.01.01", "10:00", "변론기일", "")), "SCHEDULED");
        assert_eq!(
            hearing_status(&entry("2099.01.01", "10:00", "변론기일", "속행")),
            "COMPLETED"
        );
    }

    #[tokio::test]
    async fn repeated_sync_is_idempotent() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        let hearings = vec![entry("2025.03.12", "14:00", "변론기일", "")];
        let first = sync_hearings(&pool, "case-1", &hearings).await.unwrap();
        assert_eq!(first.created, 1);

        let second = sync_hearings(&pool, "case-1", &hearings).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM court_hearings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn result_arrival_updates_in_place() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        sync_hearings(&pool, "case-1", &[entry("2025.03.12", "14:00", "변론기일", "")])
            .await
            .unwrap();
        let report = sync_hearings(
            &pool,
            "case-1",
            &[entry("2025.03.12", "14:00", "변론기일", "속행")],
        )
        .await
        .unwrap();
        assert_eq!(report.updated, 1);

        let (result, status): (Option<String>, String) =
            sqlx::query_as("SELECT result, status FROM court_hearings")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(result.as_deref(), Some("CONTINUED"));
        assert_eq!(status, "COMPLETED");
    }

    #[tokio::test]
    async fn unparseable_dates_are_skipped() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        let report = sync_hearings(&pool, "case-1", &[entry("미정", "", "변론기일", "")])
            .await
            .unwrap();
        assert_eq!(report.created, 0);
        assert_eq!(report.skipped, 1);
    }
}
