//! Party and related-case reconciliation
//!
//! Both tables are append/update only. Party rows a user has corrected by
//! hand carry `manual_override` and are never touched by sync; rows the
//! portal stops reporting stay put since they may carry local annotations.

use crate::portal::types::{PartyEntry, RelatedCaseEntry, RepresentativeEntry};
use scourt_common::Result;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize)]
pub struct PartyReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Upsert portal parties, attaching representatives by role match.
pub async fn sync_parties(
    pool: &SqlitePool,
    legal_case_id: &str,
    parties: &[PartyEntry],
    representatives: &[RepresentativeEntry],
) -> Result<PartyReport> {
    let mut report = PartyReport::default();

    for party in parties {
        if party.name.trim().is_empty() {
            report.skipped += 1;
            continue;
        }

        let representative = representatives
            .iter()
            .find(|r| !r.role.is_empty() && party.role.contains(&r.role))
            .map(|r| {
                if r.firm.is_empty() {
                    r.name.clone()
                } else {
                    format!("{} ({})", r.name, r.firm)
                }
            });

        let existing: Option<(String, bool, Option<String>)> = sqlx::query_as(
            "SELECT id, manual_override, representative FROM case_parties
             WHERE legal_case_id = ? AND party_name = ? AND party_type = ?",
        )
        .bind(legal_case_id)
        .bind(&party.name)
        .bind(&party.role)
        .fetch_optional(pool)
        .await?;

        match existing {
            Some((_, true, _)) => {
                report.skipped += 1;
            }
            Some((id, false, old_representative)) => {
                if representative.is_some() && representative != old_representative {
                    sqlx::query(
                        "UPDATE case_parties
                         SET representative = ?, updated_at = datetime('now')
                         WHERE id = ?",
                    )
                    .bind(&representative)
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
                    "INSERT INTO case_parties
                       (id, legal_case_id, party_type, party_name, representative)
                     VALUES (?, ?, ?, ?, ?)
                     ON CONFLICT(legal_case_id, party_name, party_type) DO NOTHING",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(legal_case_id)
                .bind(&party.role)
                .bind(&party.name)
                .bind(&representative)
                .execute(pool)
                .await?;
                report.created += 1;
            }
        }
    }

    Ok(report)
}

/// Upsert related-case references. Identity is the related case number;
/// court and relation refresh in place when the portal fills them in later.
pub async fn sync_related_cases(
    pool: &SqlitePool,
    legal_case_id: &str,
    related: &[RelatedCaseEntry],
) -> Result<usize> {
    let mut written = 0;

    for entry in related {
        if entry.case_number.trim().is_empty() {
            continue;
        }
        let result = sqlx::query(
            "INSERT INTO related_cases (id, legal_case_id, related_case_number, court_name, relation)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(legal_case_id, related_case_number) DO UPDATE SET
               court_name = COALESCE(NULLIF(excluded.court_name, ''), court_name),
               relation = COALESCE(NULLIF(excluded.relation, ''), relation)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(legal_case_id)
        .bind(&entry.case_number)
        .bind(&entry.court_name)
        .bind(&entry.relation)
        .execute(pool)
        .await?;
        written += result.rows_affected() as usize;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scourt_common::db::init_memory_database;

    fn party(name: &str, role: &str) -> PartyEntry {
        PartyEntry {
            name: name.to_string(),
            role: role.to_string(),
            served_date: String::new(),
            confirmed_date: String::new(),
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

    #[tokio::test]
    async fn parties_dedup_on_name_and_role() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        let parties = vec![party("김철수", "원고"), party("이영희", "피고")];
        let first = sync_parties(&pool, "case-1", &parties, &[]).await.unwrap();
        assert_eq!(first.created, 2);

        let second = sync_parties(&pool, "case-1", &parties, &[]).await.unwrap();
        assert_eq!(second.created, 0);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM case_parties")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn representative_attaches_by_role() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        let reps = vec![RepresentativeEntry {
            role: "원고".to_string(),
            name: "법무법인 정의".to_string(),
            firm: "담당변호사 박민준".to_string(),
        }];
        sync_parties(&pool, "case-1", &[party("김철수", "원고")], &reps)
            .await
            .unwrap();

        let representative: Option<String> =
            sqlx::query_scalar("SELECT representative FROM case_parties")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(representative.unwrap().contains("법무법인 정의"));
    }

    #[tokio::test]
    async fn manual_override_rows_are_untouched() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        sync_parties(&pool, "case-1", &[party("김철수", "원고")], &[])
            .await
            .unwrap();
        sqlx::query(
            "UPDATE case_parties SET manual_override = 1, representative = '직접 입력'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let reps = vec![RepresentativeEntry {
            role: "원고".to_string(),
            name: "다른 대리인".to_string(),
            firm: String::new(),
        }];
        let report = sync_parties(&pool, "case-1", &[party("김철수", "원고")], &reps)
            .await
            .unwrap();
        assert_eq!(report.updated, 0);

        let representative: Option<String> =
            sqlx::query_scalar("SELECT representative FROM case_parties")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(representative.as_deref(), Some("직접 입력"));
    }

    #[tokio::test]
    async fn related_cases_fill_in_later_details() {
        let pool = init_memory_database().await.unwrap();
        seed_case(&pool).await;

        let sparse = vec![RelatedCaseEntry {
            case_number: "2023느단500".to_string(),
            court_name: String::new(),
            relation: String::new(),
        }];
        sync_related_cases(&pool, "case-1", &sparse).await.unwrap();

        let full = vec![RelatedCaseEntry {
            case_number: "2023느단500".to_string(),
            court_name: "수원가정법원".to_string(),
            relation: "병합".to_string(),
        }];
        sync_related_cases(&pool, "case-1", &full).await.unwrap();

        let rows: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(
            "SELECT related_case_number, court_name, relation FROM related_cases",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.as_deref(), Some("수원가정법원"));
        assert_eq!(rows[0].2.as_deref(), Some("병합"));
    }
}
