//! Statutory deadline derivation
//!
//! Certain detected updates start fixed statutory periods. The rule is
//! chosen from the case-number category:
//!   - civil/family/administrative appeal: 14 days from judgment service
//!   - criminal appeal: 7 days from pronouncement
//!   - family non-litigation immediate appeal: 14 days from notice
//!   - mediation objection: 14 days from settlement
//! Due dates are pure arithmetic over the trigger date, and the
//! (case, type, trigger date) unique constraint makes registration
//! idempotent.

use crate::reconcile::changes::{CaseUpdate, UpdateType};
use once_cell::sync::Lazy;
use regex::Regex;
use scourt_common::{case_number, kst, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

pub const DL_APPEAL: &str = "DL_APPEAL";
pub const DL_CRIMINAL_APPEAL: &str = "DL_CRIMINAL_APPEAL";
pub const DL_FAMILY_NONLIT: &str = "DL_FAMILY_NONLIT";
pub const DL_MEDIATION_OBJ: &str = "DL_MEDIATION_OBJ";

static EMBEDDED_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\.(\d{2})\.(\d{2})").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseCategory {
    Civil,
    Family,
    Criminal,
    Administrative,
    Execution,
}

/// Category lookup over the court's case-type syllables. Rehearing variants
/// ("재고단", "재드단") carry the base code as a suffix and classify with it.
pub fn category_for_code(code: &str) -> Option<CaseCategory> {
    const CRIMINAL: &[&str] = &[
        "고단", "고합", "고정", "고약", "노", "도", "로", "모", "오", "초",
    ];
    const ADMIN: &[&str] = &["구단", "구합", "구", "누", "두", "아"];
    const FAMILY: &[&str] = &[
        "드단", "드합", "드", "느단", "느합", "느", "르", "므", "브", "스", "조", "즈기",
        "즈단", "즈합", "호기", "호명", "호파", "호협", "호",
    ];
    const CIVIL: &[&str] = &[
        "가단", "가합", "가소", "나", "다", "라", "마", "머", "바", "사", "서", "으", "저",
    ];
    const EXECUTION: &[&str] = &["타경", "타채", "본", "차전", "차"];

    let tables: &[(&[&str], CaseCategory)] = &[
        (CRIMINAL, CaseCategory::Criminal),
        (ADMIN, CaseCategory::Administrative),
        (FAMILY, CaseCategory::Family),
        (CIVIL, CaseCategory::Civil),
        (EXECUTION, CaseCategory::Execution),
    ];
    // rehearing variants prefix the base code with 재; anything else must
    // match a known code exactly
    let base = code.strip_prefix('재').unwrap_or(code);
    for (codes, category) in tables {
        if codes.iter().any(|c| base == *c) {
            return Some(*category);
        }
    }
    None
}

pub fn category_for_case_number(number: &str) -> Option<CaseCategory> {
    let parsed = case_number::parse_case_number(number)?;
    category_for_code(&parsed.case_type)
}

#[derive(Debug, Clone)]
pub struct DeadlineRule {
    pub deadline_type: &'static str,
    pub days: i64,
    pub trigger_event: &'static str,
}

/// Appeal-period rule for a case. Family non-litigation codes are checked
/// before the broad category: a "르" appeal is an immediate-appeal matter
/// even though its category is family.
pub fn appeal_rule(number: &str) -> Option<DeadlineRule> {
    let parsed = case_number::parse_case_number(number)?;
    let code = parsed.case_type.as_str();
    let category = category_for_code(code);

    if category == Some(CaseCategory::Criminal) {
        return Some(DeadlineRule {
            deadline_type: DL_CRIMINAL_APPEAL,
            days: 7,
            trigger_event: "판결 선고일",
        });
    }

    const FAMILY_NONLIT: &[&str] = &[
        "르", "브", "스", "조", "즈기", "즈단", "즈합", "호", "호기", "호명", "호파", "호협",
    ];
    let base = code.strip_prefix('재').unwrap_or(code);
    if FAMILY_NONLIT.iter().any(|c| base == *c) {
        return Some(DeadlineRule {
            deadline_type: DL_FAMILY_NONLIT,
            days: 14,
            trigger_event: "심판 고지일",
        });
    }

    match category {
        Some(CaseCategory::Civil)
        | Some(CaseCategory::Family)
        | Some(CaseCategory::Administrative) => Some(DeadlineRule {
            deadline_type: DL_APPEAL,
            days: 14,
            trigger_event: "판결 송달일",
        }),
        _ => None,
    }
}

/// Which deadline, if any, an update starts.
pub fn rule_for_update(update: &CaseUpdate, number: &str) -> Option<DeadlineRule> {
    match update.update_type {
        UpdateType::ResultAnnounced => appeal_rule(number),
        UpdateType::HearingResult => {
            let result = update.details["result"].as_str().unwrap_or("");
            if result.contains("조정") || result.contains("화해") {
                Some(DeadlineRule {
                    deadline_type: DL_MEDIATION_OBJ,
                    days: 14,
                    trigger_event: "조정 성립일",
                })
            } else {
                None
            }
        }
        // scheduling and everything else never starts a period
        _ => None,
    }
}

/// Trigger date for an update: the first portal date in its details, else
/// today in KST when the portal gave no usable date.
pub fn extract_trigger_date(update: &CaseUpdate) -> String {
    let haystack = update.details.to_string();
    if let Some(caps) = EMBEDDED_DATE.captures(&haystack) {
        return format!("{}-{}-{}", &caps[1], &caps[2], &caps[3]);
    }
    kst::to_iso_date(kst::today_kst())
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeadlineReport {
    pub registered: usize,
    pub skipped: usize,
}

/// Register deadlines for a batch of detected updates. Duplicate
/// (type, trigger date) pairs are silently skipped.
pub async fn register_deadlines(
    pool: &SqlitePool,
    legal_case_id: &str,
    number: &str,
    updates: &[CaseUpdate],
) -> Result<DeadlineReport> {
    let mut report = DeadlineReport::default();

    for update in updates {
        let Some(rule) = rule_for_update(update, number) else {
            continue;
        };

        let trigger_date = extract_trigger_date(update);
        let due = match kst::parse_portal_date(&trigger_date.replace('-', ".")) {
            Ok(d) => kst::to_iso_date(kst::add_days(d, rule.days)),
            Err(_) => {
                report.skipped += 1;
                continue;
            }
        };

        let inserted = sqlx::query(
            "INSERT INTO case_deadlines
               (id, legal_case_id, deadline_type, trigger_date, due_date, description, source)
             VALUES (?, ?, ?, ?, ?, ?, 'auto')
             ON CONFLICT(legal_case_id, deadline_type, trigger_date) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(legal_case_id)
        .bind(rule.deadline_type)
        .bind(&trigger_date)
        .bind(&due)
        .bind(format!("{} 기준 {}일", rule.trigger_event, rule.days))
        .execute(pool)
        .await?;

        if inserted.rows_affected() == 1 {
            report.registered += 1;
            tracing::info!(
                case = number,
                deadline_type = rule.deadline_type,
                trigger_date = %trigger_date,
                due_date = %due,
                "Deadline registered"
            );
        } else {
            report.skipped += 1;
        }
    }

    Ok(report)
}
