//! Portal protocol types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cookies from a live portal session.
///
/// The JSESSIONID is short-lived; the WMONID is the long-lived browser
/// identity every stored encrypted case number is bound to.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub jsession_id: String,
    pub wmonid: String,
    /// Expiry the portal put on the WMONID cookie, when it sent one
    pub wmonid_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SessionInfo {
    pub fn cookie_header(&self) -> String {
        format!("WMONID={}; JSESSIONID={}", self.wmonid, self.jsession_id)
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_minutes()
    }
}

/// Identifies a case to the portal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseQuery {
    /// Court name or numeric code
    pub court: String,
    /// 4-digit year
    pub year: String,
    /// Case-type syllables ("드단") or numeric code
    pub case_type: String,
    /// Serial, unpadded
    pub serial: String,
    /// Party name, required by the search form
    pub party_name: String,
}

/// Captcha challenge: image bytes plus the server-issued answer token.
/// The submitted answer is the recognized text with the token appended.
#[derive(Debug, Clone)]
pub struct CaptchaChallenge {
    pub image: Vec<u8>,
    pub token: String,
}

/// Search outcome. The 64-character encrypted case number, when present,
/// unlocks captcha-free detail access under the same WMONID.
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub enc_cs_no: Option<String>,
    pub raw: serde_json::Value,
}

/// Raw detail/progress documents; tolerant extraction happens downstream.
#[derive(Debug, Clone)]
pub struct CaseDocuments {
    pub detail: Option<serde_json::Value>,
    pub progress: Option<serde_json::Value>,
}

/// One progress entry after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub date: String,
    pub content: String,
    pub result: String,
}

/// One hearing row after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HearingEntry {
    pub date: String,
    pub time: String,
    pub kind: String,
    pub location: String,
    pub result: String,
}

/// One party row after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyEntry {
    pub name: String,
    pub role: String,
    /// Judgment-service date, when reported
    pub served_date: String,
    /// Per-party finality date
    pub confirmed_date: String,
}

/// One representative row after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepresentativeEntry {
    pub role: String,
    pub name: String,
    pub firm: String,
}

/// One submitted-document row after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub date: String,
    pub name: String,
}

/// One related-case row after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedCaseEntry {
    pub case_number: String,
    pub court_name: String,
    pub relation: String,
}

/// Basic case information after tolerant extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicInfo {
    pub case_no: String,
    pub case_name: String,
    pub court_name: String,
    pub panel: String,
    pub received_date: String,
    pub final_result: String,
    pub final_result_date: String,
    pub confirmed_date: String,
    pub judgment_served_date: String,
}
