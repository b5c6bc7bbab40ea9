//! Alias-tolerant extraction from portal JSON documents
//!
//! The portal varies its field and list names across case categories and
//! deployments. Every extractor walks a first-present-wins alias chain and
//! yields empty values for anything missing; a shape surprise never turns
//! into an error here.

use crate::portal::types::{
    BasicInfo, DocumentEntry, HearingEntry, PartyEntry, ProgressEntry, RelatedCaseEntry,
    RepresentativeEntry,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

static KEY_DEF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<w2:(?:key|column)\s+[^>]*id=["']([^"']+)["'][^>]*name=["']([^"']*)["']"#)
        .unwrap()
});

fn first_str<'a>(obj: &'a Value, aliases: &[&str]) -> &'a str {
    for alias in aliases {
        if let Some(s) = obj[*alias].as_str() {
            if !s.is_empty() {
                return s;
            }
        }
    }
    ""
}

fn first_list<'a>(data: &'a Value, aliases: &[&str]) -> &'a [Value] {
    for alias in aliases {
        if let Some(list) = data[*alias].as_array() {
            return list;
        }
    }
    &[]
}

/// Basic case information from the general-content document.
pub fn extract_basic_info(response: &Value) -> BasicInfo {
    let data = &response["data"];
    let info = ["dma_csBasCtt", "dma_csBsCtt", "dma_gnrlCtt"]
        .iter()
        .map(|k| &data[*k])
        .find(|v| v.is_object())
        .unwrap_or(data);

    BasicInfo {
        case_no: first_str(info, &["userCsNo", "csNo"]).to_string(),
        case_name: first_str(info, &["csNm"]).to_string(),
        court_name: first_str(info, &["cortNm"]).to_string(),
        panel: first_str(info, &["jdbnNm", "ultmtJdbnNm", "jdgNm", "jdgpNm"]).to_string(),
        received_date: first_str(info, &["csRcptYmd", "rcptDt", "rcptYmd"]).to_string(),
        final_result: first_str(info, &["csUltmtDtlCtt", "endRslt", "endRsltNm"]).to_string(),
        final_result_date: first_str(info, &["csUltmtYmd", "endDt"]).to_string(),
        confirmed_date: first_str(info, &["csCfmtnYmd", "cfrmDt", "cfrmYmd"]).to_string(),
        judgment_served_date: first_str(info, &["adjdocRchYmd", "jdgArvDt", "jdgArvYmd"])
            .to_string(),
    }
}

/// Hearings from the general-content document.
pub fn extract_hearings(response: &Value) -> Vec<HearingEntry> {
    first_list(
        &response["data"],
        &["dlt_rcntDxdyLst", "dlt_csSchdCtt", "dlt_trmLst"],
    )
    .iter()
    .map(|h| HearingEntry {
        date: first_str(h, &["dxdyYmd", "trmDt", "schdDt"]).to_string(),
        time: first_str(h, &["dxdyHm"]).to_string(),
        kind: first_str(h, &["dxdyKndNm", "dxdyNm", "trmNm", "schdNm"]).to_string(),
        location: first_str(h, &["dxdyPlcNm", "dxdyPntNm", "trmPntNm", "schdPntNm"]).to_string(),
        result: first_str(h, &["dxdyRsltNm", "rslt", "dxdyRslt", "schdRslt"]).to_string(),
    })
    .collect()
}

/// Parties from the general-content document.
pub fn extract_parties(response: &Value) -> Vec<PartyEntry> {
    first_list(&response["data"], &["dlt_btprtCttLst", "dlt_btprLst"])
        .iter()
        .map(|p| PartyEntry {
            name: first_str(p, &["btprNm", "btprtNm"]).to_string(),
            role: first_str(p, &["btprDvsNm", "btprtStndngNm"]).to_string(),
            served_date: first_str(p, &["adjdocRchYmd"]).to_string(),
            confirmed_date: first_str(p, &["indvdCfmtnYmd"]).to_string(),
        })
        .collect()
}

/// Representatives from the general-content document.
pub fn extract_representatives(response: &Value) -> Vec<RepresentativeEntry> {
    first_list(&response["data"], &["dlt_agntCttLst"])
        .iter()
        .map(|a| RepresentativeEntry {
            role: first_str(a, &["agntDvsNm"]).to_string(),
            name: first_str(a, &["agntNm"]).to_string(),
            firm: first_str(a, &["jdafrCorpNm"]).to_string(),
        })
        .collect()
}

/// Recently submitted documents from the general-content document.
pub fn extract_documents(response: &Value) -> Vec<DocumentEntry> {
    first_list(&response["data"], &["dlt_rcntSbmsnDocmtLst", "dlt_sbmsnDocmtLst"])
        .iter()
        .map(|d| DocumentEntry {
            date: first_str(d, &["sbmsnYmd", "rcptYmd", "docYmd"]).to_string(),
            name: first_str(d, &["docmtNm", "docNm", "cttNm"]).to_string(),
        })
        .collect()
}

/// Related cases from the general-content document.
pub fn extract_related_cases(response: &Value) -> Vec<RelatedCaseEntry> {
    first_list(&response["data"], &["dlt_reltCsLst", "dlt_reltCs"])
        .iter()
        .map(|r| RelatedCaseEntry {
            case_number: first_str(r, &["userCsNo", "reltCsNo", "csNo"]).to_string(),
            court_name: first_str(r, &["cortNm", "reltCortNm"]).to_string(),
            relation: first_str(r, &["reltDvsNm", "reltNm"]).to_string(),
        })
        .collect()
}

/// Progress entries from the progress-content document.
pub fn extract_progress(response: &Value) -> Vec<ProgressEntry> {
    first_list(
        &response["data"],
        &[
            "dlt_csProgCtt",
            "dlt_csProgCttLst",
            "dlt_prgrCttLst",
            "dlt_prcdCttLst",
            "dlt_prcsCtt",
        ],
    )
    .iter()
    .map(|p| ProgressEntry {
        date: first_str(p, &["progYmd", "prgrDt", "prcdDt", "evntDt"]).to_string(),
        content: first_str(p, &["progCtt", "prgrCtt", "prcdNm", "evntNm", "cttNm"]).to_string(),
        result: first_str(p, &["progRslt", "prgrRslt", "rslt", "dlvyDt"]).to_string(),
    })
    .collect()
}

/// Progress entries as embedded in the general-content document, used when
/// the dedicated progress endpoint is unavailable.
pub fn extract_embedded_progress(response: &Value) -> Vec<ProgressEntry> {
    first_list(
        &response["data"],
        &[
            "dlt_prcdRslt",
            "dlt_prcdCttLst",
            "dlt_prcdLst",
            "dlt_prgrRsltLst",
            "dlt_prcsCtt",
        ],
    )
    .iter()
    .map(|p| ProgressEntry {
        date: first_str(p, &["prcdDt", "prcsDt", "prgrDt", "evntDt"]).to_string(),
        content: first_str(p, &["prcdNm", "prcsNm", "prgrNm", "evntNm", "cttNm"]).to_string(),
        result: first_str(p, &["prcdRslt", "rslt", "prgrRslt"]).to_string(),
    })
    .collect()
}

/// Field id to label mapping from cached fragment XML
/// (`<w2:key id=".." name="..">` and columnInfo column definitions).
pub fn extract_field_definitions(fragment_xml: &str) -> BTreeMap<String, String> {
    KEY_DEF_RE
        .captures_iter(fragment_xml)
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}
