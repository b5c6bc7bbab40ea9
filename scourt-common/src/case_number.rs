//! Case number normalization and parsing
//!
//! Korean court case numbers come in as free text ("서울가정법원 2024드합12345",
//! "２０２４가단12345", "2024-가단-12345"). Normalizing them before any portal
//! call keeps search failures down and makes dedup keys stable.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static COURT_WITH_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[가-힣]+(?:법원|지원)\s+").unwrap());
static COURT_NO_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[가-힣]+(?:법원|지원)(\d{4})").unwrap());
static GENERAL_COURT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[가-힣]+(\d{4}[가-힣]+\d+)$").unwrap());
static STRICT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})([가-힣]+)(\d+)$").unwrap());
static LOOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})([가-힣]+)(\d+)").unwrap());

/// Parsed case number components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedCaseNumber {
    pub original: String,
    /// Normalized form, e.g. "2024가단12345"
    pub normalized: String,
    pub year: String,
    /// Case-type syllables, e.g. "가단", "드합"
    pub case_type: String,
    pub serial: String,
}

/// Strip a leading court-name prefix.
///
/// Handles "서울가정법원 2024드합12345" (court + space, possibly repeated for
/// branch courts), "평택지원2023타경864" (no space before the year) and bare
/// Hangul prefixes like "평택가정2024드단25547" when the remainder is a
/// well-formed case number.
pub fn strip_court_prefix(case_number: &str) -> String {
    let mut result = case_number.trim().to_string();

    // court + branch + one extra, at most
    for _ in 0..3 {
        let stripped = COURT_WITH_SPACE.replace(&result, "").trim().to_string();
        if stripped == result {
            break;
        }
        result = stripped;
    }

    if let Some(caps) = COURT_NO_SPACE.captures(&result) {
        let year_start = caps.get(1).map(|m| m.start()).unwrap_or(0);
        result = result[year_start..].to_string();
    }

    if let Some(caps) = GENERAL_COURT.captures(&result) {
        if let Some(m) = caps.get(1) {
            result = m.as_str().to_string();
        }
    }

    result.trim().to_string()
}

/// Normalize a case number: strip the court prefix, drop whitespace, hyphens,
/// brackets and interpuncts, and fold full-width digits to ASCII.
pub fn normalize_case_number(case_number: &str) -> String {
    let stripped = strip_court_prefix(case_number);
    stripped
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '-' | '(' | ')' | '[' | ']' | '·'))
        .map(|c| match c {
            '０'..='９' => {
                // U+FF10..U+FF19 -> '0'..'9'
                char::from_u32(c as u32 - 0xFF10 + 0x30).unwrap_or(c)
            }
            _ => c,
        })
        .collect()
}

/// Parse a case number into year, type and serial.
///
/// Tries an exact match first, then a loose scan so embedded case numbers
/// ("2024가단12345(본소)" after normalization) still parse.
pub fn parse_case_number(case_number: &str) -> Option<ParsedCaseNumber> {
    let normalized = normalize_case_number(case_number);
    let caps = STRICT
        .captures(&normalized)
        .or_else(|| LOOSE.captures(&normalized))?;

    Some(ParsedCaseNumber {
        original: case_number.to_string(),
        normalized: caps.get(0)?.as_str().to_string(),
        year: caps.get(1)?.as_str().to_string(),
        case_type: caps.get(2)?.as_str().to_string(),
        serial: caps.get(3)?.as_str().to_string(),
    })
}

pub fn is_valid_case_number(case_number: &str) -> bool {
    parse_case_number(case_number).is_some()
}

/// Build the portal's internal 14-digit case key:
/// year(4) + type code(3, zero padded) + serial(7, zero padded).
pub fn build_cs_no(year: &str, case_type_code: &str, serial: &str) -> String {
    format!("{year}{case_type_code:0>3}{serial:0>7}")
}

/// Display form: normalized with leading zeros dropped from the serial.
pub fn format_case_number(case_number: &str) -> String {
    match parse_case_number(case_number) {
        Some(parsed) => {
            let serial = parsed.serial.trim_start_matches('0');
            let serial = if serial.is_empty() { "0" } else { serial };
            format!("{}{}{}", parsed.year, parsed.case_type, serial)
        }
        None => case_number.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_court_with_space() {
        assert_eq!(strip_court_prefix("서울가정법원 2024드합12345"), "2024드합12345");
        assert_eq!(strip_court_prefix("인천지방법원 2024가단123"), "2024가단123");
        assert_eq!(
            strip_court_prefix("서울중앙지방법원 부천지원 2024나1234"),
            "2024나1234"
        );
    }

    #[test]
    fn strips_court_without_space() {
        assert_eq!(strip_court_prefix("평택지원2023타경864"), "2023타경864");
    }

    #[test]
    fn strips_general_hangul_prefix() {
        assert_eq!(strip_court_prefix("평택가정2024드단25547"), "2024드단25547");
    }

    #[test]
    fn leaves_plain_numbers_alone() {
        assert_eq!(strip_court_prefix("2024가단12345"), "2024가단12345");
    }

    #[test]
    fn normalizes_separators_and_width() {
        assert_eq!(normalize_case_number("2024 가단 12345"), "2024가단12345");
        assert_eq!(normalize_case_number("2024-가단-12345"), "2024가단12345");
        assert_eq!(normalize_case_number("２０２４가단12345"), "2024가단12345");
    }

    #[test]
    fn parses_components() {
        let parsed = parse_case_number("서울가정법원 2024드합12345").unwrap();
        assert_eq!(parsed.normalized, "2024드합12345");
        assert_eq!(parsed.year, "2024");
        assert_eq!(parsed.case_type, "드합");
        assert_eq!(parsed.serial, "12345");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_case_number("사건번호 없음").is_none());
        assert!(!is_valid_case_number(""));
    }

    #[test]
    fn builds_cs_no() {
        assert_eq!(build_cs_no("2024", "1", "12345"), "20240010012345");
        assert_eq!(build_cs_no("2023", "260", "864"), "20232600000864");
    }

    #[test]
    fn formats_without_leading_zeros() {
        assert_eq!(format_case_number("2024가단0012345"), "2024가단12345");
        assert_eq!(format_case_number("not a case"), "not a case");
    }
}
