//! Court and case-type code tables
//!
//! The search call accepts court names, but the detail call wants the
//! portal's numeric codes. Already-numeric input passes through unchanged so
//! callers can store either form.

/// Court name (full or short form) to portal code.
pub fn court_code(court_name: &str) -> String {
    if is_numeric(court_name) {
        return court_name.to_string();
    }

    let code = match court_name {
        "수원가정법원" | "수원가정" => "000302",
        "수원가정법원 성남지원" | "성남가정" => "000303",
        "수원가정법원 여주지원" | "여주가정" => "000304",
        "수원가정법원 평택지원" | "평택가정" => "000305",
        "수원가정법원 안양지원" | "안양가정" => "000306",
        "수원가정법원 안산지원" | "안산가정" => "000322",
        "서울가정법원" | "서울가정" => "000201",
        "인천가정법원" | "인천가정" => "000401",
        "대전가정법원" | "대전가정" => "000501",
        "대구가정법원" | "대구가정" => "000601",
        "부산가정법원" | "부산가정" => "000701",
        "광주가정법원" | "광주가정" => "000801",
        "울산가정법원" | "울산가정" => "000132",
        other => other,
    };
    code.to_string()
}

/// Case-type syllables to the portal's 3-digit type code.
pub fn case_type_code(case_type: &str) -> String {
    if is_numeric(case_type) {
        return case_type.to_string();
    }

    let code = match case_type {
        "드단" => "150",
        "드합" => "151",
        "느단" => "140",
        "느합" => "141",
        "호" => "120",
        "르" => "160",
        other => other,
    };
    code.to_string()
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_courts() {
        assert_eq!(court_code("수원가정법원 평택지원"), "000305");
        assert_eq!(court_code("평택가정"), "000305");
        assert_eq!(court_code("서울가정법원"), "000201");
    }

    #[test]
    fn numeric_codes_pass_through() {
        assert_eq!(court_code("000305"), "000305");
        assert_eq!(case_type_code("150"), "150");
    }

    #[test]
    fn unknown_names_pass_through() {
        assert_eq!(court_code("미지의법원"), "미지의법원");
    }

    #[test]
    fn maps_case_types() {
        assert_eq!(case_type_code("드단"), "150");
        assert_eq!(case_type_code("르"), "160");
    }
}
