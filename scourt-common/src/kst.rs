//! Korea Standard Time helpers
//!
//! The portal reports dates as "YYYY.MM.DD" and times as "HH:MM", always in
//! KST. Everything derived from portal data (hearing datetimes, deadline
//! arithmetic) stays in KST so civil-procedure day counting never shifts
//! across a UTC midnight.

use crate::{Error, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static PORTAL_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})\.(\d{2})\.(\d{2})").unwrap());
static PORTAL_TIME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").unwrap());

/// UTC+9, no DST.
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

/// Parse a portal date ("2025.06.17", possibly embedded in surrounding text)
/// into a naive date.
pub fn parse_portal_date(raw: &str) -> Result<NaiveDate> {
    let caps = PORTAL_DATE.captures(raw).ok_or_else(|| Error::Parse {
        path: "date".to_string(),
        message: format!("unrecognized portal date: {raw:?}"),
    })?;
    let year: i32 = caps[1].parse().map_err(|_| invalid_date(raw))?;
    let month: u32 = caps[2].parse().map_err(|_| invalid_date(raw))?;
    let day: u32 = caps[3].parse().map_err(|_| invalid_date(raw))?;
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| invalid_date(raw))
}

fn invalid_date(raw: &str) -> Error {
    Error::Parse {
        path: "date".to_string(),
        message: format!("invalid portal date: {raw:?}"),
    }
}

/// Parse a portal time ("14:00", "9:30"). Blank or unrecognized input falls
/// back to 09:00, the portal's convention for unscheduled times.
pub fn parse_portal_time(raw: &str) -> NaiveTime {
    let default = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default();
    let Some(caps) = PORTAL_TIME.captures(raw) else {
        return default;
    };
    let hour: u32 = match caps[1].parse() {
        Ok(h) => h,
        Err(_) => return default,
    };
    let minute: u32 = match caps[2].parse() {
        Ok(m) => m,
        Err(_) => return default,
    };
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(default)
}

/// Combine a portal date and time into a KST datetime.
pub fn parse_portal_datetime(date: &str, time: &str) -> Result<DateTime<FixedOffset>> {
    let d = parse_portal_date(date)?;
    let t = parse_portal_time(time);
    kst()
        .from_local_datetime(&d.and_time(t))
        .single()
        .ok_or_else(|| invalid_date(date))
}

/// ISO date string ("2025-06-17") for storage and dedup keys.
pub fn to_iso_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Calendar-day deadline arithmetic: trigger date plus N days.
/// 2025-06-17 + 14 days lands on 2025-07-01.
pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

/// Today's date in KST, regardless of host timezone.
pub fn today_kst() -> NaiveDate {
    Utc::now().with_timezone(&kst()).date_naive()
}
