// Utility functions
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parses a remote timestamp, with or without sub-second precision or offset.
pub fn parse_datetime(date_str: &str) -> Option<DateTime<Utc>> {
    let raw = date_str.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    // Naive forms: drop the fractional part, then try a few layouts.
    let base = raw.split('.').next().unwrap_or(raw);
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(base, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(base, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| naive.and_utc())
}

/// Release date from `YYYY` or `YYYYMM`, tolerating float formatting (`202103.0`).
pub fn parse_release_date(raw: &str) -> Option<NaiveDate> {
    let digits = raw.trim().split('.').next()?.trim();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match digits.len() {
        4 => NaiveDate::from_ymd_opt(digits.parse().ok()?, 1, 1),
        6 => {
            let year = digits[..4].parse().ok()?;
            let month = digits[4..].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1)
        }
        _ => None,
    }
}
