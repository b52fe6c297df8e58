//! Time utilities: millisecond storage encoding, timezone parsing and
//! local-day boundaries.

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Longest stretch of local time a zone is known to skip (a whole day, when
/// Samoa crossed the date line).
const MAX_GAP_MINUTES: u32 = 48 * 60;

/// Timestamps are stored as milliseconds since the UNIX epoch.
pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

/// Parse an IANA zone name such as `Europe/Rome` or `UTC`.
pub fn parse_timezone(s: &str) -> AppResult<Tz> {
    let s = s.trim();
    s.parse::<Tz>().map_err(|e| {
        AppError::Config(format!(
            "invalid timezone '{}' (expected an IANA name like Europe/Rome): {}",
            s, e
        ))
    })
}

/// The instant a wall clock in `tz` shows `naive`.
///
/// Ambiguous times (the repeated hour when clocks go back) resolve to the
/// earlier instant. Times skipped when clocks go forward resolve to the first
/// instant after the gap.
pub fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut candidate = naive;
    for _ in 0..=MAX_GAP_MINUTES {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return Some(dt);
        }
        candidate = candidate.checked_add_signed(Duration::minutes(1))?;
    }
    None
}

/// UTC instants bounding the local calendar day `[start, end)`. Around DST
/// changes a day lasts 23 or 25 hours.
pub fn day_bounds(date: NaiveDate, tz: Tz) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let invalid = || AppError::Validation(format!("invalid date {}", date));
    let midnight = |d: NaiveDate| {
        d.and_hms_opt(0, 0, 0)
            .and_then(|t| resolve_local(tz, t))
            .map(|dt| dt.with_timezone(&Utc))
    };

    let start = midnight(date).ok_or_else(invalid)?;
    let end = date.succ_opt().and_then(midnight).ok_or_else(invalid)?;
    Ok((start, end))
}
