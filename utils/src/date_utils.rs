use chrono::{Duration, NaiveDate};
use errors::Result;

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| errors::Error::invalid_task(format!("bad date: {raw}")))
}

/// Millisecond bounds for the inclusive day range `[start, end]` in UTC:
/// `[start 00:00:00.000, end+1d 00:00:00.000)`.
pub fn day_range_millis(start: NaiveDate, end: NaiveDate) -> (i64, i64) {
    let start_ms = start
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp_millis();
    let end_ms = (end + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp_millis();
    (start_ms, end_ms)
}

/// Millisecond timestamp for the end of the given day (exclusive bound).
pub fn end_of_day_millis(date: NaiveDate) -> i64 {
    day_range_millis(date, date).1
}
