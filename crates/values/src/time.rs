use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use crate::Error;

/// Parse a UTC timestamp into epoch seconds. Accepts RFC 3339 and a bare
/// `YYYY-MM-DD` date (taken as midnight UTC).
pub fn parse_utc(text: &str) -> Result<i64, Error> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp());
        }
    }
    Err(Error::BadTimestamp(text.to_string()))
}

/// Format epoch seconds as `YYYY-MM-DDTHH:MM:SSZ`. Returns None for epochs
/// outside chrono's representable range.
pub fn to_utc(epoch: i64) -> Option<String> {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .map(|ts| ts.format("%Y-%m-%dT%H:%M:%SZ").to_string())
}
