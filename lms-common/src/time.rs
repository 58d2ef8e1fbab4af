//! Timestamp helpers
//!
//! All timestamp columns are stored as RFC3339 TEXT in UTC with fixed
//! microsecond precision, so lexicographic comparison in SQL matches
//! chronological order. Every write must go through [`fmt_ts`].

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage (fixed-width RFC3339, microseconds, Z)
pub fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Format an optional timestamp for storage
pub fn fmt_ts_opt(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(fmt_ts)
}

/// Parse a stored timestamp
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("bad timestamp {s:?}: {e}")))
}

/// Parse an optional stored timestamp
pub fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}
