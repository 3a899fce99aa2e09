//! Timestamps for `last_seen` and bridge presence messages.

use chrono::{DateTime, SecondsFormat, Utc};

/// UTC timestamp.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Render a timestamp the way presence payloads carry it (`2024-01-01T12:00:00Z`).
#[must_use]
pub fn format(ts: Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
