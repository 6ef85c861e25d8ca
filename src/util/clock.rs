//! Wall-clock helpers.

use chrono::{DateTime, Utc};

/// Current UTC time.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now()
}
