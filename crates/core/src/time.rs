use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaterfallError};

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Search window in unix epoch seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceWindow {
    pub start: i64,
    pub end: i64,
}

impl TraceWindow {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Window covering a span. One second is added to the end so sub-second
    /// remainders truncated by the conversion stay inside the window.
    pub fn for_span(start_unix_nano: u64, end_unix_nano: u64) -> Self {
        Self {
            start: nanos_to_epoch_secs(start_unix_nano),
            end: nanos_to_epoch_secs(end_unix_nano) + 1,
        }
    }

    /// One-second window starting at a known trace start.
    pub fn starting_at(ts: DateTime<Utc>) -> Self {
        let start = ts.timestamp();
        Self {
            start,
            end: start + 1,
        }
    }

    pub fn lookback(now: DateTime<Utc>, lookback: Duration) -> Self {
        let end = now.timestamp();
        Self {
            start: end.saturating_sub(lookback.as_secs() as i64),
            end,
        }
    }

    /// The backend rejects windows whose end is not after the start.
    pub fn query_end(&self) -> i64 {
        if self.start < self.end {
            self.end
        } else {
            self.end + 1
        }
    }
}

pub fn nanos_to_epoch_secs(nanos: u64) -> i64 {
    (nanos / NANOS_PER_SEC) as i64
}

pub fn parse_time_or_relative(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    if let Ok(duration) = humantime::parse_duration(input) {
        return Ok(Utc::now()
            - chrono::Duration::from_std(duration).map_err(|e| {
                WaterfallError::Parse(format!("failed to parse duration to chrono: {e}"))
            })?);
    }

    Err(WaterfallError::Parse(format!(
        "expected RFC3339 time or duration, got {input}"
    )))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| WaterfallError::Parse(format!("invalid duration {input}: {e}")))
}
