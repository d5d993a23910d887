//! Time-related utilities with clock abstraction for testability.
//!
//! All timestamps inside Parley are Unix milliseconds in UTC. Conversion to
//! wire formats (RFC 3339 for frames, IMF-fixdate for HTTP caching headers)
//! happens at the edges through the helpers below.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Clock trait for dependency injection and testing
pub trait Clock: Send + Sync {
    /// Get current Unix timestamp in UTC (milliseconds)
    fn now_millis(&self) -> i64;
}

/// System clock implementation (uses actual system time)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        get_utc_timestamp()
    }
}

/// Settable clock for tests.
///
/// Returns the stored instant until it is moved with [`FixedClock::set`] or
/// [`FixedClock::advance`].
#[derive(Debug, Default)]
pub struct FixedClock {
    fixed_time: AtomicI64,
}

impl FixedClock {
    /// Create a new fixed clock with the given timestamp
    pub fn new(fixed_time_millis: i64) -> Self {
        Self {
            fixed_time: AtomicI64::new(fixed_time_millis),
        }
    }

    /// Move the clock to an absolute timestamp
    pub fn set(&self, millis: i64) {
        self.fixed_time.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward by `by`
    pub fn advance(&self, by: Duration) {
        self.fixed_time
            .fetch_add(duration_to_millis(by), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.fixed_time.load(Ordering::SeqCst)
    }
}

/// Get current Unix timestamp in UTC (milliseconds)
pub fn get_utc_timestamp() -> i64 {
    Utc::now().timestamp_millis()
}

/// Saturating conversion of a `Duration` into milliseconds.
pub fn duration_to_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn to_datetime(timestamp_millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(timestamp_millis).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Convert Unix timestamp (milliseconds) to UTC RFC 3339 format
pub fn timestamp_to_rfc3339(timestamp_millis: i64) -> String {
    to_datetime(timestamp_millis).to_rfc3339()
}

/// Parse an RFC 3339 string into Unix milliseconds
pub fn parse_rfc3339_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Format a timestamp as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`)
pub fn timestamp_to_http_date(timestamp_millis: i64) -> String {
    to_datetime(timestamp_millis)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Parse an HTTP date into Unix milliseconds (second precision)
pub fn parse_http_date_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp() * 1000)
}
