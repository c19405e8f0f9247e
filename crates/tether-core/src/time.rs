//! Time utilities for Tether
//!
//! Unix-timestamp helpers used for upload filename stamping and
//! health-monitoring arithmetic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// # Panics
/// Panics if the system time is before the Unix epoch (1970-01-01),
/// which would indicate a severely misconfigured system.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis() as u64
}

/// Get the current Unix timestamp in seconds.
///
/// # Panics
/// Panics if the system time is before the Unix epoch.
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs()
}

/// Calculate elapsed time in milliseconds since a given timestamp.
///
/// Returns 0 if the given time is in the future.
pub fn elapsed_millis(since: u64) -> u64 {
    current_time_millis().saturating_sub(since)
}

/// Calculate elapsed time as a Duration since a millisecond timestamp.
///
/// Returns Duration::ZERO if the given time is in the future.
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(elapsed_millis(since_millis))
}
