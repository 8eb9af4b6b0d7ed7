//! Shared utility functions
//! Common helpers used across the codebase

use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in seconds
#[inline]
#[must_use]
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Random delay in `[0, ceiling_ms)`. A zero ceiling disables jitter.
#[must_use]
pub fn jitter_delay(ceiling_ms: u64) -> Duration {
    if ceiling_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..ceiling_ms))
}

/// Extract the hostname from a location string, empty when it has none
#[must_use]
pub fn hostname_of(location: &str) -> String {
    url::Url::parse(location)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}
