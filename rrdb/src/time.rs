//! Time helpers shared by the update and fetch paths.
//!
//! All timestamps in rrdb are whole seconds since the Unix epoch, held as
//! `i64` so that archive start times derived near the epoch may go negative.

use std::time::{SystemTime, UNIX_EPOCH};

/// Rounds `timestamp` down to the nearest multiple of `step`.
///
/// Uses Euclidean remainder, so negative timestamps also round towards
/// negative infinity. `step` must be positive.
///
/// # Examples
///
/// ```rust
/// use rrdb::time::normalize;
///
/// assert_eq!(normalize(1_000, 300), 900);
/// assert_eq!(normalize(900, 300), 900);
/// assert_eq!(normalize(-1, 300), -300);
/// ```
pub fn normalize(timestamp: i64, step: i64) -> i64 {
    timestamp - timestamp.rem_euclid(step)
}

/// Like [`normalize`], but returns `None` instead of overflowing for
/// timestamps within one step of `i64::MIN`.
pub fn checked_normalize(timestamp: i64, step: i64) -> Option<i64> {
    timestamp.checked_sub(timestamp.rem_euclid(step))
}

/// Returns the current wall clock time in whole seconds since the epoch.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
