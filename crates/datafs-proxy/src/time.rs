//! Conversions between store timestamps (Unix nanoseconds) and the clock
//! types the two driver interfaces speak.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: u64 = 116_444_736_000_000_000;

pub fn to_system_time(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

/// Clamps times before the epoch to 0.
pub fn from_system_time(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Windows FILETIME (100ns ticks since 1601).
pub fn to_filetime(nanos: u64) -> u64 {
    nanos / 100 + FILETIME_UNIX_OFFSET
}

/// `None` for the two FILETIME values meaning "leave unchanged" (0 and all
/// ones).
pub fn from_filetime(filetime: u64) -> Option<u64> {
    if filetime == 0 || filetime == u64::MAX {
        return None;
    }
    Some(filetime.saturating_sub(FILETIME_UNIX_OFFSET).saturating_mul(100))
}
