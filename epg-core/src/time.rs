//! Wall-clock helpers. The wire protocol and on-disk format both use plain
//! 32-bit Unix timestamps (seconds), matching the original's `time_t` fields.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds.
#[inline]
pub fn timestamp_secs() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as u32
}

/// Seconds elapsed since `since`, saturating at zero if the clock moved backwards.
#[inline]
pub fn elapsed_secs(since: u32) -> u32 {
    timestamp_secs().saturating_sub(since)
}
