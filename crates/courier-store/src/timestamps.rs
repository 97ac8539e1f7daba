//! Store timestamp conversion.
//!
//! The host store counts time from the Apple epoch (2001-01-01 UTC). Older
//! stores record whole seconds, newer ones nanoseconds, and the column does
//! not say which. Values whose magnitude exceeds [`NANOSECOND_THRESHOLD`]
//! are read as nanoseconds: 10^11 seconds is over three thousand years
//! away, while 10^11 nanoseconds is under two minutes past the epoch.

use chrono::{DateTime, Utc};

use courier_shared::constants::APPLE_EPOCH_OFFSET_SECS;

pub const NANOSECOND_THRESHOLD: i64 = 100_000_000_000;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Convert a raw store timestamp to UTC.
pub fn from_apple(raw: i64) -> DateTime<Utc> {
    let (secs, nanos) = if raw.abs() > NANOSECOND_THRESHOLD {
        (raw.div_euclid(NANOS_PER_SEC), raw.rem_euclid(NANOS_PER_SEC))
    } else {
        (raw, 0)
    };
    DateTime::from_timestamp(secs + APPLE_EPOCH_OFFSET_SECS, nanos as u32).unwrap_or_default()
}

/// Like [`from_apple`], but `0` (the store's "never") maps to `None`.
pub fn from_apple_optional(raw: i64) -> Option<DateTime<Utc>> {
    (raw != 0).then(|| from_apple(raw))
}

/// Convert UTC to the store's nanosecond representation.
pub fn to_apple_nanos(ts: DateTime<Utc>) -> i64 {
    (ts.timestamp() - APPLE_EPOCH_OFFSET_SECS) * NANOS_PER_SEC + i64::from(ts.timestamp_subsec_nanos())
}
