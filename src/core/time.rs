//! Julian-day clock arithmetic
//!
//! The engine expresses wall-clock time as a Julian day number. The host
//! clock reports milliseconds since the Unix epoch, which falls on Julian day
//! 2440587.5.

/// Julian day number of 1970-01-01T00:00:00Z
pub const UNIX_EPOCH_JULIAN_DAY: f64 = 2440587.5;

/// Milliseconds in one day
pub const MS_PER_DAY: i64 = 86_400_000;

/// Unix epoch expressed in Julian milliseconds (2440587.5 * 86400000)
pub const UNIX_EPOCH_JULIAN_MS: i64 = 24_405_875 * 8_640_000;

/// Convert host Unix milliseconds to Julian milliseconds
pub fn julian_ms_from_unix_ms(unix_ms: i64) -> i64 {
    UNIX_EPOCH_JULIAN_MS + unix_ms
}

/// Convert host Unix milliseconds to a fractional Julian day
pub fn julian_day_from_unix_ms(unix_ms: i64) -> f64 {
    UNIX_EPOCH_JULIAN_DAY + unix_ms as f64 / MS_PER_DAY as f64
}

/// Convert Julian milliseconds back to Unix milliseconds
pub fn unix_ms_from_julian_ms(julian_ms: i64) -> i64 {
    julian_ms - UNIX_EPOCH_JULIAN_MS
}
