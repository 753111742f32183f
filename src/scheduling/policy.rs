//! Rate policy calculator
//!
//! Derives the minimum gap between two scheduled sends in the same batch
//! from the stricter of an explicit per-message delay and an
//! hourly-cap-derived minimum.

/// Milliseconds in one hour.
const HOUR_MS: u64 = 3_600_000;

/// Effective spacing in milliseconds between consecutive sends.
///
/// - `hourly_limit == 0` means unlimited: the spacing is just the explicit
///   delay.
/// - Otherwise the spacing is at least `ceil(3_600_000 / hourly_limit)`,
///   so no more than `hourly_limit` messages fall in any window slot.
///
/// Pure and total; the zero branch guards the division.
#[must_use]
pub fn effective_spacing_ms(delay_seconds: u64, hourly_limit: u64) -> u64 {
    let delay_ms = delay_seconds * 1000;
    if hourly_limit == 0 {
        return delay_ms;
    }
    let min_spacing_ms = HOUR_MS.div_ceil(hourly_limit);
    delay_ms.max(min_spacing_ms)
}
