//! Pulse timing derivation.
//!
//! A pulse is one high-then-low transition of the step line; both phases
//! last one half-period. The half-period is derived from the requested pulse
//! rate and fixed for the duration of a move request.

use std::time::Duration;

/// Maximum supported pulse rate, in pulses per second.
///
/// Bounded by the slew rate the drivers tolerate; requested rates above this
/// are clamped, not rejected.
pub const MAX_PULSE_RATE: u32 = 4_160;

/// Half-period of one pulse at the given rate.
///
/// `pps` must be in `1..=MAX_PULSE_RATE` (callers validate and clamp).
pub(crate) fn half_period(pps: u32) -> Duration {
    debug_assert!((1..=MAX_PULSE_RATE).contains(&pps));
    Duration::from_micros(500_000 / u64::from(pps))
}
