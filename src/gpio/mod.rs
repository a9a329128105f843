//! Hardware abstraction boundary consumed by the motor core.
//!
//! Single outputs (STEP reserved per motor, DIR driven per motor) are plain
//! embedded-hal 1.0 [`OutputPin`]s. Driving a whole motor group in lockstep
//! additionally needs one atomic multi-line write target, which embedded-hal
//! does not model, so that half of the boundary is the crate-local
//! [`OutputGroup`] trait. A [`Gpio`] provider hands out both.
//!
//! Pin identifiers are opaque platform-specific values; the core performs no
//! I/O beyond acquiring handles and writing levels. Handles release their
//! lines on drop. Chip/line bookkeeping (including keeping a motor's step
//! line *reserved* but undriven between move requests) is entirely the
//! provider's business.

pub mod mock;

use core::fmt;

use embedded_hal::digital::OutputPin;
pub use embedded_hal::digital::PinState;

use crate::error::Result;

/// Provider of GPIO output handles.
///
/// Implementations wrap a real character-device or memory-mapped GPIO
/// driver; [`mock::MockGpio`] is an in-memory implementation for tests and
/// host-side simulation.
pub trait Gpio: Send + Sync + 'static {
    /// Opaque platform-specific pin identifier.
    type Pin: Copy + Eq + fmt::Debug + Send + Sync + 'static;

    /// Exclusively owned single output line.
    type Output: OutputPin + Send + 'static;

    /// Exclusively owned group of output lines written as one atomic unit.
    type Group: OutputGroup + Send + 'static;

    /// Claim a single pin as a driven output, starting at `initial`.
    ///
    /// Fails with `ResourceUnavailable` if the line is already claimed.
    fn acquire_output(&self, pin: Self::Pin, initial: PinState) -> Result<Self::Output>;

    /// Claim several pins as one atomic output group, all driven low.
    ///
    /// All lines are claimed together; if any line is unavailable, none are
    /// claimed and `ResourceUnavailable` is returned.
    fn acquire_group(&self, pins: &[Self::Pin]) -> Result<Self::Group>;
}

/// A group of output lines toggled by a single atomic write.
pub trait OutputGroup {
    /// Error type for group writes.
    type Error: fmt::Debug;

    /// Drive every line in the group, one level per line in acquisition
    /// order. `levels.len()` must equal the group size.
    fn write(&mut self, levels: &[PinState]) -> core::result::Result<(), Self::Error>;
}
