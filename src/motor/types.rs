//! Direction and microstep value types.

use crate::error::{Error, Result};
use crate::gpio::PinState;

/// Absolute rotational direction.
///
/// The level driven onto the DIR line follows the usual driver convention:
/// high for clockwise, low for counterclockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Counterclockwise rotation.
    CounterClockwise,
    /// Clockwise rotation.
    Clockwise,
}

impl Direction {
    /// The opposite direction.
    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Self::CounterClockwise => Self::Clockwise,
            Self::Clockwise => Self::CounterClockwise,
        }
    }

    /// Level to drive onto the DIR line.
    #[inline]
    pub(crate) fn pin_state(self) -> PinState {
        match self {
            Self::CounterClockwise => PinState::Low,
            Self::Clockwise => PinState::High,
        }
    }
}

/// Rotational direction relative to a motor's configured positive direction.
///
/// Steps taken in the positive direction are added to the motor's step
/// accumulator; steps taken in the negative direction are subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeDirection {
    /// Against the configured positive direction.
    Negative,
    /// Along the configured positive direction.
    Positive,
}

impl RelativeDirection {
    /// Translate to an absolute direction given the motor's positive one.
    #[inline]
    pub(crate) fn resolve(self, positive: Direction) -> Direction {
        match self {
            Self::Positive => positive,
            Self::Negative => positive.opposite(),
        }
    }
}

/// Validated microstep resolution of a stepper driver.
///
/// Only the fixed power-of-two set supported by the drivers is accepted:
/// 1, 2, 4, 8 or 16 microsteps per full step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Microsteps(u16);

impl Microsteps {
    /// Full stepping.
    pub const FULL: Self = Self(1);
    /// Half stepping.
    pub const HALF: Self = Self(2);
    /// Quarter stepping.
    pub const QUARTER: Self = Self(4);
    /// Eighth stepping.
    pub const EIGHTH: Self = Self(8);
    /// Sixteenth stepping.
    pub const SIXTEENTH: Self = Self(16);

    /// Validate a raw microstep value.
    pub fn new(value: u16) -> Result<Self> {
        match value {
            1 | 2 | 4 | 8 | 16 => Ok(Self(value)),
            _ => Err(Error::InvalidArgument("invalid microstep resolution")),
        }
    }

    /// The raw microsteps-per-full-step value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}
