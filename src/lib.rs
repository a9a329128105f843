//! # stepper-drive
//!
//! Thread-per-motor stepper control with lockstep multi-motor move requests.
//!
//! ## Features
//!
//! - **Thread per motor**: every motor owns a parked worker thread; issuing
//!   a move never blocks the caller
//! - **Lockstep groups**: one *leader* thread pulses a whole motor group
//!   through a single atomic multi-line output, so member lines can never
//!   race each other
//! - **Safe cancel/wait**: `stop` is cooperative and bounded to one pulse;
//!   `wait` blocks until the group request has fully unwound
//! - **Position tracking**: signed step accumulator per motor, relaxed reads
//! - **Pluggable GPIO**: single lines are embedded-hal 1.0 `OutputPin`s;
//!   group writes go through the crate's [`OutputGroup`] trait
//!
//! ## Quick Start
//!
//! ```rust
//! use stepper_drive::{Direction, Microsteps, Motor, TaskRegistry};
//! use stepper_drive::gpio::mock::MockGpio;
//!
//! let registry = TaskRegistry::new();
//! let gpio = MockGpio::new();
//!
//! let motor = Motor::create(
//!     &registry,
//!     gpio.clone(),
//!     "azimuth",
//!     7,  // STEP line
//!     11, // DIR line
//!     Microsteps::HALF,
//!     200,
//!     Direction::Clockwise,
//! )?;
//!
//! motor.set_speed(1000)?;
//! motor.step(400)?;
//! motor.wait();
//! assert_eq!(motor.steps(), 400);
//! # Ok::<(), stepper_drive::Error>(())
//! ```
//!
//! Millimeter-based kinematics, configuration parsing and transport layers
//! are clients of this API and live outside the crate.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

// Core modules
pub mod error;
pub mod gpio;
pub mod motor;
pub mod registry;

mod sync;

// Re-exports for ergonomic API
pub use error::{Error, Result};
pub use gpio::{Gpio, OutputGroup, PinState};
pub use motor::{
    Direction, Microsteps, Motor, RelativeDirection, MAX_GROUP_SIZE, MAX_PULSE_RATE,
    MOTOR_NAME_LEN,
};
pub use registry::{CancelToken, TaskId, TaskRegistry, MAX_STACK_SIZE, TASK_NAME_LEN};
