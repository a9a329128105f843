//! Motor control core.
//!
//! Each [`Motor`] owns a direction output, a reserved step line and a worker
//! thread that performs the actual pulsing. Motors move alone or in lockstep
//! groups: a group move attaches one shared move request to every member and
//! wakes only the first motor's thread (the *leader*), which drives all step
//! lines through a single atomic group output. Non-leader threads stay
//! parked for the duration of the request.

mod driver;
mod request;
mod timing;
mod types;
mod worker;

pub use driver::Motor;
pub use timing::MAX_PULSE_RATE;
pub use types::{Direction, Microsteps, RelativeDirection};

/// Maximum amount of motors that may be moved by one request.
pub const MAX_GROUP_SIZE: usize = 8;

/// Maximum name length for a motor, in bytes.
pub const MOTOR_NAME_LEN: usize = 32;
