//! Error types for stepper-drive.
//!
//! Every fallible operation in the crate reports one of three error kinds,
//! synchronously, to its immediate caller. Nothing is deferred and nothing is
//! retried; retry policy belongs to the caller.

/// Result type alias using the library's Error type.
pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for all stepper-drive operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A parameter failed validation (malformed name, zero or out-of-range
    /// count or speed, invalid microstep value, group size out of bounds,
    /// duplicate group members, inconsistent group speeds).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation is incompatible with an in-flight move request.
    #[error("motor is busy")]
    Busy,

    /// A hardware output could not be acquired or driven, or a worker thread
    /// could not be started.
    #[error("resource unavailable: {0}")]
    ResourceUnavailable(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            Error::InvalidArgument("pulse count is zero").to_string(),
            "invalid argument: pulse count is zero"
        );
        assert_eq!(Error::Busy.to_string(), "motor is busy");
        assert_eq!(
            Error::ResourceUnavailable("step line already claimed").to_string(),
            "resource unavailable: step line already claimed"
        );
    }
}
