use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The remote host cannot be empty.
    #[error("`host` cannot be empty")]
    EmptyHost,
    /// Port zero cannot be dialed.
    #[error("`port` must be greater than zero")]
    ZeroPort,
    /// A pool without capacity can never hand out a connection.
    #[error("`max_size` cannot be zero")]
    ZeroPoolSize,
    /// Timeouts of zero milliseconds would fail every attempt.
    #[error("`{0}` must be greater than zero when set")]
    ZeroTimeout(&'static str),
}
