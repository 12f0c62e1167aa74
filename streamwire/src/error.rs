use std::error;
use std::fmt;

use deadpool::managed::PoolError;

/// Convenient result type for streamwire operations using [`WireError`] as the error type.
pub type WireResult<T> = Result<T, WireError>;

/// Main error type for streamwire operations.
///
/// [`WireError`] can represent a single error, an error with additional detail, or multiple
/// aggregated errors. Errors are cheap to clone so that a faulted cell or a broken connection
/// can hand the same failure to every later caller.
#[derive(Debug, Clone)]
pub struct WireError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Error with kind and static description
    WithDescription(ErrorKind, &'static str),
    /// Error with kind, static description, and dynamic detail
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    /// Multiple aggregated errors
    Many(Vec<WireError>),
}

/// Specific categories of errors that can occur while driving a connection.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Protocol Errors
    ProtocolViolation,
    InvalidData,
    ServerError,
    IoError,

    // Connection Errors
    ConnectionFailed,
    TimedOut,

    // Sequencing Errors
    StatementInProgress,
    ValueAlreadyConsumed,
    ColumnOutOfRange,

    // Cancellation
    OperationCanceled,

    // State & Argument Errors
    InvalidState,
    InvalidArgument,
    ConfigError,

    // Pool Errors
    PoolTimeout,
    PoolClosed,

    // Unknown / Uncategorized
    Unknown,
}

impl WireError {
    /// Creates a [`WireError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<WireError>) -> WireError {
        WireError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }

    /// Returns `true` when the stream position can no longer be trusted after this error.
    ///
    /// A connection that observes a stream-fatal error is marked broken and never reused.
    pub fn is_stream_fatal(&self) -> bool {
        self.kinds().iter().any(|kind| {
            matches!(
                kind,
                ErrorKind::IoError | ErrorKind::ProtocolViolation | ErrorKind::OperationCanceled
            )
        })
    }
}

impl PartialEq for WireError {
    fn eq(&self, other: &WireError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;

                Ok(())
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)?;

                Ok(())
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for WireError {}

/// Creates a [`WireError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for WireError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> WireError {
        WireError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

/// Creates a [`WireError`] from an error kind, static description, and dynamic detail.
impl From<(ErrorKind, &'static str, String)> for WireError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> WireError {
        WireError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

/// Creates a [`WireError`] from a vector of errors for aggregation.
impl<E> From<Vec<E>> for WireError
where
    E: Into<WireError>,
{
    fn from(errors: Vec<E>) -> WireError {
        WireError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

/// Converts [`std::io::Error`] to [`WireError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for WireError {
    fn from(err: std::io::Error) -> WireError {
        WireError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::IoError,
                "I/O error occurred",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`std::string::FromUtf8Error`] to [`WireError`] with [`ErrorKind::InvalidData`].
impl From<std::string::FromUtf8Error> for WireError {
    fn from(err: std::string::FromUtf8Error) -> WireError {
        WireError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::InvalidData,
                "UTF-8 string conversion failed",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`tokio::time::error::Elapsed`] to [`WireError`] with [`ErrorKind::TimedOut`].
impl From<tokio::time::error::Elapsed> for WireError {
    fn from(err: tokio::time::error::Elapsed) -> WireError {
        WireError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::TimedOut,
                "Operation timed out",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`deadpool::managed::BuildError`] to [`WireError`] with [`ErrorKind::ConfigError`].
impl From<deadpool::managed::BuildError> for WireError {
    fn from(err: deadpool::managed::BuildError) -> WireError {
        WireError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigError,
                "Connection pool could not be built",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`PoolError`] to [`WireError`].
///
/// Backend errors are passed through unchanged so that the caller sees the failure raised by
/// the connection factory.
impl From<PoolError<WireError>> for WireError {
    fn from(err: PoolError<WireError>) -> WireError {
        match err {
            PoolError::Backend(err) => err,
            PoolError::Timeout(timeout) => WireError {
                repr: ErrorRepr::WithDescriptionAndDetail(
                    ErrorKind::PoolTimeout,
                    "Timed out waiting for a pooled connection",
                    format!("{timeout:?}"),
                ),
            },
            PoolError::Closed => WireError {
                repr: ErrorRepr::WithDescription(ErrorKind::PoolClosed, "Connection pool is closed"),
            },
            PoolError::NoRuntimeSpecified => WireError {
                repr: ErrorRepr::WithDescription(
                    ErrorKind::ConfigError,
                    "Connection pool has no runtime for timeouts",
                ),
            },
            other => WireError {
                repr: ErrorRepr::WithDescriptionAndDetail(
                    ErrorKind::Unknown,
                    "Connection pool hook failed",
                    other.to_string(),
                ),
            },
        }
    }
}
