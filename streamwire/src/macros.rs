//! Macros for streamwire error handling.

/// Creates a [`crate::error::WireError`] from error kind and description.
///
/// A third argument adds dynamic detail, converted with `to_string()`.
#[macro_export]
macro_rules! wire_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::WireError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::WireError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Creates and returns a [`crate::error::WireError`] from the current function.
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::wire_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::wire_error!($kind, $desc, $detail))
    };
}
