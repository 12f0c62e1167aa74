//! Tracing setup shared by streamwire binaries and tests.

pub mod tracing;
