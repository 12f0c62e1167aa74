//! Configuration for streamwire connections and pools.
//!
//! Detects the running environment, layers YAML files with environment
//! variable overrides, and defines the shared connection and pool settings
//! consumed by the core crate.

mod environment;
mod load;
mod secret;
pub mod shared;

pub use environment::*;
pub use load::*;
pub use secret::*;
