pub mod codec;
pub mod concurrency;
pub mod connection;
pub mod error;
mod macros;
pub mod pool;
pub mod result;
pub mod stream;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
