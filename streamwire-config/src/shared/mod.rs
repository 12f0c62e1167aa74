mod base;
mod connection;
mod pool;

pub use base::*;
pub use connection::*;
pub use pool::*;
