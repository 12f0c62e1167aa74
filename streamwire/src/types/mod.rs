//! Statements sent to the server and the metadata describing what comes back.

mod column;
mod statement;

pub use column::*;
pub use statement::*;
