//! Connections, statement dispatch and lazy result enumeration.

pub mod base;
pub mod dispatch;
pub mod enumeration;
pub mod listener;
pub mod vendor;
