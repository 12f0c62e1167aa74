//! Connection pooling on top of deadpool.

mod base;
mod connection_pool;
mod manager;
mod tcp;

pub use base::{ConnectionFactory, IdleCleanupPolicy, PoolEvent, PoolListener};
pub use connection_pool::{ConnectionPool, PooledConnection};
pub use manager::ConnectionManager;
pub use tcp::TcpConnectionFactory;
