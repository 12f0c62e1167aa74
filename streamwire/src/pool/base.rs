use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use streamwire_config::shared::PoolConfig;

use crate::codec::WireCodec;
use crate::concurrency::cancel::CancelRx;
use crate::connection::base::Connection;
use crate::error::WireResult;

/// Opens connections for a [`crate::pool::ConnectionPool`].
pub trait ConnectionFactory: Send + Sync + 'static {
    type Codec: WireCodec;

    /// Vendor-defined parameters describing how to reach the remote resource.
    type Parameters: Send + Sync + 'static;

    /// Checks `parameters` once, when the pool is built.
    fn validate(&self, parameters: &Self::Parameters) -> WireResult<()>;

    fn connect(
        &self,
        id: u64,
        parameters: &Self::Parameters,
    ) -> impl Future<Output = WireResult<Connection<Self::Codec>>> + Send;

    /// Closes a connection the pool no longer keeps.
    fn close(
        &self,
        connection: Connection<Self::Codec>,
    ) -> impl Future<Output = WireResult<()>> + Send {
        async move { connection.close(&CancelRx::never()).await }
    }
}

/// Lifecycle notifications of pooled connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    Created { connection_id: u64 },
    Acquired { connection_id: u64 },
    Returned { connection_id: u64 },
    /// The pool gave up the connection: discarded, cleaned up, taken unmanaged, or closed.
    Closed { connection_id: u64 },
}

pub trait PoolListener: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

impl<F> PoolListener for F
where
    F: Fn(&PoolEvent) + Send + Sync,
{
    fn on_event(&self, event: &PoolEvent) {
        self(event)
    }
}

#[derive(Clone)]
pub(crate) struct PoolListeners(Arc<[Arc<dyn PoolListener>]>);

impl PoolListeners {
    pub(crate) fn new(listeners: Vec<Arc<dyn PoolListener>>) -> Self {
        Self(listeners.into())
    }

    pub(crate) fn emit(&self, event: PoolEvent) {
        for listener in self.0.iter() {
            listener.on_event(&event);
        }
    }
}

/// Which idle connections [`crate::pool::ConnectionPool::cleanup_idle`] removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleCleanupPolicy {
    /// Connections unused for at least this long are closed.
    pub max_idle: Duration,
}

impl IdleCleanupPolicy {
    pub fn new(max_idle: Duration) -> Self {
        Self { max_idle }
    }
}

impl From<&PoolConfig> for IdleCleanupPolicy {
    fn from(config: &PoolConfig) -> Self {
        Self::new(config.max_idle())
    }
}
