use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use tracing::{debug, info, warn};

use crate::connection::base::Connection;
use crate::error::{ErrorKind, WireError};
use crate::pool::base::{ConnectionFactory, PoolEvent, PoolListeners};
use crate::wire_error;

/// Glue between a [`ConnectionFactory`] and deadpool.
///
/// Only idle connections are handed out again. A connection left executing or broken is
/// discarded when the pool next tries to reuse it.
pub struct ConnectionManager<F: ConnectionFactory> {
    factory: Arc<F>,
    parameters: F::Parameters,
    next_id: AtomicU64,
    listeners: PoolListeners,
}

impl<F: ConnectionFactory> ConnectionManager<F> {
    pub(crate) fn new(factory: Arc<F>, parameters: F::Parameters, listeners: PoolListeners) -> Self {
        Self {
            factory,
            parameters,
            next_id: AtomicU64::new(0),
            listeners,
        }
    }
}

impl<F: ConnectionFactory> Manager for ConnectionManager<F> {
    type Type = Connection<F::Codec>;
    type Error = WireError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let connection = self.factory.connect(id, &self.parameters).await?;

        info!(connection_id = id, "pooled connection created");
        self.listeners.emit(PoolEvent::Created { connection_id: id });

        Ok(connection)
    }

    async fn recycle(
        &self,
        connection: &mut Self::Type,
        _: &Metrics,
    ) -> RecycleResult<Self::Error> {
        if connection.is_idle() {
            debug!(connection_id = connection.id(), "pooled connection reused");
            return Ok(());
        }

        let state = connection.state();
        warn!(connection_id = connection.id(), ?state, "discarding pooled connection");

        Err(RecycleError::Backend(wire_error!(
            ErrorKind::InvalidState,
            "Pooled connection is not idle",
            format!("{state:?}")
        )))
    }

    fn detach(&self, connection: &mut Self::Type) {
        debug!(connection_id = connection.id(), "connection left the pool");
        self.listeners.emit(PoolEvent::Closed {
            connection_id: connection.id(),
        });
    }
}
