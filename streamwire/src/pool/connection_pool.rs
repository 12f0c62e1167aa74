use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use deadpool::Runtime;
use deadpool::managed::{Object, Pool};
use streamwire_config::shared::PoolConfig;
use tracing::{info, warn};

use crate::connection::base::Connection;
use crate::error::{ErrorKind, WireResult};
use crate::pool::base::{
    ConnectionFactory, IdleCleanupPolicy, PoolEvent, PoolListener, PoolListeners,
};
use crate::pool::manager::ConnectionManager;
use crate::wire_error;

/// Pool of connections opened by one [`ConnectionFactory`].
///
/// Idle connections are never cleaned up on a timer; call
/// [`ConnectionPool::cleanup_idle`] to close the ones unused for too long.
pub struct ConnectionPool<F: ConnectionFactory> {
    pool: Pool<ConnectionManager<F>>,
    factory: Arc<F>,
    listeners: PoolListeners,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            factory: self.factory.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Builds a pool. No connection is opened until the first acquire.
    ///
    /// Fails with [`ErrorKind::InvalidArgument`] when the factory rejects `parameters`.
    pub fn new(
        factory: F,
        parameters: F::Parameters,
        config: &PoolConfig,
        listeners: Vec<Arc<dyn PoolListener>>,
    ) -> WireResult<Self> {
        config.validate().map_err(|err| {
            wire_error!(ErrorKind::ConfigError, "Invalid pool configuration", err)
        })?;
        factory.validate(&parameters).map_err(|err| {
            wire_error!(
                ErrorKind::InvalidArgument,
                "Invalid connection parameters",
                err
            )
        })?;

        let factory = Arc::new(factory);
        let listeners = PoolListeners::new(listeners);
        let manager = ConnectionManager::new(factory.clone(), parameters, listeners.clone());
        let pool = Pool::builder(manager)
            .max_size(config.max_size)
            .wait_timeout(config.wait_timeout())
            .create_timeout(config.create_timeout())
            .runtime(Runtime::Tokio1)
            .build()?;

        info!(max_size = config.max_size, "connection pool created");

        Ok(Self {
            pool,
            factory,
            listeners,
        })
    }

    /// Takes a connection from the pool; it is returned when the guard is dropped.
    pub async fn acquire(&self) -> WireResult<PooledConnection<F>> {
        let object = self.pool.get().await?;
        self.listeners.emit(PoolEvent::Acquired {
            connection_id: object.id(),
        });

        Ok(PooledConnection {
            object,
            listeners: self.listeners.clone(),
        })
    }

    /// Runs `f` with a pooled connection and returns the connection afterwards.
    pub async fn run<T, Func, Fut>(&self, f: Func) -> WireResult<T>
    where
        Func: FnOnce(PooledConnection<F>) -> Fut,
        Fut: Future<Output = WireResult<T>>,
    {
        let connection = self.acquire().await?;
        f(connection).await
    }

    /// Takes a connection out of the pool for good. The caller is responsible for closing it.
    pub async fn acquire_unmanaged(&self) -> WireResult<Connection<F::Codec>> {
        let object = self.pool.get().await?;
        self.listeners.emit(PoolEvent::Acquired {
            connection_id: object.id(),
        });

        Ok(Object::take(object))
    }

    /// Closes idle connections unused for at least `policy.max_idle`, and idle-slot connections
    /// that are no longer reusable. Returns how many were removed.
    pub async fn cleanup_idle(&self, policy: IdleCleanupPolicy) -> usize {
        let result = self.pool.retain(|connection, metrics| {
            connection.is_idle() && metrics.last_used() < policy.max_idle
        });

        let removed = result.removed.len();
        self.close_all(result.removed).await;
        info!(removed, retained = result.retained, "idle connections cleaned up");

        removed
    }

    /// Closes every idle connection and the pool itself. Connections still in use are dropped
    /// when they are returned.
    pub async fn close(&self) {
        let idle = self.pool.retain(|_, _| false).removed;
        self.close_all(idle).await;
        self.pool.close();

        info!("connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    pub fn status(&self) -> deadpool::Status {
        self.pool.status()
    }

    async fn close_all(&self, connections: Vec<Connection<F::Codec>>) {
        for connection in connections {
            let connection_id = connection.id();
            if let Err(err) = self.factory.close(connection).await {
                warn!(connection_id, error = %err, "failed to close pooled connection");
            }
        }
    }
}

/// A connection borrowed from a [`ConnectionPool`].
pub struct PooledConnection<F: ConnectionFactory> {
    object: Object<ConnectionManager<F>>,
    listeners: PoolListeners,
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = Connection<F::Codec>;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        self.listeners.emit(PoolEvent::Returned {
            connection_id: self.object.id(),
        });
    }
}
