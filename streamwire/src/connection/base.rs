use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::bail;
use crate::codec::WireCodec;
use crate::concurrency::cancel::{CancelRx, run_cancellable};
use crate::connection::enumeration::StatementEnumerator;
use crate::error::{ErrorKind, WireError, WireResult};
use crate::stream::reservation::{ReservationStats, StreamGate};
use crate::types::Statement;
use crate::wire_error;

/// Execution state of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Ready for a new statement.
    Idle,
    /// A statement was started and its results are not fully drained.
    Executing,
    /// A stream-fatal error left the stream at an unknown position.
    Broken(WireError),
    Closed,
}

/// State shared between a connection, its enumerators and the rows they hand out.
#[derive(Debug)]
pub(crate) struct ConnectionShared {
    id: u64,
    state: Mutex<ConnectionState>,
}

impl ConnectionShared {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(ConnectionState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.lock().clone()
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(*self.lock(), ConnectionState::Idle)
    }

    #[cfg(test)]
    pub(crate) fn is_broken(&self) -> bool {
        matches!(*self.lock(), ConnectionState::Broken(_))
    }

    /// Fails unless the stream can still be used.
    pub(crate) fn ensure_usable(&self) -> WireResult<()> {
        match &*self.lock() {
            ConnectionState::Idle | ConnectionState::Executing => Ok(()),
            ConnectionState::Broken(err) => {
                bail!(ErrorKind::InvalidState, "Connection is broken", err)
            }
            ConnectionState::Closed => bail!(ErrorKind::InvalidState, "Connection is closed"),
        }
    }

    /// Moves an idle connection to [`ConnectionState::Executing`].
    pub(crate) fn begin_statement(&self) -> WireResult<()> {
        let mut state = self.lock();
        match &*state {
            ConnectionState::Idle => {
                *state = ConnectionState::Executing;
                debug!(connection_id = self.id, "statement started");
                Ok(())
            }
            ConnectionState::Executing => bail!(
                ErrorKind::StatementInProgress,
                "Another statement is still being enumerated on this connection"
            ),
            ConnectionState::Broken(err) => {
                bail!(ErrorKind::InvalidState, "Connection is broken", err)
            }
            ConnectionState::Closed => bail!(ErrorKind::InvalidState, "Connection is closed"),
        }
    }

    /// Returns an executing connection to [`ConnectionState::Idle`].
    pub(crate) fn finish_statement(&self) {
        let mut state = self.lock();
        if matches!(*state, ConnectionState::Executing) {
            *state = ConnectionState::Idle;
            debug!(connection_id = self.id, "statement finished");
        }
    }

    /// Marks the connection as broken. The first error is kept.
    pub(crate) fn mark_broken(&self, err: &WireError) {
        let mut state = self.lock();
        if matches!(*state, ConnectionState::Idle | ConnectionState::Executing) {
            warn!(connection_id = self.id, error = %err, "connection broken");
            *state = ConnectionState::Broken(err.clone());
        }
    }

    pub(crate) fn mark_closed(&self) {
        *self.lock() = ConnectionState::Closed;
    }

    /// Records the outcome of a stream operation.
    pub(crate) fn observe<T>(&self, result: &WireResult<T>) {
        if let Err(err) = result
            && err.is_stream_fatal()
        {
            self.mark_broken(err);
        }
    }
}

/// One physical stream driven by one codec.
///
/// A connection runs at most one statement at a time. Statements are prepared with
/// [`Connection::prepare`] and their results are pulled lazily through the returned
/// [`StatementEnumerator`].
pub struct Connection<C: WireCodec> {
    pub(crate) codec: Arc<C>,
    pub(crate) gate: StreamGate<C::Stream>,
    pub(crate) shared: Arc<ConnectionShared>,
}

impl<C: WireCodec> Connection<C> {
    /// Wraps an already established stream without running the codec's startup hook.
    pub fn new(id: u64, codec: Arc<C>, stream: C::Stream) -> Self {
        Self {
            codec,
            gate: StreamGate::new(stream),
            shared: Arc::new(ConnectionShared::new(id)),
        }
    }

    /// Wraps `stream` and runs the codec's startup hook on it.
    pub async fn open(
        id: u64,
        codec: Arc<C>,
        stream: C::Stream,
        cancel: &CancelRx,
    ) -> WireResult<Self> {
        let connection = Self::new(id, codec, stream);
        {
            let mut rsv = connection.gate.reserve(cancel).await?;
            run_cancellable(cancel, connection.codec.startup(&mut rsv))
                .await
                .map_err(|err| {
                    wire_error!(ErrorKind::ConnectionFailed, "Connection startup failed", err)
                })?;
        }
        info!(connection_id = id, "connection opened");

        Ok(connection)
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }

    pub fn vendor(&self) -> &C::Vendor {
        self.codec.vendor()
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn reservation_stats(&self) -> ReservationStats {
        self.gate.stats()
    }

    /// Returns `true` while an operation holds the stream.
    pub fn is_reserved(&self) -> bool {
        self.gate.is_reserved()
    }

    /// Returns an unstarted enumerator over the results of `statement`. No I/O happens until
    /// the first advance.
    pub fn prepare(&self, statement: Statement) -> StatementEnumerator<'_, C> {
        StatementEnumerator::new(self, statement)
    }

    /// Runs `statement` to completion and returns the number of results it produced.
    pub async fn execute(&self, statement: Statement, cancel: &CancelRx) -> WireResult<u64> {
        self.prepare(statement).drain(cancel).await
    }

    /// Runs the codec's terminate hook and shuts the stream down.
    ///
    /// The hook is skipped for broken connections. Closing twice is a no-op.
    pub async fn close(&self, cancel: &CancelRx) -> WireResult<()> {
        let state = self.shared.state();
        if state == ConnectionState::Closed {
            return Ok(());
        }

        let mut rsv = self.gate.reserve(cancel).await?;
        if !matches!(state, ConnectionState::Broken(_))
            && let Err(err) = run_cancellable(cancel, self.codec.terminate(&mut rsv)).await
        {
            warn!(connection_id = self.id(), error = %err, "terminate hook failed");
        }

        let shutdown = rsv.stream().shutdown().await;
        self.shared.mark_closed();
        info!(connection_id = self.id(), "connection closed");

        shutdown?;

        Ok(())
    }
}

impl<C: WireCodec> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .field("reservations", &self.gate.stats())
            .finish()
    }
}
