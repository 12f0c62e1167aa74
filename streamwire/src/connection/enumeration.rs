use std::fmt;
use std::sync::Arc;

use futures::Stream;
use tracing::{debug, warn};

use crate::codec::{Continuation, WireCodec};
use crate::concurrency::cancel::{CancelRx, run_cancellable};
use crate::connection::base::{Connection, ConnectionShared};
use crate::connection::dispatch::dispatch;
use crate::connection::listener::{EnumerationEvent, EnumerationListener};
use crate::error::{ErrorKind, WireError, WireResult};
use crate::result::row::ResultRow;
use crate::types::{ResultHeader, Statement};
use crate::wire_error;

enum Phase<C: WireCodec> {
    Unstarted,
    Running {
        continuation: Option<C::Continuation>,
        current: Option<ResultRow<C>>,
    },
    Finished,
}

/// Settles the connection state when an advance is dropped halfway.
///
/// Before the stream is touched, a starting statement gives the connection back. Once the
/// stream may have been used the connection is marked broken.
struct ExecutionGuard<'a> {
    shared: &'a ConnectionShared,
    release_on_abandon: bool,
    streaming: bool,
    armed: bool,
}

impl<'a> ExecutionGuard<'a> {
    fn new(shared: &'a ConnectionShared, release_on_abandon: bool) -> Self {
        Self {
            shared,
            release_on_abandon,
            streaming: false,
            armed: true,
        }
    }

    fn streaming(&mut self) {
        self.streaming = true;
    }

    /// Disarms the guard and reports whether the stream was touched.
    fn disarm(mut self) -> bool {
        self.armed = false;
        self.streaming
    }
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        if self.streaming {
            self.shared.mark_broken(&wire_error!(
                ErrorKind::OperationCanceled,
                "Statement was abandoned while using the stream"
            ));
        } else if self.release_on_abandon {
            self.shared.finish_statement();
        }
    }
}

fn emit(listeners: &[Arc<dyn EnumerationListener>], event: EnumerationEvent) {
    for listener in listeners {
        listener.on_event(&event);
    }
}

/// Lazy sequence of the results of one statement.
///
/// The statement is sent on the first [`StatementEnumerator::move_next`]. Each further advance
/// skips whatever the caller left unread in the current row before reading the next one.
pub struct StatementEnumerator<'c, C: WireCodec> {
    connection: &'c Connection<C>,
    statement: Statement,
    listeners: Vec<Arc<dyn EnumerationListener>>,
    phase: Phase<C>,
    items: u64,
}

impl<'c, C: WireCodec> StatementEnumerator<'c, C> {
    pub(crate) fn new(connection: &'c Connection<C>, statement: Statement) -> Self {
        Self {
            connection,
            statement,
            listeners: Vec::new(),
            phase: Phase::Unstarted,
            items: 0,
        }
    }

    pub fn with_listener(mut self, listener: impl EnumerationListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn with_listeners(
        mut self,
        listeners: impl IntoIterator<Item = Arc<dyn EnumerationListener>>,
    ) -> Self {
        self.listeners.extend(listeners);
        self
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    pub fn is_started(&self) -> bool {
        !matches!(self.phase, Phase::Unstarted)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// Number of results produced so far.
    pub fn items(&self) -> u64 {
        self.items
    }

    /// The current result, if the last advance produced one.
    pub fn current(&self) -> Option<&ResultRow<C>> {
        match &self.phase {
            Phase::Running { current, .. } => current.as_ref(),
            _ => None,
        }
    }

    /// Advances to the next result.
    ///
    /// The first call sends the statement; if that fails no result is ever exposed. An error
    /// raised while pulling a later result is returned once after the rest of the statement
    /// was skipped on a best-effort basis; further calls return `Ok(false)`.
    pub async fn move_next(&mut self, cancel: &CancelRx) -> WireResult<bool> {
        match self.phase {
            Phase::Unstarted => self.start(cancel).await,
            Phase::Running { .. } => self.advance(cancel).await,
            Phase::Finished => Ok(false),
        }
    }

    /// Runs the remaining advances, notifying listeners, and returns how many results they
    /// produced.
    pub async fn drain(&mut self, cancel: &CancelRx) -> WireResult<u64> {
        let mut advanced = 0;
        while self.move_next(cancel).await? {
            advanced += 1;
        }

        Ok(advanced)
    }

    /// Skips the rest of a started execution without notifying listeners and rewinds the
    /// enumerator, so that the next advance sends the statement again.
    pub async fn reset(&mut self, cancel: &CancelRx) -> WireResult<()> {
        let drained = if matches!(self.phase, Phase::Running { .. }) {
            let drained = match self.drain_silently(cancel).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    self.recover(&err, cancel).await;
                    Err(err)
                }
            };
            self.phase = Phase::Finished;
            self.connection.shared.finish_statement();
            drained
        } else {
            Ok(())
        };

        self.phase = Phase::Unstarted;
        self.items = 0;

        drained
    }

    /// Turns the enumerator into a stream of fully materialized rows.
    pub fn into_value_stream(
        self,
        cancel: CancelRx,
    ) -> impl Stream<Item = WireResult<Vec<C::Value>>> + 'c {
        futures::stream::unfold(Some((self, cancel)), |state| async move {
            let (mut enumerator, cancel) = state?;
            match enumerator.move_next(&cancel).await {
                Ok(true) => {
                    let values = match enumerator.current() {
                        Some(row) => row.materialize(&cancel).await,
                        None => Err(wire_error!(
                            ErrorKind::InvalidState,
                            "Advance reported a result but none is current"
                        )),
                    };
                    Some((values, Some((enumerator, cancel))))
                }
                Ok(false) => None,
                Err(err) => Some((Err(err), None)),
            }
        })
    }

    async fn start(&mut self, cancel: &CancelRx) -> WireResult<bool> {
        let connection = self.connection;
        connection.shared.begin_statement()?;
        self.items = 0;
        emit(&self.listeners, EnumerationEvent::BeforeStart);

        let mut guard = ExecutionGuard::new(&connection.shared, true);
        let result = async {
            let mut rsv = connection.gate.reserve(cancel).await?;
            guard.streaming();
            run_cancellable(
                cancel,
                dispatch(&*connection.codec, &mut rsv, &self.statement),
            )
            .await
        }
        .await;
        let streamed = guard.disarm();

        let execution = match result {
            Ok(execution) => execution,
            Err(err) => {
                debug!(error = %err, "statement failed before its first result");
                if streamed && err.is_stream_fatal() {
                    connection.shared.mark_broken(&err);
                } else {
                    connection.shared.finish_statement();
                }
                self.phase = Phase::Finished;

                return Err(err);
            }
        };

        emit(&self.listeners, EnumerationEvent::AfterStart);
        match execution.first {
            Some(header) => {
                self.phase = Phase::Running {
                    continuation: execution.continuation,
                    current: None,
                };
                self.produce(header);

                Ok(true)
            }
            None => {
                self.complete();

                Ok(false)
            }
        }
    }

    async fn advance(&mut self, cancel: &CancelRx) -> WireResult<bool> {
        match self.pull(cancel).await {
            Ok(Some(header)) => {
                self.produce(header);
                Ok(true)
            }
            Ok(None) => {
                self.complete();
                Ok(false)
            }
            Err(err) => {
                warn!(error = %err, items = self.items, "enumeration failed");
                self.recover(&err, cancel).await;
                self.complete();

                Err(err)
            }
        }
    }

    /// Skips the current row and reads the header of the next result.
    async fn pull(&mut self, cancel: &CancelRx) -> WireResult<Option<ResultHeader>> {
        let connection = self.connection;
        let Phase::Running {
            continuation,
            current,
        } = &mut self.phase
        else {
            return Ok(None);
        };

        let mut guard = ExecutionGuard::new(&connection.shared, false);
        let result = async {
            let mut rsv = connection.gate.reserve(cancel).await?;
            connection.shared.ensure_usable()?;
            guard.streaming();
            run_cancellable(cancel, async {
                if let Some(row) = current.as_ref() {
                    row.drain(&mut rsv).await?;
                }

                match continuation.as_mut() {
                    Some(continuation) => {
                        continuation
                            .next_result(&*connection.codec, &mut rsv)
                            .await
                    }
                    None => Ok(None),
                }
            })
            .await
        }
        .await;
        guard.disarm();
        connection.shared.observe(&result);

        if !matches!(result, Ok(Some(_))) {
            *current = None;
        }

        result
    }

    /// Skips the remaining results without producing items.
    async fn drain_silently(&mut self, cancel: &CancelRx) -> WireResult<()> {
        while let Some(header) = self.pull(cancel).await? {
            self.replace_current(header);
        }

        Ok(())
    }

    /// Brings the stream to the end of the statement after `err` escaped, or marks the
    /// connection broken when that is impossible.
    async fn recover(&mut self, err: &WireError, cancel: &CancelRx) {
        let connection = self.connection;
        let shared = &connection.shared;
        if err.is_stream_fatal() {
            shared.mark_broken(err);
            return;
        }

        if let Err(drain_err) = self.drain_silently(cancel).await {
            warn!(error = %drain_err, "best-effort drain failed");
            shared.mark_broken(&drain_err);
        }
    }

    fn replace_current(&mut self, header: ResultHeader) {
        let connection = self.connection;
        if let Phase::Running { current, .. } = &mut self.phase {
            *current = Some(ResultRow::new(
                self.items,
                header,
                connection.codec.clone(),
                connection.gate.clone(),
                connection.shared.clone(),
            ));
        }
    }

    fn produce(&mut self, header: ResultHeader) {
        let columns = header.columns().len();
        self.replace_current(header);

        let index = self.items;
        self.items += 1;
        emit(&self.listeners, EnumerationEvent::Item { index, columns });
    }

    fn complete(&mut self) {
        self.phase = Phase::Finished;
        emit(&self.listeners, EnumerationEvent::BeforeEnd);
        self.connection.shared.finish_statement();
        debug!(items = self.items, "enumeration finished");
        emit(
            &self.listeners,
            EnumerationEvent::AfterEnd { items: self.items },
        );
    }
}

impl<C: WireCodec> fmt::Debug for StatementEnumerator<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self.phase {
            Phase::Unstarted => "unstarted",
            Phase::Running { .. } => "running",
            Phase::Finished => "finished",
        };

        f.debug_struct("StatementEnumerator")
            .field("connection_id", &self.connection.id())
            .field("statement", &self.statement)
            .field("phase", &phase)
            .field("items", &self.items)
            .finish()
    }
}
