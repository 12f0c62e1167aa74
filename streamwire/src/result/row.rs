use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::codec::WireCodec;
use crate::concurrency::cancel::{CancelRx, run_cancellable};
use crate::connection::base::ConnectionShared;
use crate::error::{ErrorKind, WireResult};
use crate::result::cell::{
    BytesClaim, CellState, CellStateSnapshot, CellStatus, ClaimGuard, Completion, DrainStep,
    ValueCell, ValueClaim,
};
use crate::stream::reservation::{StreamGate, StreamReservation};
use crate::types::{ColumnMetadata, ColumnSet, ResultHeader};
use crate::{bail, wire_error};

/// Outcome of [`Cell::try_read_bytes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRead {
    /// Number of bytes copied into the buffer. `0` once the value is exhausted.
    Read(usize),
    /// The value path owns the cell.
    ClaimedByValue,
    /// Another byte read on this cell is in flight.
    Busy,
}

/// One result produced by a statement: an ordered set of lazily read cells.
///
/// A row is borrowed from its [`crate::connection::enumeration::StatementEnumerator`] and cannot
/// outlive the next advance.
pub struct ResultRow<C: WireCodec> {
    ordinal: u64,
    columns: Arc<ColumnSet>,
    cells: Vec<ValueCell<C::Value>>,
    codec: Arc<C>,
    gate: StreamGate<C::Stream>,
    shared: Arc<ConnectionShared>,
}

impl<C: WireCodec> ResultRow<C> {
    pub(crate) fn new(
        ordinal: u64,
        header: ResultHeader,
        codec: Arc<C>,
        gate: StreamGate<C::Stream>,
        shared: Arc<ConnectionShared>,
    ) -> Self {
        let columns = header.columns().clone();
        let cells = (0..columns.len()).map(ValueCell::new).collect();

        Self {
            ordinal,
            columns,
            cells,
            codec,
            gate,
            shared,
        }
    }

    /// Zero-based position of this row in its enumeration.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    pub fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, index: usize) -> WireResult<Cell<'_, C>> {
        if index >= self.cells.len() {
            bail!(
                ErrorKind::ColumnOutOfRange,
                "Column index is out of range",
                format!("index {index}, row has {} columns", self.cells.len())
            );
        }

        Ok(Cell { row: self, index })
    }

    pub fn cell_by_label(&self, label: &str) -> WireResult<Cell<'_, C>> {
        match self.columns.index_of(label) {
            Some(index) => self.cell(index),
            None => bail!(
                ErrorKind::ColumnOutOfRange,
                "No column has the requested label",
                label
            ),
        }
    }

    /// Reads every cell as a whole value, in column order.
    pub async fn materialize(&self, cancel: &CancelRx) -> WireResult<Vec<C::Value>> {
        let mut values = Vec::with_capacity(self.cells.len());
        for index in 0..self.cells.len() {
            match self.cell(index)?.try_get_value(cancel).await? {
                Some(value) => values.push(value),
                None => bail!(
                    ErrorKind::InvalidState,
                    "Column is being read by another caller",
                    format!("column {index}")
                ),
            }
        }

        Ok(values)
    }

    /// Consumes every cell not yet consumed so the stream is positioned after this row.
    pub(crate) async fn drain(&self, rsv: &mut StreamReservation<C::Stream>) -> WireResult<()> {
        self.drain_before(self.cells.len(), rsv).await
    }

    /// Consumes cells `0..end` in ascending order.
    ///
    /// Unclaimed and partially read cells are skipped. Cells claimed for a whole-value read by a
    /// caller still waiting for the reservation are decoded on that caller's behalf.
    async fn drain_before(
        &self,
        end: usize,
        rsv: &mut StreamReservation<C::Stream>,
    ) -> WireResult<()> {
        for cell in &self.cells[..end] {
            let column = self.column(cell.index())?;
            match cell.claim_for_drain() {
                DrainStep::Done => {}
                DrainStep::Fail(err) => return Err(err),
                DrainStep::Skip { consumed, total } => {
                    let guard = ClaimGuard::faulting(cell, &self.shared);
                    let result: WireResult<u64> = async {
                        let total = match total {
                            Some(total) => total,
                            None => self.codec.read_value_length(rsv, column).await?.byte_len(),
                        };
                        self.codec
                            .skip_raw(rsv, total.saturating_sub(consumed))
                            .await?;

                        Ok(total)
                    }
                    .await;

                    match result {
                        Ok(total) => {
                            trace!(column = cell.index(), bytes = total, "cell skipped");
                            guard.settle(CellState::Complete(Completion::Drained { bytes: total }));
                        }
                        Err(err) => {
                            guard.settle(CellState::Faulted(err.clone()));
                            return Err(err);
                        }
                    }
                }
                DrainStep::Decode => {
                    let guard = ClaimGuard::faulting(cell, &self.shared);
                    match self.read_value(rsv, column).await {
                        Ok(value) => {
                            trace!(column = cell.index(), "cell decoded for waiting reader");
                            guard.settle(CellState::Complete(Completion::Value(value)));
                        }
                        Err(err) => {
                            guard.settle(CellState::Faulted(err.clone()));
                            return Err(err);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn read_value(
        &self,
        rsv: &mut StreamReservation<C::Stream>,
        column: &ColumnMetadata,
    ) -> WireResult<C::Value> {
        let length = self.codec.read_value_length(rsv, column).await?;
        self.codec.decode_value(rsv, column, length).await
    }

    fn column(&self, index: usize) -> WireResult<&ColumnMetadata> {
        self.columns.get(index).ok_or_else(|| {
            wire_error!(
                ErrorKind::ColumnOutOfRange,
                "Column metadata is missing",
                format!("index {index}")
            )
        })
    }
}

impl<C: WireCodec> fmt::Debug for ResultRow<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultRow")
            .field("ordinal", &self.ordinal)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Handle to one cell of a [`ResultRow`].
pub struct Cell<'r, C: WireCodec> {
    row: &'r ResultRow<C>,
    index: usize,
}

impl<C: WireCodec> fmt::Debug for Cell<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("index", &self.index)
            .field("status", &self.status())
            .finish()
    }
}

impl<'r, C: WireCodec> Cell<'r, C> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn metadata(&self) -> &'r ColumnMetadata {
        &self.row.columns.as_slice()[self.index]
    }

    pub fn status(&self) -> CellStatus {
        self.row.cells[self.index].status()
    }

    /// Reads the cell as a whole value.
    ///
    /// Returns the cached value once materialized, and `Ok(None)` while another read is in
    /// flight or after the cell faulted. Fails with [`ErrorKind::ValueAlreadyConsumed`] when the
    /// cell was drained through the byte path or skipped. When an earlier column fails, its error
    /// is returned and this cell stays unread.
    pub async fn try_get_value(&self, cancel: &CancelRx) -> WireResult<Option<C::Value>> {
        let row = self.row;
        let cell = &row.cells[self.index];
        let column = self.metadata();

        match cell.claim_value() {
            ValueClaim::Claimed => {}
            ValueClaim::Cached(value) => return Ok(Some(value)),
            ValueClaim::Pending => return Ok(None),
            ValueClaim::Consumed => bail!(
                ErrorKind::ValueAlreadyConsumed,
                "Value was already consumed as raw bytes"
            ),
        }

        // Declared before the guard so the stream is released after the cell settles.
        let mut rsv;
        let mut guard = ClaimGuard::restoring(cell, &row.shared, CellStateSnapshot::Initial);
        rsv = row.gate.reserve(cancel).await?;

        // A drain may have decoded the value while this call waited for the stream.
        match cell.snapshot() {
            CellState::ReadingWholeValue => {}
            CellState::Complete(Completion::Value(value)) => {
                guard.disarm();
                return Ok(Some(value));
            }
            CellState::Faulted(err) => {
                guard.disarm();
                return Err(err);
            }
            _ => {
                guard.disarm();
                bail!(ErrorKind::InvalidState, "Value claim was lost");
            }
        }

        if let Err(err) = row.shared.ensure_usable() {
            guard.settle(CellState::Faulted(err.clone()));
            return Err(err);
        }

        guard.io_started();
        let drained = run_cancellable(cancel, row.drain_before(self.index, &mut rsv)).await;
        row.shared.observe(&drained);
        if let Err(err) = drained {
            // The payload of this cell is still on the stream.
            guard.settle(CellState::Initial);
            return Err(err);
        }

        let result = run_cancellable(cancel, row.read_value(&mut rsv, column)).await;
        row.shared.observe(&result);

        match result {
            Ok(value) => {
                trace!(column = self.index, "cell materialized");
                guard.settle(CellState::Complete(Completion::Value(value.clone())));
                Ok(Some(value))
            }
            Err(err) => {
                guard.settle(CellState::Faulted(err.clone()));
                Err(err)
            }
        }
    }

    /// Copies the next raw bytes of the value into `buf`.
    ///
    /// Reads at most `buf.len()` bytes. Earlier cells are drained on the first call. Once the
    /// value is exhausted every further call returns `ByteRead::Read(0)` without I/O.
    ///
    /// Fails with [`ErrorKind::ValueAlreadyConsumed`] if another reader's drain skipped the value
    /// while this call waited for the stream.
    pub async fn try_read_bytes(&self, buf: &mut [u8], cancel: &CancelRx) -> WireResult<ByteRead> {
        let row = self.row;
        let cell = &row.cells[self.index];
        let column = self.metadata();

        let (previous, first) = match cell.claim_bytes() {
            BytesClaim::Claimed { previous, first } => (previous, first),
            BytesClaim::Drained => return Ok(ByteRead::Read(0)),
            BytesClaim::ClaimedByValue => return Ok(ByteRead::ClaimedByValue),
            BytesClaim::Busy => return Ok(ByteRead::Busy),
            BytesClaim::Faulted(err) => return Err(err),
        };

        let mut rsv;
        let mut guard = ClaimGuard::restoring(cell, &row.shared, previous);
        rsv = row.gate.reserve(cancel).await?;

        // A drain may have skipped the rest of the value while this call waited for the stream.
        let (consumed, total) = match cell.snapshot() {
            CellState::ReadingBytes { consumed, total } => (consumed, total),
            CellState::Complete(Completion::Drained { .. }) => {
                guard.disarm();
                bail!(
                    ErrorKind::ValueAlreadyConsumed,
                    "Value was skipped while waiting for the stream"
                );
            }
            CellState::Faulted(err) => {
                guard.disarm();
                return Err(err);
            }
            _ => {
                guard.disarm();
                bail!(ErrorKind::InvalidState, "Byte claim was lost");
            }
        };

        if let Err(err) = row.shared.ensure_usable() {
            guard.settle(CellState::Faulted(err.clone()));
            return Err(err);
        }

        guard.io_started();
        if first {
            let drained = run_cancellable(cancel, row.drain_before(self.index, &mut rsv)).await;
            row.shared.observe(&drained);
            if let Err(err) = drained {
                guard.settle(previous.restore());
                return Err(err);
            }
        }

        let result = run_cancellable(cancel, async {
            let total = match total {
                Some(total) => total,
                None => row.codec.read_value_length(&mut rsv, column).await?.byte_len(),
            };
            let remaining = total.saturating_sub(consumed);
            let wanted = remaining.min(buf.len() as u64) as usize;
            let read = if wanted == 0 {
                0
            } else {
                row.codec.read_raw(&mut rsv, &mut buf[..wanted]).await?
            };

            Ok((read, total))
        })
        .await;
        row.shared.observe(&result);

        match result {
            Ok((read, total)) => {
                let consumed = consumed + read as u64;
                let next = if consumed >= total {
                    CellState::Complete(Completion::Drained { bytes: total })
                } else {
                    CellState::ReadingBytesMoreLeft { consumed, total }
                };
                trace!(column = self.index, read, consumed, total, "cell bytes read");
                guard.settle(next);

                Ok(ByteRead::Read(read))
            }
            Err(err) => {
                guard.settle(CellState::Faulted(err.clone()));
                Err(err)
            }
        }
    }
}
