use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::connection::base::ConnectionShared;
use crate::error::{ErrorKind, WireError};
use crate::wire_error;

/// Read state of one value on the stream.
#[derive(Debug, Clone)]
pub(crate) enum CellState<V> {
    Initial,
    /// Claimed by a whole-value read.
    ReadingWholeValue,
    /// Claimed by a byte read or a skip. `total` is known once the length was read.
    ReadingBytes { consumed: u64, total: Option<u64> },
    /// Partially read as bytes, no read in flight.
    ReadingBytesMoreLeft { consumed: u64, total: u64 },
    Complete(Completion<V>),
    Faulted(WireError),
}

#[derive(Debug, Clone)]
pub(crate) enum Completion<V> {
    /// Materialized through the whole-value path.
    Value(V),
    /// Exhausted through the byte path or skipped.
    Drained { bytes: u64 },
}

/// Observable phase of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Initial,
    ReadingValue,
    ReadingBytes,
    BytesRemaining,
    Materialized,
    Drained,
    Faulted,
}

/// Outcome of trying to claim a cell for a whole-value read.
pub(crate) enum ValueClaim<V> {
    Claimed,
    Cached(V),
    /// Another read is in flight or the cell faulted.
    Pending,
    /// The cell was drained through the byte path.
    Consumed,
}

/// Outcome of trying to claim a cell for a byte read.
pub(crate) enum BytesClaim {
    Claimed {
        previous: CellStateSnapshot,
        first: bool,
    },
    Drained,
    ClaimedByValue,
    Busy,
    Faulted(WireError),
}

/// The part of a state that a byte claim restores when abandoned before any I/O.
#[derive(Debug, Clone, Copy)]
pub(crate) enum CellStateSnapshot {
    Initial,
    MoreLeft { consumed: u64, total: u64 },
}

/// What a drain must do with a cell that precedes the one being read.
pub(crate) enum DrainStep {
    /// Already consumed.
    Done,
    /// Discard the rest of the value.
    Skip { consumed: u64, total: Option<u64> },
    /// Another caller claimed the value; decode it on its behalf.
    Decode,
    Fail(WireError),
}

/// One column of a result, backed by a segment of the stream.
#[derive(Debug)]
pub(crate) struct ValueCell<V> {
    index: usize,
    state: Mutex<CellState<V>>,
}

impl<V: Clone> ValueCell<V> {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            state: Mutex::new(CellState::Initial),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    fn lock(&self) -> MutexGuard<'_, CellState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn snapshot(&self) -> CellState<V> {
        self.lock().clone()
    }

    pub(crate) fn status(&self) -> CellStatus {
        match &*self.lock() {
            CellState::Initial => CellStatus::Initial,
            CellState::ReadingWholeValue => CellStatus::ReadingValue,
            CellState::ReadingBytes { .. } => CellStatus::ReadingBytes,
            CellState::ReadingBytesMoreLeft { .. } => CellStatus::BytesRemaining,
            CellState::Complete(Completion::Value(_)) => CellStatus::Materialized,
            CellState::Complete(Completion::Drained { .. }) => CellStatus::Drained,
            CellState::Faulted(_) => CellStatus::Faulted,
        }
    }

    pub(crate) fn set(&self, next: CellState<V>) {
        let mut state = self.lock();
        trace!(
            column = self.index,
            from = state.name(),
            to = next.name(),
            "cell transition"
        );
        *state = next;
    }

    pub(crate) fn claim_value(&self) -> ValueClaim<V> {
        let mut state = self.lock();
        match &*state {
            CellState::Initial => {
                *state = CellState::ReadingWholeValue;
                trace!(column = self.index, "cell claimed for value");
                ValueClaim::Claimed
            }
            CellState::Complete(Completion::Value(value)) => ValueClaim::Cached(value.clone()),
            CellState::Complete(Completion::Drained { .. }) => ValueClaim::Consumed,
            CellState::ReadingWholeValue
            | CellState::ReadingBytes { .. }
            | CellState::ReadingBytesMoreLeft { .. }
            | CellState::Faulted(_) => ValueClaim::Pending,
        }
    }

    pub(crate) fn claim_bytes(&self) -> BytesClaim {
        let mut state = self.lock();
        let (previous, first) = match &*state {
            CellState::Initial => (CellStateSnapshot::Initial, true),
            CellState::ReadingBytesMoreLeft { consumed, total } => (
                CellStateSnapshot::MoreLeft {
                    consumed: *consumed,
                    total: *total,
                },
                false,
            ),
            CellState::ReadingBytes { .. } => return BytesClaim::Busy,
            CellState::ReadingWholeValue | CellState::Complete(Completion::Value(_)) => {
                return BytesClaim::ClaimedByValue;
            }
            CellState::Complete(Completion::Drained { .. }) => return BytesClaim::Drained,
            CellState::Faulted(err) => return BytesClaim::Faulted(err.clone()),
        };

        *state = match previous {
            CellStateSnapshot::Initial => CellState::ReadingBytes {
                consumed: 0,
                total: None,
            },
            CellStateSnapshot::MoreLeft { consumed, total } => CellState::ReadingBytes {
                consumed,
                total: Some(total),
            },
        };
        trace!(column = self.index, first, "cell claimed for bytes");

        BytesClaim::Claimed { previous, first }
    }

    /// Decides how a drain handles this cell. Must be called while holding the reservation.
    pub(crate) fn claim_for_drain(&self) -> DrainStep {
        let mut state = self.lock();
        match &*state {
            CellState::Initial => {
                *state = CellState::ReadingBytes {
                    consumed: 0,
                    total: None,
                };
                DrainStep::Skip {
                    consumed: 0,
                    total: None,
                }
            }
            CellState::ReadingBytesMoreLeft { consumed, total } => {
                let (consumed, total) = (*consumed, *total);
                *state = CellState::ReadingBytes {
                    consumed,
                    total: Some(total),
                };
                DrainStep::Skip {
                    consumed,
                    total: Some(total),
                }
            }
            // A byte reader is queued behind the reservation; the stream cannot wait for it.
            CellState::ReadingBytes { consumed, total } => DrainStep::Skip {
                consumed: *consumed,
                total: *total,
            },
            CellState::ReadingWholeValue => DrainStep::Decode,
            CellState::Complete(_) => DrainStep::Done,
            // Decode failures leave the stream past the value.
            CellState::Faulted(err) if !err.is_stream_fatal() => DrainStep::Done,
            CellState::Faulted(err) => DrainStep::Fail(err.clone()),
        }
    }
}

impl<V> CellState<V> {
    fn name(&self) -> &'static str {
        match self {
            CellState::Initial => "initial",
            CellState::ReadingWholeValue => "reading_whole_value",
            CellState::ReadingBytes { .. } => "reading_bytes",
            CellState::ReadingBytesMoreLeft { .. } => "reading_bytes_more_left",
            CellState::Complete(Completion::Value(_)) => "complete_value",
            CellState::Complete(Completion::Drained { .. }) => "complete_drained",
            CellState::Faulted(_) => "faulted",
        }
    }

    fn is_in_flight(&self) -> bool {
        matches!(
            self,
            CellState::ReadingWholeValue | CellState::ReadingBytes { .. }
        )
    }
}

impl CellStateSnapshot {
    pub(crate) fn restore<V>(self) -> CellState<V> {
        match self {
            CellStateSnapshot::Initial => CellState::Initial,
            CellStateSnapshot::MoreLeft { consumed, total } => {
                CellState::ReadingBytesMoreLeft { consumed, total }
            }
        }
    }
}

enum Abandon {
    Restore(CellStateSnapshot),
    Fault,
}

/// Settles a claimed cell if the operation owning the claim is dropped.
///
/// Before the operation touches the stream an abandoned claim is rolled back. Once I/O may have
/// started the cell is faulted and the connection is marked broken, as the stream position is
/// no longer known.
pub(crate) struct ClaimGuard<'a, V: Clone> {
    cell: &'a ValueCell<V>,
    shared: &'a ConnectionShared,
    abandon: Abandon,
    armed: bool,
}

impl<'a, V: Clone> ClaimGuard<'a, V> {
    pub(crate) fn restoring(
        cell: &'a ValueCell<V>,
        shared: &'a ConnectionShared,
        previous: CellStateSnapshot,
    ) -> Self {
        Self {
            cell,
            shared,
            abandon: Abandon::Restore(previous),
            armed: true,
        }
    }

    pub(crate) fn faulting(cell: &'a ValueCell<V>, shared: &'a ConnectionShared) -> Self {
        Self {
            cell,
            shared,
            abandon: Abandon::Fault,
            armed: true,
        }
    }

    /// Called right before the first stream access.
    pub(crate) fn io_started(&mut self) {
        self.abandon = Abandon::Fault;
    }

    /// Stores the final state of the cell and releases the guard.
    pub(crate) fn settle(mut self, state: CellState<V>) {
        self.cell.set(state);
        self.armed = false;
    }

    /// Releases the guard without touching the cell.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl<V: Clone> Drop for ClaimGuard<'_, V> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let mut state = self.cell.lock();
        if !state.is_in_flight() {
            return;
        }

        match self.abandon {
            Abandon::Restore(previous) => {
                trace!(column = self.cell.index, "abandoned claim rolled back");
                *state = previous.restore();
            }
            Abandon::Fault => {
                let err = wire_error!(
                    ErrorKind::OperationCanceled,
                    "Read was abandoned while using the stream"
                );
                trace!(column = self.cell.index, "abandoned read faulted the cell");
                *state = CellState::Faulted(err.clone());
                drop(state);
                self.shared.mark_broken(&err);
            }
        }
    }
}
