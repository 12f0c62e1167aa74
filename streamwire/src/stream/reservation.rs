use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::concurrency::cancel::{CancelRx, run_cancellable};
use crate::error::WireResult;

#[derive(Debug, Default)]
struct ReservationCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of how often the stream was reserved and released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationStats {
    pub acquired: u64,
    pub released: u64,
}

impl ReservationStats {
    /// Number of reservations currently alive.
    pub fn outstanding(&self) -> u64 {
        self.acquired.saturating_sub(self.released)
    }
}

/// Owner of the physical stream of one connection.
///
/// Every operation that writes to or reads from the stream first obtains a
/// [`StreamReservation`] from the gate. Waiters are served in FIFO order and a reservation is
/// never shared.
#[derive(Debug)]
pub struct StreamGate<S> {
    stream: Arc<Mutex<S>>,
    counters: Arc<ReservationCounters>,
}

impl<S> Clone for StreamGate<S> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<S> StreamGate<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            counters: Arc::new(ReservationCounters::default()),
        }
    }

    /// Waits for exclusive ownership of the stream.
    ///
    /// Fails with [`crate::error::ErrorKind::OperationCanceled`] if `cancel` fires first, in
    /// which case nothing is acquired.
    pub async fn reserve(&self, cancel: &CancelRx) -> WireResult<StreamReservation<S>> {
        let guard = run_cancellable(cancel, async {
            Ok(self.stream.clone().lock_owned().await)
        })
        .await?;

        let sequence = self.counters.acquired.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(sequence, "stream reserved");

        Ok(StreamReservation {
            guard,
            counters: self.counters.clone(),
            sequence,
        })
    }

    /// Returns `true` while some operation holds the stream.
    pub fn is_reserved(&self) -> bool {
        self.stream.try_lock().is_err()
    }

    pub fn stats(&self) -> ReservationStats {
        ReservationStats {
            acquired: self.counters.acquired.load(Ordering::Acquire),
            released: self.counters.released.load(Ordering::Acquire),
        }
    }
}

/// Exclusive access to the stream for one logical operation.
///
/// Dropping the reservation releases the stream, on success, error and cancellation alike.
#[derive(Debug)]
pub struct StreamReservation<S> {
    guard: OwnedMutexGuard<S>,
    counters: Arc<ReservationCounters>,
    sequence: u64,
}

impl<S> StreamReservation<S> {
    pub fn stream(&mut self) -> &mut S {
        &mut self.guard
    }

    /// Position of this reservation in the acquisition order of its gate, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl<S> Deref for StreamReservation<S> {
    type Target = S;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<S> DerefMut for StreamReservation<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<S> Drop for StreamReservation<S> {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::AcqRel);
        trace!(sequence = self.sequence, "stream released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::cancel::create_cancel_channel;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_reservation_is_exclusive_and_counted() {
        let gate = StreamGate::new(Vec::<u8>::new());
        let cancel = CancelRx::never();

        let mut first = gate.reserve(&cancel).await.unwrap();
        first.stream().push(1);
        assert!(gate.is_reserved());
        assert_eq!(gate.stats().outstanding(), 1);
        drop(first);

        assert!(!gate.is_reserved());
        let second = gate.reserve(&cancel).await.unwrap();
        assert_eq!(second.sequence(), 2);
        assert_eq!(*second, vec![1]);
        drop(second);

        let stats = gate.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 2);
    }

    #[tokio::test]
    async fn test_canceled_wait_acquires_nothing() {
        let gate = StreamGate::new(());
        let held = gate.reserve(&CancelRx::never()).await.unwrap();

        let (tx, rx) = create_cancel_channel();
        tx.cancel();
        let err = gate.reserve(&rx).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCanceled);

        drop(held);
        assert_eq!(gate.stats().acquired, 1);
        assert_eq!(gate.stats().released, 1);
    }
}
