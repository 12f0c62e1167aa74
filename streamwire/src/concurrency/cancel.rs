use std::future::Future;

use crate::bail;
use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};
use crate::error::{ErrorKind, WireResult};

/// Requests cancellation of every operation observing a subscribed [`CancelRx`].
#[derive(Debug, Clone)]
pub struct CancelTx(SignalTx);

impl CancelTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Cancels all current and future subscribers. Calling it twice has no extra effect.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> CancelRx {
        CancelRx(Some(self.0.subscribe()))
    }
}

/// Cooperative cancellation token handed to every suspendable operation.
#[derive(Debug, Clone)]
pub struct CancelRx(Option<SignalRx>);

impl CancelRx {
    /// Returns a token that is never cancelled.
    pub fn never() -> Self {
        Self(None)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested.
    ///
    /// Stays pending forever if the sender is dropped without cancelling.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.0 {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }

        std::future::pending::<()>().await
    }
}

pub fn create_cancel_channel() -> (CancelTx, CancelRx) {
    let (tx, rx) = create_signal();
    (CancelTx::wrap(tx), CancelRx(Some(rx)))
}

/// Runs `future` unless `cancel` fires first.
///
/// Cancellation is checked before the future is polled, so an already cancelled token never
/// starts the operation. The future is dropped on cancellation.
pub async fn run_cancellable<F, T>(cancel: &CancelRx, future: F) -> WireResult<T>
where
    F: Future<Output = WireResult<T>>,
{
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            bail!(ErrorKind::OperationCanceled, "Operation was canceled");
        }
        result = future => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_wins_over_pending_future() {
        let (tx, rx) = create_cancel_channel();
        tx.cancel();

        let result = run_cancellable(&rx, async { Ok::<_, crate::error::WireError>(1) }).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::OperationCanceled);
        assert!(rx.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_runs_to_completion() {
        let rx = CancelRx::never();
        let result = run_cancellable(&rx, async { Ok::<_, crate::error::WireError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert!(!rx.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_sender_does_not_cancel() {
        let (tx, rx) = create_cancel_channel();
        drop(tx);

        let result = run_cancellable(&rx, async { Ok::<_, crate::error::WireError>(()) }).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_future() {
        let (tx, rx) = create_cancel_channel();
        let subscriber = tx.subscribe();

        let cancel_later = async move {
            tokio::task::yield_now().await;
            tx.cancel();
        };
        let (result, _) = tokio::join!(
            run_cancellable(&subscriber, async {
                std::future::pending::<()>().await;
                Ok::<_, crate::error::WireError>(())
            }),
            cancel_later
        );

        assert_eq!(result.unwrap_err().kind(), ErrorKind::OperationCanceled);
    }
}
