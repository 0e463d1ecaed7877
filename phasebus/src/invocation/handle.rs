//! Handles for asynchronous invocations.

use crate::context::{Exchange, Message};
use crate::correlation::Correlator;
use crate::errors::{Fault, FaultKind, WaitError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone)]
enum Slot {
    Pending,
    Ready(Result<Message, Fault>),
    Cancelled,
}

impl Slot {
    fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    fn to_result(&self) -> Result<Message, WaitError> {
        match self {
            Self::Pending => Err(WaitError::NotReady),
            Self::Ready(Ok(message)) => Ok(message.clone()),
            Self::Ready(Err(fault)) => Err(WaitError::Fault(fault.clone())),
            Self::Cancelled => Err(WaitError::Cancelled),
        }
    }
}

/// The caller's view of an asynchronous call.
///
/// The handle resolves exactly once, with the response, a fault, or by
/// cancellation. Clones observe the same call.
#[derive(Debug, Clone)]
pub struct ResponseHandle {
    slot: Arc<watch::Sender<Slot>>,
    rx: watch::Receiver<Slot>,
    exchange: Exchange,
    correlator: Arc<Correlator>,
}

/// Resolves a [`ResponseHandle`] from the worker that finishes the call.
///
/// Dropping it without completing, as when the worker panics, resolves the
/// handle with an `Abandoned` fault.
#[derive(Debug)]
pub(crate) struct Completer {
    slot: Arc<watch::Sender<Slot>>,
}

impl Completer {
    /// Publishes the outcome unless the handle was already resolved.
    pub(crate) fn complete(self, outcome: Result<Message, Fault>) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_pending() {
                *slot = Slot::Ready(outcome);
                true
            } else {
                false
            }
        })
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        let abandoned = self.slot.send_if_modified(|slot| {
            if slot.is_pending() {
                *slot = Slot::Ready(Err(abandoned()));
                true
            } else {
                false
            }
        });
        if abandoned {
            debug!("Asynchronous call abandoned by its worker");
        }
    }
}

fn abandoned() -> Fault {
    Fault::new(
        FaultKind::Abandoned,
        "Asynchronous call ended without an outcome",
    )
}

impl ResponseHandle {
    pub(crate) fn new(exchange: Exchange, correlator: Arc<Correlator>) -> (Self, Completer) {
        let (tx, rx) = watch::channel(Slot::Pending);
        let slot = Arc::new(tx);
        (
            Self {
                slot: slot.clone(),
                rx,
                exchange,
                correlator,
            },
            Completer { slot },
        )
    }

    /// Returns true once the call has a response, a fault, or was cancelled.
    #[must_use]
    pub fn is_done(&self) -> bool {
        !self.rx.borrow().is_pending()
    }

    /// Returns the outcome without waiting; `NotReady` while in flight.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub fn try_get(&self) -> Result<Message, WaitError> {
        self.rx.borrow().to_result()
    }

    /// Waits up to `timeout` for the outcome.
    ///
    /// A zero timeout returns immediately. Elapsing does not affect the call;
    /// `get` may be called again.
    ///
    /// # Errors
    ///
    /// Returns `NotReady` if the wait elapsed, `Cancelled` if the handle was
    /// cancelled, or the call's fault.
    pub async fn get(&self, timeout: Duration) -> Result<Message, WaitError> {
        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(|slot| !slot.is_pending())
                .await
                .map(|slot| slot.to_result())
        })
        .await;

        match waited {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WaitError::Fault(abandoned())),
            Err(_) => Err(WaitError::NotReady),
        }
    }

    /// Cancels the call if it has not finished.
    ///
    /// The pending call is dropped from the correlator and the exchange is
    /// faulted unless its inbound chain already started; a response arriving
    /// later is discarded. Returns false if the handle was already resolved.
    pub fn cancel(&self) -> bool {
        let cancelled = self.slot.send_if_modified(|slot| {
            if slot.is_pending() {
                *slot = Slot::Cancelled;
                true
            } else {
                false
            }
        });
        if cancelled {
            if let Some(key) = self.exchange.correlation_key() {
                self.correlator.cancel(&key);
            }
            self.exchange.cancel("Cancelled by caller");
            debug!(exchange = %self.exchange.id(), "Asynchronous call cancelled");
        }
        cancelled
    }

    /// Returns the exchange behind the call.
    #[must_use]
    pub fn exchange(&self) -> &Exchange {
        &self.exchange
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExchangeState;
    use crate::errors::FaultKind;
    use crate::testing::assert_wait_fault;

    fn handle() -> (ResponseHandle, Completer) {
        ResponseHandle::new(Exchange::client(false), Arc::new(Correlator::default()))
    }

    #[tokio::test]
    async fn test_get_zero_before_completion_is_not_ready() {
        let (handle, _completer) = handle();
        assert!(!handle.is_done());
        assert_eq!(handle.get(Duration::ZERO).await.unwrap_err(), WaitError::NotReady);
        assert_eq!(handle.try_get().unwrap_err(), WaitError::NotReady);
    }

    #[tokio::test]
    async fn test_completion_wakes_waiters() {
        let (handle, completer) = handle();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.get(Duration::from_secs(5)).await });
        tokio::task::yield_now().await;

        assert!(completer.complete(Ok(Message::new("done"))));
        assert_eq!(task.await.unwrap().unwrap().text(), "done");
        assert!(handle.is_done());
        assert_eq!(handle.get(Duration::ZERO).await.unwrap().text(), "done");
    }

    #[tokio::test]
    async fn test_fault_outcome() {
        let (handle, completer) = handle();
        completer.complete(Err(Fault::new(FaultKind::Timeout, "late")));
        assert_wait_fault(&handle.get(Duration::ZERO).await, &FaultKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_later_completion() {
        let (handle, completer) = handle();
        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!completer.complete(Ok(Message::new("late"))));
        assert_eq!(handle.get(Duration::ZERO).await.unwrap_err(), WaitError::Cancelled);
        assert_eq!(handle.exchange().state(), ExchangeState::Faulted);
    }

    #[tokio::test]
    async fn test_dropped_completer_abandons_call() {
        let (handle, completer) = handle();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.get(Duration::from_secs(5)).await });
        tokio::task::yield_now().await;

        drop(completer);
        assert_wait_fault(&task.await.unwrap(), &FaultKind::Abandoned);
        assert!(handle.is_done());
        assert!(!handle.cancel());
    }

    #[tokio::test]
    async fn test_worker_panic_abandons_call() {
        let (handle, completer) = handle();
        let worker = tokio::spawn(async move {
            let _completer = completer;
            panic!("stage blew up");
        });
        assert!(worker.await.is_err());
        assert_wait_fault(&handle.get(Duration::from_secs(1)).await, &FaultKind::Abandoned);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_refused() {
        let (handle, completer) = handle();
        completer.complete(Ok(Message::new("ok")));
        assert!(!handle.cancel());
        assert!(handle.get(Duration::ZERO).await.is_ok());
    }
}
