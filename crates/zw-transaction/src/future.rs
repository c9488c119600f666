//! Completion future for asynchronously sent transactions.

use crate::{Outcome, TransactionId};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Handle to the eventual outcome of a transaction sent with
/// [`send_async`](crate::TransactionManager::send_async).
///
/// The listener feeding this future is registered before the transaction is
/// enqueued, so a completion that races the enqueue is never missed. The
/// listener is deregistered when the future resolves or is dropped.
///
/// If the manager shuts down before the transaction completes, the future
/// resolves to [`Outcome::Cancelled`].
pub struct SendFuture {
    id: TransactionId,
    outcome_rx: Receiver<Outcome>,
    resolved: Option<Outcome>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl SendFuture {
    pub(crate) fn new(
        id: TransactionId,
        outcome_rx: Receiver<Outcome>,
        cleanup: Box<dyn FnOnce() + Send>,
    ) -> Self {
        SendFuture { id, outcome_rx, resolved: None, cleanup: Some(cleanup) }
    }

    /// Id of the transaction this future tracks.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Block until the transaction reaches a terminal state.
    pub fn wait(&mut self) -> Outcome {
        if let Some(outcome) = self.resolved {
            return outcome;
        }
        let outcome = self.outcome_rx.recv().unwrap_or(Outcome::Cancelled);
        self.resolve(outcome);
        outcome
    }

    /// Block for at most `timeout`; `None` if the transaction is still live.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Outcome> {
        if let Some(outcome) = self.resolved {
            return Some(outcome);
        }
        match self.outcome_rx.recv_timeout(timeout) {
            Ok(outcome) => {
                self.resolve(outcome);
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.resolve(Outcome::Cancelled);
                Some(Outcome::Cancelled)
            }
        }
    }

    /// Non-blocking poll; `None` if the transaction is still live.
    pub fn try_get(&mut self) -> Option<Outcome> {
        if let Some(outcome) = self.resolved {
            return Some(outcome);
        }
        match self.outcome_rx.try_recv() {
            Ok(outcome) => {
                self.resolve(outcome);
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.resolve(Outcome::Cancelled);
                Some(Outcome::Cancelled)
            }
        }
    }

    fn resolve(&mut self, outcome: Outcome) {
        self.resolved = Some(outcome);
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl Drop for SendFuture {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}
