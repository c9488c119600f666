//! Error types for the transaction manager's public boundary.
//!
//! The manager reports every terminal transaction outcome, success or
//! failure, through the completion notifier (see
//! [`Outcome`](crate::Outcome)); the only errors crossing the public
//! boundary synchronously are rejections of obviously malformed input at
//! enqueue time.

use thiserror::Error;

/// Errors rejecting a transaction at enqueue time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// The payload buffer was empty.
    #[error("transaction payload is empty")]
    EmptyPayload,

    /// The manager has been shut down and accepts no new transactions.
    #[error("transaction manager is shut down")]
    ShutDown,
}
