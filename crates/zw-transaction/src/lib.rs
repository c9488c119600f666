//! Transaction management for a half-duplex, single-channel mesh network
//! reached through one serial transport.
//!
//! Only one command may be on the air at a time, and every command owes a
//! chain of confirmations: transport acceptance, device acknowledgment, and
//! optionally a substantive reply. This crate queues outbound commands by
//! priority, serializes them through a single in-flight gate, correlates
//! inbound traffic back to the transaction awaiting it, and times out the
//! ones the network never answers.
//!
//! [`TransactionManager`] is the entry point. Callers describe a send with
//! a [`TransactionPayload`], then either fire-and-observe via
//! [`enqueue`](TransactionManager::enqueue) plus a listener, or block on a
//! [`SendFuture`] from [`send_async`](TransactionManager::send_async).
//!
//! Node resolution, payload decoding and security encapsulation are
//! delegated to the traits in the `zw-network` crate; this crate never
//! inspects payload bytes itself.

mod config;
mod error;
mod future;
mod manager;
mod priority;
mod queue;
mod timer;
mod transaction;

pub use config::ManagerConfig;
pub use error::EnqueueError;
pub use future::SendFuture;
pub use manager::{ListenerId, TransactionManager};
pub use priority::TransactionPriority;
pub use transaction::{
    Outcome, TransactionEvent, TransactionId, TransactionPayload, TransactionState,
};
