//! Collaborator traits consumed by the transaction manager.
//!
//! The transaction manager treats everything beyond ordering, pacing and
//! correlation as an external collaborator reached through one of these
//! traits. All of them are object safe and shared across threads as
//! `Arc<dyn …>`; implementations must be internally synchronized.

use crate::{LogicalCommand, NodeId, ReplyKey};
use std::sync::Arc;

/// Directory of known nodes and their runtime state.
pub trait NodeDirectory: Send + Sync {
    /// Whether this node is known to the directory.
    ///
    /// Inbound payloads from unknown nodes are dropped; queued transactions
    /// for unknown nodes are skipped in place (the node may appear later,
    /// e.g. mid-inclusion).
    fn node_exists(&self, node: NodeId) -> bool;

    /// Whether the node is currently listening.
    ///
    /// Battery devices sleep most of the time; transactions for sleeping
    /// nodes stay queued without losing their position.
    fn is_awake(&self, node: NodeId) -> bool;

    /// Decode a raw inbound payload from `node` into logical commands.
    ///
    /// This is the codec-layer seam: the payload bytes are opaque to the
    /// transaction manager and only the returned `(command class, command)`
    /// keys are used for correlation. May return an empty vec.
    fn interpret(&self, node: NodeId, raw: &[u8]) -> Vec<LogicalCommand>;

    /// Security handshake state for `node`, or `None` if the node does not
    /// support the security command class at all.
    fn security(&self, node: NodeId) -> Option<Arc<dyn SecurityHandshake>>;
}

/// Per-node cryptographic nonce state and encapsulation.
///
/// A security-required transaction may only be written to the transport
/// after encapsulation with a fresh nonce from the target device. When no
/// nonce is cached the manager synthesizes a nonce-request transaction from
/// [`nonce_request_payload`] and parks the real one until the report
/// identified by [`nonce_report_key`] arrives.
///
/// [`nonce_request_payload`]: SecurityHandshake::nonce_request_payload
/// [`nonce_report_key`]: SecurityHandshake::nonce_report_key
pub trait SecurityHandshake: Send + Sync {
    /// Whether a usable nonce for the target is currently cached.
    fn nonce_available(&self) -> bool;

    /// Encrypt and encapsulate `payload` using the cached nonce.
    fn encapsulate(&self, payload: &[u8]) -> Vec<u8>;

    /// Payload of a nonce request addressed to the target.
    fn nonce_request_payload(&self) -> Vec<u8>;

    /// Reply key of the nonce report answering a nonce request.
    ///
    /// Supplied by the adapter so the manager can correlate the report
    /// without interpreting payload bytes.
    fn nonce_report_key(&self) -> ReplyKey;
}

/// The single serial transport to the network.
///
/// Both operations are fire-and-forget from the manager's point of view;
/// inbound bytes are delivered asynchronously by the transport owner calling
/// the manager's inbound entry point.
///
/// Both methods may be invoked while the manager holds its internal lock, so
/// implementations must not call back into the manager synchronously.
pub trait Transport: Send + Sync {
    /// Write an outbound payload to the serial channel.
    fn write(&self, payload: &[u8]);

    /// Request a low-level abort of the exchange currently in flight.
    fn send_abort(&self);
}
