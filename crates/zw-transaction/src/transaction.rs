//! The transaction entity and its lifecycle state machine.
//!
//! A transaction is one outbound conversation: the payload written to the
//! transport plus the expected chain of confirmations back from the network
//! (transport acceptance, device acknowledgment, and optionally the device's
//! substantive reply). The manager tracks each transaction through the
//! phases below with a per-phase deadline.
//!
//! ```text
//! Uninitialized → WaitResponse → WaitRequest → WaitData → Done
//!                      \______________\____________\→ Aborted → Cancelled
//! ```
//!
//! States only move forward within one attempt; a timeout-driven retry
//! resets the lifecycle explicitly through
//! [`Transaction::reset_for_retry`].

use crate::{ManagerConfig, TransactionPriority};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use zw_network::{LogicalCommand, NodeId, ReplyKey};

// ============================================================================
// Identifiers and States
// ============================================================================

/// Unique transaction identifier.
///
/// Assigned monotonically from 1; the id space is never reused within a
/// process lifetime. Id 0 is reserved and never assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn {}", self.0)
    }
}

/// Lifecycle phase of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// Created but not yet written to the transport.
    Uninitialized,
    /// Written; awaiting transport-level acceptance.
    WaitResponse,
    /// Accepted; awaiting device-level acknowledgment.
    WaitRequest,
    /// Acknowledged; awaiting the device's substantive reply.
    WaitData,
    /// Completed successfully.
    Done,
    /// Terminated without completing (timeout, explicit cancel, rejection).
    Cancelled,
    /// Abort requested on the transport; in a grace period during which the
    /// device may still answer. Not terminal: the transaction stays in the
    /// outstanding set until the grace deadline passes.
    Aborted,
}

impl TransactionState {
    /// Whether this state ends the transaction's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionState::Done | TransactionState::Cancelled)
    }

    /// Position along the forward path, used to assert forward-only motion.
    fn rank(&self) -> u8 {
        match self {
            TransactionState::Uninitialized => 0,
            TransactionState::WaitResponse => 1,
            TransactionState::WaitRequest => 2,
            TransactionState::WaitData => 3,
            TransactionState::Done => 4,
            // Sideways exits, reachable from any live state.
            TransactionState::Aborted | TransactionState::Cancelled => u8::MAX,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Terminal outcome delivered to completion listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The transaction completed, including its expected reply if any.
    Complete,
    /// No transport-level acceptance within the response timeout.
    TimeoutAwaitingResponse,
    /// No device-level acknowledgment within the request timeout.
    TimeoutAwaitingRequest,
    /// No substantive reply within the transaction's data timeout.
    TimeoutAwaitingData,
    /// Terminated without a timeout attribution (bulk clear, transport
    /// rejection, failed linked handshake).
    Cancelled,
    /// The target lacks the security capability the transaction requires.
    /// Reported once, never retried.
    SecurityUnavailable,
}

impl Outcome {
    /// Whether this outcome represents success.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Complete)
    }
}

/// Completion notification passed to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionEvent {
    /// The terminal transaction.
    pub id: TransactionId,
    /// Its destination.
    pub target: NodeId,
    /// Final outcome.
    pub outcome: Outcome,
}

// ============================================================================
// Payload (caller input)
// ============================================================================

/// Caller-supplied description of a transaction to enqueue.
///
/// The payload bytes come from the codec layer and are opaque here. Fields
/// not set through the `with_*` builders take manager defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPayload {
    /// Destination node.
    pub target: NodeId,
    /// Encoded command bytes, opaque to the manager.
    pub payload: Vec<u8>,
    /// Dispatch priority.
    pub priority: TransactionPriority,
    /// Reply expected back from the device, if any. `None` makes this a
    /// fire-and-forget transaction that completes on device acknowledgment.
    pub expected_reply: Option<ReplyKey>,
    /// Whether the payload must be nonce-encapsulated before transmission.
    pub requires_security: bool,
    /// Send-attempt budget; 0 takes the manager default.
    pub max_attempts: u8,
    /// Reply timeout override for the `WaitData` phase.
    pub data_timeout: Option<Duration>,
}

impl TransactionPayload {
    /// Describe a transaction carrying `payload` to `target`.
    pub fn new(target: NodeId, payload: Vec<u8>) -> Self {
        TransactionPayload {
            target,
            payload,
            priority: TransactionPriority::default(),
            expected_reply: None,
            requires_security: false,
            max_attempts: 0,
            data_timeout: None,
        }
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: TransactionPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Expect `key` back from the device as the substantive reply.
    pub fn expecting_reply(mut self, key: ReplyKey) -> Self {
        self.expected_reply = Some(key);
        self
    }

    /// Require nonce encapsulation before transmission.
    pub fn secure(mut self) -> Self {
        self.requires_security = true;
        self
    }

    /// Set the send-attempt budget.
    pub fn with_attempts(mut self, attempts: u8) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Override the reply timeout.
    pub fn with_data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = Some(timeout);
        self
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Discriminates ordinary transactions from synthesized nonce requests.
#[derive(Debug)]
pub(crate) enum TransactionKind {
    /// An ordinary caller transaction.
    Plain,
    /// A nonce request synthesized by the dispatcher; `linked` is the real
    /// transaction it unblocks, parked here and nowhere else until the
    /// nonce report arrives.
    NonceRequest {
        /// The parked security-required transaction.
        linked: Box<Transaction>,
    },
}

/// One outbound conversation tracked end-to-end by the manager.
#[derive(Debug)]
pub struct Transaction {
    pub(crate) id: TransactionId,
    /// Insertion counter; tie-break within equal priority.
    pub(crate) seq: u64,
    pub(crate) target: NodeId,
    pub(crate) payload: Vec<u8>,
    pub(crate) priority: TransactionPriority,
    pub(crate) expected_reply: Option<ReplyKey>,
    pub(crate) requires_security: bool,
    pub(crate) data_timeout: Duration,
    pub(crate) attempts_remaining: u8,
    pub(crate) state: TransactionState,
    /// Absolute time at which the current state times out.
    pub(crate) deadline: Option<Instant>,
    /// The phase a timeout fired in, retained through the abort grace
    /// period so the final outcome can name it.
    pub(crate) timed_out_in: Option<TransactionState>,
    pub(crate) kind: TransactionKind,
}

impl Transaction {
    /// Build a transaction from a caller payload.
    pub(crate) fn new(
        id: TransactionId,
        seq: u64,
        payload: TransactionPayload,
        config: &ManagerConfig,
    ) -> Self {
        let attempts = if payload.max_attempts == 0 {
            config.default_attempts
        } else {
            payload.max_attempts
        };
        Transaction {
            id,
            seq,
            target: payload.target,
            payload: payload.payload,
            priority: payload.priority,
            expected_reply: payload.expected_reply,
            requires_security: payload.requires_security,
            data_timeout: payload.data_timeout.unwrap_or(config.default_data_timeout),
            attempts_remaining: attempts.max(1),
            state: TransactionState::Uninitialized,
            deadline: None,
            timed_out_in: None,
            kind: TransactionKind::Plain,
        }
    }

    /// Build a synthesized nonce request carrying the parked `linked`
    /// transaction. Runs at `RealTime` priority: a nonce is only useful
    /// while fresh.
    pub(crate) fn nonce_request(
        id: TransactionId,
        seq: u64,
        payload: Vec<u8>,
        reply_key: ReplyKey,
        linked: Transaction,
        config: &ManagerConfig,
    ) -> Self {
        Transaction {
            id,
            seq,
            target: linked.target,
            payload,
            priority: TransactionPriority::RealTime,
            expected_reply: Some(reply_key),
            requires_security: false,
            data_timeout: config.default_data_timeout,
            attempts_remaining: 1,
            state: TransactionState::Uninitialized,
            deadline: None,
            timed_out_in: None,
            kind: TransactionKind::NonceRequest { linked: Box::new(linked) },
        }
    }

    /// Transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Destination node.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Dispatch priority.
    pub fn priority(&self) -> TransactionPriority {
        self.priority
    }

    /// Whether this is a dispatcher-synthesized nonce request.
    pub fn is_nonce_request(&self) -> bool {
        matches!(self.kind, TransactionKind::NonceRequest { .. })
    }

    /// Ordering key for the priority queues.
    pub(crate) fn sort_key(&self) -> (TransactionPriority, u64) {
        (self.priority, self.seq)
    }

    /// Whether `other` is a stale duplicate of this transaction: same
    /// target and same logical payload.
    pub(crate) fn duplicate_of(&self, other: &Transaction) -> bool {
        self.target == other.target && self.payload == other.payload
    }

    /// Move to `state`, which must not be earlier on the forward path.
    pub(crate) fn advance(&mut self, state: TransactionState) {
        debug_assert!(
            state.rank() >= self.state.rank(),
            "transaction state may not move backwards: {:?} -> {:?}",
            self.state,
            state
        );
        self.state = state;
    }

    /// Recompute the deadline for the current state.
    pub(crate) fn recompute_deadline(&mut self, now: Instant, config: &ManagerConfig) {
        let timeout = match self.state {
            TransactionState::WaitResponse => Some(config.response_timeout),
            TransactionState::WaitRequest => Some(config.request_timeout),
            TransactionState::WaitData => Some(self.data_timeout),
            TransactionState::Aborted => Some(config.abort_timeout),
            _ => None,
        };
        self.deadline = timeout.map(|t| now + t);
    }

    /// Whether the current state has timed out at `now`.
    pub(crate) fn expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| d <= now)
    }

    /// Record a timeout in the current phase and enter the abort grace
    /// period.
    pub(crate) fn mark_timed_out(&mut self, now: Instant, config: &ManagerConfig) {
        self.timed_out_in = Some(self.state);
        self.advance(TransactionState::Aborted);
        self.recompute_deadline(now, config);
    }

    /// The outcome to report for a transaction that timed out.
    pub(crate) fn timeout_outcome(&self) -> Outcome {
        match self.timed_out_in {
            Some(TransactionState::WaitResponse) => Outcome::TimeoutAwaitingResponse,
            Some(TransactionState::WaitRequest) => Outcome::TimeoutAwaitingRequest,
            Some(TransactionState::WaitData) => Outcome::TimeoutAwaitingData,
            _ => Outcome::Cancelled,
        }
    }

    /// Reset the lifecycle for a retry attempt. The id is kept so the
    /// original caller's future still resolves; the queue position is not.
    pub(crate) fn reset_for_retry(&mut self, seq: u64) {
        self.seq = seq;
        self.state = TransactionState::Uninitialized;
        self.deadline = None;
        self.timed_out_in = None;
    }

    /// Whether `cmd` from `node` is the reply this transaction awaits.
    pub(crate) fn matches_reply(&self, node: NodeId, cmd: &LogicalCommand) -> bool {
        self.state == TransactionState::WaitData
            && self.target == node
            && self.expected_reply == Some(cmd.key())
    }

    /// Take the parked linked transaction out of a nonce request, if any.
    pub(crate) fn take_linked(&mut self) -> Option<Transaction> {
        match std::mem::replace(&mut self.kind, TransactionKind::Plain) {
            TransactionKind::NonceRequest { linked } => Some(*linked),
            TransactionKind::Plain => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ManagerConfig {
        ManagerConfig::default()
    }

    fn plain(id: u64, node: u8) -> Transaction {
        Transaction::new(
            TransactionId(id),
            id,
            TransactionPayload::new(NodeId(node), vec![0x25, 0x02]),
            &config(),
        )
    }

    #[test]
    fn test_payload_builders() {
        let p = TransactionPayload::new(NodeId(5), vec![0x25, 0x02])
            .with_priority(TransactionPriority::Immediate)
            .expecting_reply(ReplyKey::new(0x25, 0x03))
            .secure()
            .with_attempts(3)
            .with_data_timeout(Duration::from_millis(750));
        assert_eq!(p.priority, TransactionPriority::Immediate);
        assert_eq!(p.expected_reply, Some(ReplyKey::new(0x25, 0x03)));
        assert!(p.requires_security);
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.data_timeout, Some(Duration::from_millis(750)));
    }

    #[test]
    fn test_attempts_default_applied() {
        let tx = plain(1, 5);
        assert_eq!(tx.attempts_remaining, 1);

        let tx = Transaction::new(
            TransactionId(2),
            2,
            TransactionPayload::new(NodeId(5), vec![0x01]).with_attempts(4),
            &config(),
        );
        assert_eq!(tx.attempts_remaining, 4);
    }

    #[test]
    fn test_deadline_follows_state() {
        let cfg = config();
        let now = Instant::now();
        let mut tx = plain(1, 5);

        tx.advance(TransactionState::WaitResponse);
        tx.recompute_deadline(now, &cfg);
        assert_eq!(tx.deadline, Some(now + cfg.response_timeout));

        tx.advance(TransactionState::WaitRequest);
        tx.recompute_deadline(now, &cfg);
        assert_eq!(tx.deadline, Some(now + cfg.request_timeout));

        tx.advance(TransactionState::WaitData);
        tx.recompute_deadline(now, &cfg);
        assert_eq!(tx.deadline, Some(now + tx.data_timeout));

        tx.advance(TransactionState::Done);
        tx.recompute_deadline(now, &cfg);
        assert_eq!(tx.deadline, None);
    }

    #[test]
    fn test_expired() {
        let cfg = config();
        let mut tx = plain(1, 5);
        tx.advance(TransactionState::WaitResponse);
        let past = Instant::now() - Duration::from_secs(60);
        tx.recompute_deadline(past, &cfg);
        assert!(tx.expired(Instant::now()));
        tx.recompute_deadline(Instant::now(), &cfg);
        assert!(!tx.expired(Instant::now()));
    }

    #[test]
    fn test_timeout_outcome_maps_phase() {
        let cfg = config();
        let now = Instant::now();

        let mut tx = plain(1, 5);
        tx.advance(TransactionState::WaitResponse);
        tx.mark_timed_out(now, &cfg);
        assert_eq!(tx.state(), TransactionState::Aborted);
        assert_eq!(tx.timeout_outcome(), Outcome::TimeoutAwaitingResponse);
        assert_eq!(tx.deadline, Some(now + cfg.abort_timeout));

        let mut tx = plain(2, 5);
        tx.advance(TransactionState::WaitResponse);
        tx.advance(TransactionState::WaitRequest);
        tx.mark_timed_out(now, &cfg);
        assert_eq!(tx.timeout_outcome(), Outcome::TimeoutAwaitingRequest);
    }

    #[test]
    fn test_matches_reply_requires_wait_data() {
        let mut tx = Transaction::new(
            TransactionId(1),
            1,
            TransactionPayload::new(NodeId(5), vec![0x25, 0x02])
                .expecting_reply(ReplyKey::new(0x25, 0x03)),
            &config(),
        );
        let report = LogicalCommand::new(0x25, 0x03, vec![0xFF]);

        assert!(!tx.matches_reply(NodeId(5), &report));
        tx.advance(TransactionState::WaitResponse);
        tx.advance(TransactionState::WaitRequest);
        tx.advance(TransactionState::WaitData);
        assert!(tx.matches_reply(NodeId(5), &report));
        // Wrong node
        assert!(!tx.matches_reply(NodeId(6), &report));
        // Wrong command
        assert!(!tx.matches_reply(NodeId(5), &LogicalCommand::new(0x25, 0x01, vec![])));
    }

    #[test]
    fn test_fire_and_forget_never_matches() {
        let mut tx = plain(1, 5);
        tx.advance(TransactionState::WaitResponse);
        tx.advance(TransactionState::WaitRequest);
        tx.advance(TransactionState::WaitData);
        assert!(!tx.matches_reply(NodeId(5), &LogicalCommand::new(0x25, 0x03, vec![])));
    }

    #[test]
    fn test_reset_for_retry() {
        let cfg = config();
        let mut tx = plain(1, 5);
        tx.advance(TransactionState::WaitResponse);
        tx.mark_timed_out(Instant::now(), &cfg);
        tx.reset_for_retry(99);
        assert_eq!(tx.state(), TransactionState::Uninitialized);
        assert_eq!(tx.seq, 99);
        assert_eq!(tx.deadline, None);
        assert_eq!(tx.timeout_outcome(), Outcome::Cancelled);
    }

    #[test]
    fn test_duplicate_identity() {
        let a = plain(1, 5);
        let b = plain(2, 5);
        assert!(a.duplicate_of(&b));

        let c = Transaction::new(
            TransactionId(3),
            3,
            TransactionPayload::new(NodeId(5), vec![0x25, 0x01]),
            &config(),
        );
        assert!(!a.duplicate_of(&c));

        let d = Transaction::new(
            TransactionId(4),
            4,
            TransactionPayload::new(NodeId(6), vec![0x25, 0x02]),
            &config(),
        );
        assert!(!a.duplicate_of(&d));
    }

    #[test]
    fn test_nonce_request_carries_linked() {
        let cfg = config();
        let real = Transaction::new(
            TransactionId(1),
            1,
            TransactionPayload::new(NodeId(5), vec![0x25, 0x01]).secure(),
            &cfg,
        );
        let mut nonce = Transaction::nonce_request(
            TransactionId(2),
            2,
            vec![0x98, 0x40],
            ReplyKey::new(0x98, 0x80),
            real,
            &cfg,
        );
        assert!(nonce.is_nonce_request());
        assert_eq!(nonce.target(), NodeId(5));
        assert_eq!(nonce.priority(), TransactionPriority::RealTime);
        assert_eq!(nonce.expected_reply, Some(ReplyKey::new(0x98, 0x80)));

        let linked = nonce.take_linked().expect("linked transaction");
        assert_eq!(linked.id(), TransactionId(1));
        assert!(!nonce.is_nonce_request());
        assert!(nonce.take_linked().is_none());
    }
}
