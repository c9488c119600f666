//! The transaction manager: dispatcher, receive correlator, completion
//! notifier and the public send facade.
//!
//! ## Architecture
//!
//! All mutable coordination state (the three priority queues, the
//! outstanding set, the in-flight gate and the id/seq counters) lives in
//! one [`ManagerState`] behind a single mutex. Three worker threads feed
//! it:
//!
//! - the **receive correlator** drains the inbound payload queue and
//!   matches decoded commands to outstanding transactions,
//! - the **timeout scheduler** (see [`timer`](crate::timer)) expires the
//!   earliest-deadline outstanding transaction,
//! - the **notifier** drains the completion event channel and fans events
//!   out to registered listeners, off the state lock.
//!
//! Caller threads enqueue and optionally block on a [`SendFuture`]. The
//! dispatcher itself is not a thread: `try_dispatch_next` runs under the
//! state lock on whichever thread changed state.
//!
//! ## Dispatch order
//!
//! Secure traffic first (a queued nonce item implies its target just spoke
//! to us, so it is awake), then the first standard transaction whose target
//! is awake, then controller-addressed traffic. A continuously refilled
//! secure queue can starve the controller queue; that starvation is
//! accepted and not bounded.

use crate::queue::TxQueue;
use crate::timer::{spawn_scheduler, TimerCtl};
use crate::transaction::{Transaction, TransactionEvent};
use crate::{
    EnqueueError, ManagerConfig, Outcome, SendFuture, TransactionId, TransactionPayload,
    TransactionState,
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};
use zw_network::{LogicalCommand, NodeDirectory, NodeId, Transport};

// ============================================================================
// Listeners
// ============================================================================

/// Handle for deregistering a completion listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ListenerFn = Arc<dyn Fn(&TransactionEvent) + Send + Sync>;
type ListenerTable = Arc<Mutex<Vec<(ListenerId, ListenerFn)>>>;

// ============================================================================
// Worker Messages
// ============================================================================

/// Messages for the receive correlator thread.
enum InboundMsg {
    /// A raw payload demultiplexed to its sending node by the transport.
    Payload(NodeId, Vec<u8>),
    /// Stop the thread.
    Shutdown,
}

/// Messages for the notifier thread.
enum NotifyMsg {
    Event(TransactionEvent),
    Shutdown,
}

// ============================================================================
// Manager State (single lock domain)
// ============================================================================

/// Everything the dispatcher, correlator and scheduler mutate, guarded by
/// one mutex so gate checks, queue pops and outstanding-set updates are
/// atomic with respect to each other.
struct ManagerState {
    /// Nonce requests and unblocked secure sends; drained first, never
    /// sleep-gated.
    secure_queue: TxQueue,
    /// Ordinary device transactions; sleep-gated per entry.
    send_queue: TxQueue,
    /// Transactions addressed to the controller itself; never sleep-gated.
    controller_queue: TxQueue,
    /// Dispatched but not yet terminal.
    outstanding: Vec<Transaction>,
    /// The single-slot transport-write gate.
    in_flight: Option<TransactionId>,
    next_id: u64,
    next_seq: u64,
    shutdown: bool,
}

impl ManagerState {
    fn new() -> Self {
        ManagerState {
            secure_queue: TxQueue::new(),
            send_queue: TxQueue::new(),
            controller_queue: TxQueue::new(),
            outstanding: Vec::new(),
            in_flight: None,
            next_id: 1,
            next_seq: 0,
            shutdown: false,
        }
    }

    fn allocate_id(&mut self) -> TransactionId {
        let id = TransactionId(self.next_id);
        self.next_id += 1;
        id
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

// ============================================================================
// Inner (shared with worker threads)
// ============================================================================

struct Inner {
    config: ManagerConfig,
    directory: Arc<dyn NodeDirectory>,
    transport: Arc<dyn Transport>,
    state: Mutex<ManagerState>,
    listeners: ListenerTable,
    next_listener_id: AtomicU64,
    inbound_tx: Sender<InboundMsg>,
    timer_tx: Sender<TimerCtl>,
    notify_tx: Sender<NotifyMsg>,
}

impl Inner {
    /// Earliest deadline across the outstanding set, for rearming the timer.
    fn next_deadline(state: &ManagerState) -> Option<Instant> {
        state.outstanding.iter().filter_map(|t| t.deadline).min()
    }

    /// Emit collected completion events and rearm the timer. Always called
    /// after the state lock is released; listeners never run under it.
    fn finish(&self, events: Vec<TransactionEvent>, deadline: Option<Instant>) {
        for event in events {
            let _ = self.notify_tx.send(NotifyMsg::Event(event));
        }
        let _ = self.timer_tx.send(TimerCtl::Rearm(deadline));
    }

    fn add_listener(&self, listener: ListenerFn) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    // ------------------------------------------------------------------
    // Dispatcher
    // ------------------------------------------------------------------

    /// Send the next eligible queued transaction, if the gate is free.
    ///
    /// Runs to a fixed point: parking a security-required candidate behind
    /// a synthesized nonce request re-enters candidate selection, as does
    /// rejecting a candidate whose target has no security support.
    fn try_dispatch_next(&self, state: &mut ManagerState, events: &mut Vec<TransactionEvent>) {
        loop {
            if state.in_flight.is_some() {
                return;
            }

            let candidate = state
                .secure_queue
                .pop()
                .or_else(|| state.send_queue.pop_awake(&*self.directory))
                .or_else(|| state.controller_queue.pop());
            let Some(mut tx) = candidate else {
                trace!("dispatch: nothing eligible to send");
                return;
            };

            let mut wire = tx.payload.clone();
            if tx.requires_security {
                let Some(security) = self.directory.security(tx.target()) else {
                    warn!(
                        "{}: security required but target has no security support, rejecting {}",
                        tx.target(),
                        tx.id()
                    );
                    tx.advance(TransactionState::Cancelled);
                    events.push(TransactionEvent {
                        id: tx.id(),
                        target: tx.target(),
                        outcome: Outcome::SecurityUnavailable,
                    });
                    continue;
                };
                if security.nonce_available() {
                    debug!("{}: nonce cached, encapsulating {}", tx.target(), tx.id());
                    wire = security.encapsulate(&tx.payload);
                } else {
                    // Park the candidate inside a synthesized nonce request;
                    // it is unqueued and referenced only through the link
                    // until the nonce report arrives.
                    let id = state.allocate_id();
                    let seq = state.allocate_seq();
                    debug!(
                        "{}: no nonce cached, synthesizing nonce request {} for {}",
                        tx.target(),
                        id,
                        tx.id()
                    );
                    let nonce = Transaction::nonce_request(
                        id,
                        seq,
                        security.nonce_request_payload(),
                        security.nonce_report_key(),
                        tx,
                        &self.config,
                    );
                    state.secure_queue.insert(nonce);
                    continue;
                }
            }

            tx.advance(TransactionState::WaitResponse);
            tx.recompute_deadline(Instant::now(), &self.config);
            debug!(
                "{}: dispatching {} ({} bytes, priority {})",
                tx.target(),
                tx.id(),
                wire.len(),
                tx.priority()
            );
            trace!("{}: payload {}", tx.id(), hex::encode(&wire));
            self.transport.write(&wire);
            state.in_flight = Some(tx.id());
            state.outstanding.push(tx);
            return;
        }
    }

    /// Dispatch and rearm outside any other operation (quiescent advance).
    fn dispatch_and_rearm(&self) {
        let mut events = Vec::new();
        let deadline;
        {
            let mut state = self.state.lock();
            self.try_dispatch_next(&mut state, &mut events);
            deadline = Self::next_deadline(&state);
        }
        self.finish(events, deadline);
    }

    // ------------------------------------------------------------------
    // Terminal bookkeeping
    // ------------------------------------------------------------------

    /// Remove `outstanding[idx]`, clear the gate if it held it, record the
    /// terminal state and queue the completion event. A successful nonce
    /// request releases its linked transaction onto the secure queue; a
    /// failed one fails the linked transaction as well.
    fn finalize_outstanding(
        &self,
        state: &mut ManagerState,
        idx: usize,
        final_state: TransactionState,
        outcome: Outcome,
        events: &mut Vec<TransactionEvent>,
    ) {
        let mut tx = state.outstanding.remove(idx);
        if state.in_flight == Some(tx.id()) {
            state.in_flight = None;
        }
        tx.deadline = None;
        tx.advance(final_state);
        debug!("{}: {} finished with {:?}", tx.target(), tx.id(), outcome);
        events.push(TransactionEvent { id: tx.id(), target: tx.target(), outcome });

        if final_state == TransactionState::Done {
            if let Some(linked) = tx.take_linked() {
                debug!(
                    "{}: nonce received, releasing linked {} for encapsulated send",
                    linked.target(),
                    linked.id()
                );
                state.secure_queue.insert(linked);
            }
        } else {
            self.fail_linked(&mut tx, events);
        }
    }

    /// Fail the linked transaction of a failed nonce request. It was never
    /// queued, so reporting it is all that is needed; the application owns
    /// any retry.
    fn fail_linked(&self, tx: &mut Transaction, events: &mut Vec<TransactionEvent>) {
        if let Some(mut linked) = tx.take_linked() {
            warn!(
                "{}: nonce request {} failed, failing linked {}",
                linked.target(),
                tx.id(),
                linked.id()
            );
            linked.advance(TransactionState::Cancelled);
            events.push(TransactionEvent {
                id: linked.id(),
                target: linked.target(),
                outcome: Outcome::Cancelled,
            });
        }
    }

    // ------------------------------------------------------------------
    // Enqueue
    // ------------------------------------------------------------------

    fn reserve_id(&self) -> Result<TransactionId, EnqueueError> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(EnqueueError::ShutDown);
        }
        Ok(state.allocate_id())
    }

    fn enqueue_payload(
        &self,
        payload: TransactionPayload,
        reserved: Option<TransactionId>,
        force_secure_queue: bool,
    ) -> Result<TransactionId, EnqueueError> {
        if payload.payload.is_empty() {
            return Err(EnqueueError::EmptyPayload);
        }

        let mut events = Vec::new();
        let deadline;
        let id;
        {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(EnqueueError::ShutDown);
            }
            id = match reserved {
                Some(id) => id,
                None => state.allocate_id(),
            };
            let seq = state.allocate_seq();
            let tx = Transaction::new(id, seq, payload, &self.config);
            debug!("{}: queued {} (priority {})", tx.target(), tx.id(), tx.priority());
            if force_secure_queue {
                state.secure_queue.insert(tx);
            } else if tx.target().is_controller() {
                state.controller_queue.insert(tx);
            } else {
                state.send_queue.insert(tx);
            }
            self.try_dispatch_next(&mut state, &mut events);
            deadline = Self::next_deadline(&state);
        }
        self.finish(events, deadline);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Phase advance (transport acceptance, device acknowledgment)
    // ------------------------------------------------------------------

    fn process_controller_response(&self, accepted: bool) {
        let mut events = Vec::new();
        let deadline;
        {
            let mut state = self.state.lock();
            let idx = state
                .in_flight
                .and_then(|id| state.outstanding.iter().position(|t| t.id() == id));
            let Some(idx) = idx else {
                trace!("controller response with nothing in flight, ignoring");
                return;
            };
            match state.outstanding[idx].state() {
                TransactionState::WaitResponse if accepted => {
                    let tx = &mut state.outstanding[idx];
                    trace!("{}: {} accepted by controller", tx.target(), tx.id());
                    tx.advance(TransactionState::WaitRequest);
                    tx.recompute_deadline(Instant::now(), &self.config);
                }
                TransactionState::WaitResponse => {
                    warn!("{}: rejected by controller", state.outstanding[idx].id());
                    self.finalize_outstanding(
                        &mut state,
                        idx,
                        TransactionState::Cancelled,
                        Outcome::Cancelled,
                        &mut events,
                    );
                    self.try_dispatch_next(&mut state, &mut events);
                }
                TransactionState::Aborted => {
                    // The response answers the abort; the exchange is over.
                    let outcome = state.outstanding[idx].timeout_outcome();
                    self.finalize_outstanding(
                        &mut state,
                        idx,
                        TransactionState::Cancelled,
                        outcome,
                        &mut events,
                    );
                    self.try_dispatch_next(&mut state, &mut events);
                }
                other => {
                    trace!("controller response ignored in state {:?}", other);
                }
            }
            deadline = Self::next_deadline(&state);
        }
        self.finish(events, deadline);
    }

    fn process_device_ack(&self, delivered: bool) {
        let mut events = Vec::new();
        let deadline;
        {
            let mut state = self.state.lock();
            let idx = state
                .in_flight
                .and_then(|id| state.outstanding.iter().position(|t| t.id() == id));
            let Some(idx) = idx else {
                trace!("device ack with nothing in flight, ignoring");
                return;
            };
            match state.outstanding[idx].state() {
                TransactionState::WaitRequest if delivered => {
                    if state.outstanding[idx].expected_reply.is_some() {
                        let tx = &mut state.outstanding[idx];
                        trace!("{}: {} delivered, awaiting reply", tx.target(), tx.id());
                        tx.advance(TransactionState::WaitData);
                        tx.recompute_deadline(Instant::now(), &self.config);
                    } else {
                        // Fire-and-forget: delivery is completion.
                        self.finalize_outstanding(
                            &mut state,
                            idx,
                            TransactionState::Done,
                            Outcome::Complete,
                            &mut events,
                        );
                        self.try_dispatch_next(&mut state, &mut events);
                    }
                }
                TransactionState::WaitRequest => {
                    warn!("{}: delivery failed", state.outstanding[idx].id());
                    self.finalize_outstanding(
                        &mut state,
                        idx,
                        TransactionState::Cancelled,
                        Outcome::Cancelled,
                        &mut events,
                    );
                    self.try_dispatch_next(&mut state, &mut events);
                }
                TransactionState::Aborted => {
                    let outcome = state.outstanding[idx].timeout_outcome();
                    self.finalize_outstanding(
                        &mut state,
                        idx,
                        TransactionState::Cancelled,
                        outcome,
                        &mut events,
                    );
                    self.try_dispatch_next(&mut state, &mut events);
                }
                other => {
                    trace!("device ack ignored in state {:?}", other);
                }
            }
            deadline = Self::next_deadline(&state);
        }
        self.finish(events, deadline);
    }

    // ------------------------------------------------------------------
    // Timeout handling (runs on the scheduler thread)
    // ------------------------------------------------------------------

    fn handle_timeout(&self) {
        let mut events = Vec::new();
        let deadline;
        {
            let mut state = self.state.lock();
            let now = Instant::now();
            let mut idx = 0;
            while idx < state.outstanding.len() {
                if !state.outstanding[idx].expired(now) {
                    idx += 1;
                    continue;
                }
                let phase = state.outstanding[idx].state();
                match phase {
                    TransactionState::WaitResponse | TransactionState::WaitRequest => {
                        if state.outstanding[idx].attempts_remaining > 1 {
                            // Retry: back to its queue at the original
                            // priority, fresh insertion order, same id.
                            let mut tx = state.outstanding.remove(idx);
                            if state.in_flight == Some(tx.id()) {
                                state.in_flight = None;
                            }
                            tx.attempts_remaining -= 1;
                            debug!(
                                "{}: {} timed out in {:?}, retrying ({} attempts left)",
                                tx.target(),
                                tx.id(),
                                phase,
                                tx.attempts_remaining
                            );
                            let seq = state.allocate_seq();
                            tx.reset_for_retry(seq);
                            if tx.is_nonce_request() {
                                state.secure_queue.insert(tx);
                            } else if tx.target().is_controller() {
                                state.controller_queue.insert(tx);
                            } else {
                                state.send_queue.insert(tx);
                            }
                        } else {
                            // Abort the exchange but keep the transaction
                            // around for its grace period; the device may
                            // still answer the abort.
                            let tx = &mut state.outstanding[idx];
                            warn!(
                                "{}: {} timed out in {:?}, aborting",
                                tx.target(),
                                tx.id(),
                                phase
                            );
                            tx.mark_timed_out(now, &self.config);
                            self.transport.send_abort();
                            idx += 1;
                        }
                    }
                    TransactionState::Aborted | TransactionState::WaitData => {
                        let outcome = {
                            let tx = &mut state.outstanding[idx];
                            if phase == TransactionState::WaitData {
                                tx.timed_out_in = Some(TransactionState::WaitData);
                            }
                            tx.timeout_outcome()
                        };
                        self.finalize_outstanding(
                            &mut state,
                            idx,
                            TransactionState::Cancelled,
                            outcome,
                            &mut events,
                        );
                    }
                    _ => {
                        idx += 1;
                    }
                }
            }
            self.try_dispatch_next(&mut state, &mut events);
            deadline = Self::next_deadline(&state);
        }
        self.finish(events, deadline);
    }

    // ------------------------------------------------------------------
    // Receive correlation (runs on the correlator thread)
    // ------------------------------------------------------------------

    fn handle_inbound(&self, node: NodeId, raw: &[u8]) {
        if !self.directory.node_exists(node) {
            warn!("{}: unknown sender, dropping {} byte payload", node, raw.len());
            return;
        }
        let commands = self.directory.interpret(node, raw);
        trace!("{}: {} logical command(s) decoded", node, commands.len());
        for command in &commands {
            self.correlate(node, command);
        }
    }

    /// Advance the first outstanding transaction awaiting this command.
    /// At most one transaction is advanced per inbound command.
    fn correlate(&self, node: NodeId, command: &LogicalCommand) {
        let mut events = Vec::new();
        let deadline;
        {
            let mut state = self.state.lock();
            let Some(idx) = state.outstanding.iter().position(|t| t.matches_reply(node, command))
            else {
                trace!("{}: no outstanding transaction awaits {}", node, command.key());
                return;
            };
            debug!(
                "{}: {} satisfies {}",
                node,
                command.key(),
                state.outstanding[idx].id()
            );
            self.finalize_outstanding(
                &mut state,
                idx,
                TransactionState::Done,
                Outcome::Complete,
                &mut events,
            );
            deadline = Self::next_deadline(&state);
        }
        self.finish(events, deadline);
    }
}

// ============================================================================
// Worker loops
// ============================================================================

fn run_correlator(inner: Weak<Inner>, inbound: Receiver<InboundMsg>) {
    loop {
        if inbound.is_empty() {
            // Quiescent: advance the queue and rearm before blocking. This
            // is also how a freshly woken node's traffic gets dispatched
            // without waiting for another caller.
            match inner.upgrade() {
                Some(inner) => inner.dispatch_and_rearm(),
                None => return,
            }
        }
        match inbound.recv() {
            Ok(InboundMsg::Payload(node, raw)) => match inner.upgrade() {
                Some(inner) => inner.handle_inbound(node, &raw),
                None => return,
            },
            Ok(InboundMsg::Shutdown) | Err(_) => return,
        }
    }
}

fn run_notifier(listeners: ListenerTable, notify: Receiver<NotifyMsg>) {
    while let Ok(msg) = notify.recv() {
        match msg {
            NotifyMsg::Event(event) => {
                // Snapshot so listener callbacks run without the table lock;
                // a callback may register or remove listeners.
                let snapshot: Vec<ListenerFn> =
                    listeners.lock().iter().map(|(_, f)| Arc::clone(f)).collect();
                for listener in snapshot {
                    listener(&event);
                }
            }
            NotifyMsg::Shutdown => return,
        }
    }
}

// ============================================================================
// Public facade
// ============================================================================

/// Coordinates command/response transactions over the single serial
/// transport.
///
/// See the [module docs](self) for the architecture. All methods are callable
/// from any thread.
pub struct TransactionManager {
    inner: Arc<Inner>,
    correlator: Option<JoinHandle<()>>,
    timer: Option<JoinHandle<()>>,
    notifier: Option<JoinHandle<()>>,
}

impl TransactionManager {
    /// Start a manager over `transport`, resolving nodes through
    /// `directory`. Spawns the correlator, scheduler and notifier threads;
    /// call [`shutdown`](TransactionManager::shutdown) to tear them down.
    pub fn new(
        directory: Arc<dyn NodeDirectory>,
        transport: Arc<dyn Transport>,
        config: ManagerConfig,
    ) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        let (timer_tx, timer_rx) = unbounded();
        let (notify_tx, notify_rx) = unbounded();
        let listeners: ListenerTable = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::new(Inner {
            config,
            directory,
            transport,
            state: Mutex::new(ManagerState::new()),
            listeners: Arc::clone(&listeners),
            next_listener_id: AtomicU64::new(0),
            inbound_tx,
            timer_tx,
            notify_tx,
        });

        let correlator = {
            let inner = Arc::downgrade(&inner);
            thread::Builder::new()
                .name("zw-txn-correlator".to_string())
                .spawn(move || run_correlator(inner, inbound_rx))
                .expect("failed to spawn receive correlator thread")
        };

        let timer = {
            let inner = Arc::downgrade(&inner);
            spawn_scheduler(timer_rx, move || {
                if let Some(inner) = inner.upgrade() {
                    inner.handle_timeout();
                }
            })
        };

        let notifier = thread::Builder::new()
            .name("zw-txn-notifier".to_string())
            .spawn(move || run_notifier(listeners, notify_rx))
            .expect("failed to spawn notifier thread");

        TransactionManager {
            inner,
            correlator: Some(correlator),
            timer: Some(timer),
            notifier: Some(notifier),
        }
    }

    /// Queue a transaction for sending. Returns its assigned id; the
    /// outcome is delivered through listeners.
    pub fn enqueue(&self, payload: TransactionPayload) -> Result<TransactionId, EnqueueError> {
        self.inner.enqueue_payload(payload, None, false)
    }

    /// Queue a transaction directly onto the secure queue, bypassing the
    /// sleep-gated standard path. Intended for replies to a nonce request
    /// the device just sent: it is certainly awake.
    pub fn enqueue_secure(
        &self,
        payload: TransactionPayload,
    ) -> Result<TransactionId, EnqueueError> {
        self.inner.enqueue_payload(payload, None, true)
    }

    /// Queue a transaction and return a future resolving to its outcome.
    ///
    /// The completion listener is registered before the transaction is
    /// enqueued, so a completion racing the enqueue cannot be missed.
    pub fn send_async(&self, payload: TransactionPayload) -> Result<SendFuture, EnqueueError> {
        if payload.payload.is_empty() {
            return Err(EnqueueError::EmptyPayload);
        }
        let id = self.inner.reserve_id()?;
        let (outcome_tx, outcome_rx) = bounded(1);
        let listener_id = self.inner.add_listener(Arc::new(move |event: &TransactionEvent| {
            if event.id == id {
                let _ = outcome_tx.try_send(event.outcome);
            }
        }));
        let cleanup = {
            let inner = Arc::downgrade(&self.inner);
            Box::new(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.remove_listener(listener_id);
                }
            })
        };
        match self.inner.enqueue_payload(payload, Some(id), false) {
            Ok(_) => Ok(SendFuture::new(id, outcome_rx, cleanup)),
            Err(e) => {
                self.inner.remove_listener(listener_id);
                Err(e)
            }
        }
    }

    /// Queue a transaction and block the calling thread until it reaches a
    /// terminal state.
    pub fn send(&self, payload: TransactionPayload) -> Result<Outcome, EnqueueError> {
        let mut future = self.send_async(payload)?;
        Ok(future.wait())
    }

    /// Register a completion listener; fired once per terminal transaction,
    /// on the notifier thread.
    pub fn add_listener(
        &self,
        listener: impl Fn(&TransactionEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.add_listener(Arc::new(listener))
    }

    /// Deregister a completion listener.
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.remove_listener(id);
    }

    /// Number of transactions queued or outstanding for `node`. The
    /// controller sentinel counts only the controller queue.
    pub fn pending_count(&self, node: NodeId) -> usize {
        let state = self.inner.state.lock();
        if node.is_controller() {
            state.controller_queue.count_for(node)
        } else {
            state.secure_queue.count_for(node)
                + state.send_queue.count_for(node)
                + state.controller_queue.count_for(node)
                + state.outstanding.iter().filter(|t| t.target() == node).count()
        }
    }

    /// Empty all three queues. Outstanding transactions are untouched: an
    /// in-flight or reply-awaiting transaction still completes or times
    /// out normally.
    pub fn clear_pending(&self) {
        let mut state = self.inner.state.lock();
        let dropped =
            state.secure_queue.len() + state.send_queue.len() + state.controller_queue.len();
        state.secure_queue.clear();
        state.send_queue.clear();
        state.controller_queue.clear();
        debug!("cleared {} pending transaction(s)", dropped);
    }

    /// Try to send the next eligible queued transaction. Call after an
    /// external state change the manager cannot observe, e.g. a node
    /// reported awake by the directory.
    pub fn try_dispatch(&self) {
        self.inner.dispatch_and_rearm();
    }

    /// Deliver a raw inbound payload from `node` to the correlator queue.
    /// Called by the transport owner; returns immediately.
    pub fn process_inbound(&self, node: NodeId, raw: Vec<u8>) {
        let _ = self.inner.inbound_tx.send(InboundMsg::Payload(node, raw));
    }

    /// Transport-level acceptance (or rejection) of the in-flight
    /// transaction. Advances `WaitResponse → WaitRequest`.
    pub fn process_controller_response(&self, accepted: bool) {
        self.inner.process_controller_response(accepted);
    }

    /// Device-level acknowledgment (or delivery failure) of the in-flight
    /// transaction. Advances `WaitRequest → WaitData`, or completes a
    /// fire-and-forget transaction.
    pub fn process_device_ack(&self, delivered: bool) {
        self.inner.process_device_ack(delivered);
    }

    /// Stop accepting transactions, stop the worker threads and join them.
    pub fn shutdown(mut self) {
        self.inner.state.lock().shutdown = true;
        let _ = self.inner.inbound_tx.send(InboundMsg::Shutdown);
        let _ = self.inner.timer_tx.send(TimerCtl::Shutdown);
        let _ = self.inner.notify_tx.send(NotifyMsg::Shutdown);
        for handle in [
            self.correlator.take(),
            self.timer.take(),
            self.notifier.take(),
        ]
        .into_iter()
        .flatten()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        // Signal the workers without joining; they also exit on channel
        // disconnect once the inner state is dropped.
        self.inner.state.lock().shutdown = true;
        let _ = self.inner.inbound_tx.send(InboundMsg::Shutdown);
        let _ = self.inner.timer_tx.send(TimerCtl::Shutdown);
        let _ = self.inner.notify_tx.send(NotifyMsg::Shutdown);
    }
}
