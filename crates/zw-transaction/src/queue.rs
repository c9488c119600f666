//! Ordered transaction queue.
//!
//! Backs each of the manager's three queues (secure, standard, controller).
//! Entries are kept sorted by `(priority, insertion order)`, which gives:
//!
//! - priority dispatch with stable FIFO within one priority level,
//! - in-order scanning so entries for sleeping nodes can be skipped in
//!   place without losing their position, and
//! - positional removal for duplicate-replace on enqueue.
//!
//! A binary heap can't do the middle two, hence the sorted `Vec`.

use crate::transaction::Transaction;
use zw_network::{NodeDirectory, NodeId};

/// A priority-ordered transaction queue.
#[derive(Debug, Default)]
pub(crate) struct TxQueue {
    entries: Vec<Transaction>,
}

impl TxQueue {
    pub(crate) fn new() -> Self {
        TxQueue { entries: Vec::new() }
    }

    /// Insert a transaction at its priority position.
    ///
    /// If an equal transaction (same target, same payload) is already
    /// queued, the stale entry is removed first: last writer wins and the
    /// queue length is unchanged by the replace. The superseded instance is
    /// dropped silently.
    pub(crate) fn insert(&mut self, tx: Transaction) {
        if let Some(stale) = self.entries.iter().position(|e| e.duplicate_of(&tx)) {
            tracing::debug!(
                "{}: duplicate transaction queued, superseding {}",
                tx.target(),
                self.entries[stale].id()
            );
            self.entries.remove(stale);
        }
        let key = tx.sort_key();
        let pos = self.entries.partition_point(|e| e.sort_key() <= key);
        self.entries.insert(pos, tx);
    }

    /// Remove and return the head transaction.
    pub(crate) fn pop(&mut self) -> Option<Transaction> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    /// Remove and return the first transaction whose target is known and
    /// awake. Entries for sleeping or unknown nodes are skipped in place,
    /// keeping their position for a later pass.
    pub(crate) fn pop_awake(&mut self, directory: &dyn NodeDirectory) -> Option<Transaction> {
        let pos = self.entries.iter().position(|e| {
            let node = e.target();
            if !directory.node_exists(node) {
                tracing::debug!("{}: not in directory, skipping queued transaction", node);
                return false;
            }
            if !directory.is_awake(node) {
                tracing::trace!("{}: asleep, skipping queued transaction", node);
                return false;
            }
            true
        })?;
        Some(self.entries.remove(pos))
    }

    /// Number of queued transactions addressed to `node`.
    pub(crate) fn count_for(&self, node: NodeId) -> usize {
        self.entries.iter().filter(|e| e.target() == node).count()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
