//! Transaction priority levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dispatch priority of a transaction.
///
/// Lower levels dispatch first; within one level transactions are released
/// in enqueue order. The levels form a closed set:
///
/// - [`RealTime`](TransactionPriority::RealTime): security traffic (nonce
///   requests, re-wrapped encapsulated sends) that must go out while the
///   peer's nonce is still fresh.
/// - [`Immediate`](TransactionPriority::Immediate): user-visible urgent
///   commands.
/// - [`High`](TransactionPriority::High): responses to device-initiated
///   exchanges.
/// - [`Get`](TransactionPriority::Get) / [`Set`](TransactionPriority::Set):
///   ordinary state reads and writes.
/// - [`Config`](TransactionPriority::Config): device configuration.
/// - [`Poll`](TransactionPriority::Poll): background polling, always last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum TransactionPriority {
    /// Security-critical traffic, dispatched before everything else.
    RealTime,
    /// Urgent user commands.
    Immediate,
    /// Replies to device-initiated exchanges.
    High,
    /// State queries.
    #[default]
    Get,
    /// State changes.
    Set,
    /// Configuration traffic.
    Config,
    /// Background polling.
    Poll,
}

impl fmt::Display for TransactionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionPriority::RealTime => "RealTime",
            TransactionPriority::Immediate => "Immediate",
            TransactionPriority::High => "High",
            TransactionPriority::Get => "Get",
            TransactionPriority::Set => "Set",
            TransactionPriority::Config => "Config",
            TransactionPriority::Poll => "Poll",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_total_order() {
        use TransactionPriority::*;
        let levels = [RealTime, Immediate, High, Get, Set, Config, Poll];
        for pair in levels.windows(2) {
            assert!(pair[0] < pair[1], "{} should outrank {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_realtime_outranks_all() {
        assert!(TransactionPriority::RealTime < TransactionPriority::Poll);
        assert!(TransactionPriority::RealTime < TransactionPriority::Get);
    }

    #[test]
    fn test_default_is_get() {
        assert_eq!(TransactionPriority::default(), TransactionPriority::Get);
    }
}
