//! Node addressing and logical command types.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Node Addressing
// ============================================================================

/// Address of a device on the network.
///
/// Node 255 is reserved for the controller itself: transactions addressed to
/// it bypass the device-sleep checks in the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u8);

impl NodeId {
    /// Sentinel address for transactions aimed at the controller itself.
    pub const CONTROLLER: NodeId = NodeId(255);

    /// Whether this is the controller sentinel address.
    pub fn is_controller(&self) -> bool {
        *self == NodeId::CONTROLLER
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_controller() {
            write!(f, "controller")
        } else {
            write!(f, "node {}", self.0)
        }
    }
}

// ============================================================================
// Logical Commands
// ============================================================================

/// The `(command class, command)` pair identifying a command type.
///
/// Used by the transaction manager to correlate an inbound command with the
/// transaction that expects it as a reply. The manager compares keys only; it
/// never looks at command fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplyKey {
    /// Command class identifier.
    pub command_class: u8,
    /// Command identifier within the class.
    pub command: u8,
}

impl ReplyKey {
    /// Create a reply key.
    pub fn new(command_class: u8, command: u8) -> Self {
        ReplyKey { command_class, command }
    }
}

impl fmt::Display for ReplyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}:{:02X}", self.command_class, self.command)
    }
}

/// One logical command decoded from an inbound payload.
///
/// Produced by the codec layer (via [`NodeDirectory::interpret`]); a single
/// raw payload may decode to zero or more of these (e.g. multi-command
/// encapsulation).
///
/// [`NodeDirectory::interpret`]: crate::NodeDirectory::interpret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalCommand {
    /// Command class identifier.
    pub command_class: u8,
    /// Command identifier within the class.
    pub command: u8,
    /// Undecoded command data, opaque to the transaction layer.
    pub data: Vec<u8>,
}

impl LogicalCommand {
    /// Create a logical command.
    pub fn new(command_class: u8, command: u8, data: Vec<u8>) -> Self {
        LogicalCommand { command_class, command, data }
    }

    /// The reply key this command would satisfy.
    pub fn key(&self) -> ReplyKey {
        ReplyKey::new(self.command_class, self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_sentinel() {
        assert!(NodeId::CONTROLLER.is_controller());
        assert!(!NodeId(5).is_controller());
        assert_eq!(NodeId::CONTROLLER, NodeId(255));
    }

    #[test]
    fn test_node_display() {
        assert_eq!(NodeId(7).to_string(), "node 7");
        assert_eq!(NodeId::CONTROLLER.to_string(), "controller");
    }

    #[test]
    fn test_command_key() {
        let cmd = LogicalCommand::new(0x25, 0x03, vec![0xFF]);
        assert_eq!(cmd.key(), ReplyKey::new(0x25, 0x03));
        assert_eq!(cmd.key().to_string(), "25:03");
    }
}
