//! Shared vocabulary for the Z-Wave transaction layer.
//!
//! This crate holds the types that cross the boundary between the
//! transaction manager and its collaborators: node addressing, the logical
//! command shape produced by the codec layer, and the traits the manager
//! consumes (node directory, security handshake, serial transport).
//!
//! The transaction manager itself lives in the `zw-transaction` crate. It
//! never interprets command payload bytes beyond the `(command class,
//! command)` pair needed for reply correlation; everything payload-shaped in
//! here is opaque.

mod traits;
mod types;

pub use traits::*;
pub use types::*;
