//! Shared types for the order synchronization engine
//!
//! Types in this crate cross the wire between the sync server and its
//! clients (customer apps, waiter terminals, table-status displays):
//! the order model, versioned deltas and snapshots, topic addressing,
//! and the client/server protocol messages.

pub mod client;
pub mod message;
pub mod order;
pub mod topic;
pub mod util;

// Re-exports
pub use serde::{Deserialize, Serialize};

// Protocol re-exports (for convenient access)
pub use message::{ClientIdentity, ClientMessage, ServerMessage, PROTOCOL_VERSION};
pub use order::{Delta, DeltaKind, DeltaPayload, Order, OrderStatus, Snapshot};
pub use topic::Topic;
