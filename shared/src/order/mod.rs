//! Order Synchronization Model
//!
//! This module provides the types the sync engine revolves around:
//! - Order: the authoritative aggregate with its version counter
//! - Deltas: minimal, versioned descriptions of one change
//! - Snapshots: full-state representations used for reconciliation

pub mod delta;
pub mod model;
pub mod snapshot;
pub mod types;

// Re-exports
pub use delta::{Delta, DeltaKind, DeltaPayload, DishChanges};
pub use model::Order;
pub use snapshot::Snapshot;
pub use types::*;
