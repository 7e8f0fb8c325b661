//! Order snapshot - full state at a given version
//!
//! Snapshots are the reconciliation backstop: clients treat them as
//! authoritative and overwrite local state regardless of the version they
//! were tracking.

use super::model::Order;
use serde::{Deserialize, Serialize};

/// Full-state snapshot message
///
/// Wire contract: `{orderId, version, fullOrderState}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Order ID
    pub order_id: String,
    /// Order version this snapshot represents
    pub version: u64,
    /// The complete order state
    pub full_order_state: Order,
    /// Server timestamp when the snapshot was taken (Unix millis)
    pub taken_at: i64,
}

impl Snapshot {
    /// Snapshot the current state of an order
    pub fn of(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            version: order.version,
            full_order_state: order.clone(),
            taken_at: crate::util::now_millis(),
        }
    }
}
