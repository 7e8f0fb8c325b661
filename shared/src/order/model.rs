//! Order aggregate - the authoritative state a table's parties converge on
//!
//! The `version` field is the unit of ordering and conflict detection:
//! it increases by exactly 1 per committed mutation, and every delta is
//! tagged with the version it produced.

use super::types::{DishLine, OrderStatus, Participant, PaymentStatus, WaiterRef};
use serde::{Deserialize, Serialize};

/// Live order state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Order ID (assigned by server)
    pub order_id: String,
    /// Restaurant this order belongs to (routing scope for broadcasts)
    pub restaurant_id: String,
    /// Table ID
    pub table_id: String,
    /// Table display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Monotonic version counter; starts at 0 on creation
    pub version: u64,
    /// Assigned waiter, if any; None routes deltas to the restaurant broadcast
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_waiter: Option<WaiterRef>,
    /// Ordered dish lines
    pub dishes: Vec<DishLine>,
    /// Customers participating in this order
    pub participants: Vec<Participant>,
    /// Payment progress
    pub payment_status: PaymentStatus,
    /// Creation timestamp (Unix millis)
    pub created_at: i64,
    /// Last mutation timestamp
    pub updated_at: i64,
}

impl Order {
    /// Create a fresh order at version 0 (first action at a table)
    pub fn open(
        restaurant_id: impl Into<String>,
        table_id: impl Into<String>,
        table_name: Option<String>,
    ) -> Self {
        let now = crate::util::now_millis();
        Self {
            order_id: crate::util::new_id(),
            restaurant_id: restaurant_id.into(),
            table_id: table_id.into(),
            table_name,
            status: OrderStatus::Active,
            version: 0,
            assigned_waiter: None,
            dishes: Vec::new(),
            participants: Vec::new(),
            payment_status: PaymentStatus::Unpaid,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if order is still accepting mutations
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Find a dish line by its line ID
    pub fn dish_line(&self, line_id: &str) -> Option<&DishLine> {
        self.dishes.iter().find(|d| d.line_id == line_id)
    }

    /// Find a dish line mutably
    pub fn dish_line_mut(&mut self, line_id: &str) -> Option<&mut DishLine> {
        self.dishes.iter_mut().find(|d| d.line_id == line_id)
    }

    /// Check whether a participant is part of this order
    pub fn has_participant(&self, participant_id: &str) -> bool {
        self.participants
            .iter()
            .any(|p| p.participant_id == participant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_order_starts_at_version_zero() {
        let order = Order::open("rest-1", "table-7", Some("Terraza 2".to_string()));
        assert_eq!(order.version, 0);
        assert_eq!(order.status, OrderStatus::Active);
        assert!(order.dishes.is_empty());
        assert!(order.assigned_waiter.is_none());
        assert!(order.is_open());
    }

    #[test]
    fn test_terminal_status_closes_order() {
        let mut order = Order::open("rest-1", "table-7", None);
        order.status = OrderStatus::Completed;
        assert!(!order.is_open());
    }
}
