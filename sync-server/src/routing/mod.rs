//! Topic Router - who sees which deltas
//!
//! Destination resolution is a pure function of current order state, not a
//! stored routing table: there is nothing to drift, and a WAITER_ASSIGNED
//! delta needs no explicit "unassign" propagation - the next delta simply
//! resolves against the assigned waiter. The caller always passes the order
//! state at the version the delta produced, never a stale read.

use shared::order::Order;
use shared::topic::Topic;

/// Resolve the destination topics for one delta of `order`
///
/// Rules:
/// - always the order's own topic (customers, table display);
/// - plus the assigned waiter's personal topic, when assigned;
/// - otherwise the restaurant broadcast topic - never both.
pub fn resolve_destinations(order: &Order) -> Vec<Topic> {
    let mut destinations = vec![Topic::order(&order.order_id)];

    match &order.assigned_waiter {
        Some(waiter) => destinations.push(Topic::waiter(&waiter.waiter_id)),
        None => destinations.push(Topic::restaurant_broadcast(&order.restaurant_id)),
    }

    destinations
}
