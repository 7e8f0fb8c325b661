//! Delta Producer - turns mutation requests into committed, versioned deltas
//!
//! # Mutation flow
//!
//! ```text
//! request_mutation(order_id, actor, intent)
//!     ├─ 1. Read the freshest version
//!     ├─ 2. compare_and_apply against it (intent reapplied on the copy)
//!     ├─ 3. Conflict? -> re-read and retry (bounded budget)
//!     └─ 4. Budget exhausted -> ConcurrentModification to the caller
//! ```
//!
//! Exactly one delta is produced per committed mutation, tagged with the
//! version the store returned; per order, deltas leave the store in
//! strictly increasing version order.

use std::sync::Arc;

use shared::order::{ActorIdentity, Order};

use super::intent::MutationIntent;
use crate::core::{SyncError, SyncResult};
use crate::store::OrderStore;

/// Optimistic-retry mutation front end over the order store
pub struct DeltaProducer {
    store: Arc<OrderStore>,
    retry_limit: u32,
}

impl DeltaProducer {
    pub fn new(store: Arc<OrderStore>, retry_limit: u32) -> Self {
        Self { store, retry_limit }
    }

    /// Open a new order for a table (first customer/waiter action)
    pub fn open_order(
        &self,
        restaurant_id: &str,
        table_id: &str,
        table_name: Option<String>,
    ) -> Order {
        self.store.open_order(restaurant_id, table_id, table_name)
    }

    /// Apply one mutation with optimistic retry
    ///
    /// The request is already authorized and business-validated upstream;
    /// this only guarantees atomic versioned application. A request that
    /// exhausts its retry budget is abandoned with no partial state.
    pub fn request_mutation(
        &self,
        order_id: &str,
        actor: &ActorIdentity,
        intent: &MutationIntent,
    ) -> SyncResult<Order> {
        let mut attempts: u32 = 0;

        loop {
            let expected = self
                .store
                .version_of(order_id)
                .ok_or_else(|| SyncError::OrderNotFound(order_id.to_string()))?;

            match self
                .store
                .compare_and_apply(order_id, expected, actor, |order| intent.apply(order))
            {
                Ok((order, delta)) => {
                    tracing::debug!(
                        order_id = %order_id,
                        version = delta.version,
                        kind = %delta.kind,
                        actor = %actor.actor_id,
                        "Mutation committed"
                    );
                    return Ok(order);
                }
                Err(SyncError::Conflict { expected, actual }) => {
                    attempts += 1;
                    if attempts > self.retry_limit {
                        tracing::warn!(
                            order_id = %order_id,
                            attempts,
                            "Retry budget exhausted, surfacing concurrent modification"
                        );
                        return Err(SyncError::ConcurrentModification { attempts });
                    }
                    tracing::trace!(
                        order_id = %order_id,
                        expected,
                        actual,
                        attempt = attempts,
                        "Version conflict, retrying with fresh state"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }
}
