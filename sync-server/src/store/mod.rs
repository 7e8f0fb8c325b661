//! Order State Store - authoritative live-order state and version issuing
//!
//! The store owns the per-order serialization point: one `parking_lot`
//! mutex per entry, held only for the duration of [`OrderStore::compare_and_apply`].
//! Orders are independent; mutators on different orders never contend.
//!
//! # Commit flow
//!
//! ```text
//! compare_and_apply(order_id, expected_version, mutate)
//!     ├─ 1. Lock the order entry
//!     ├─ 2. Version check (!= expected -> Conflict, nothing written)
//!     ├─ 3. Run the mutation on a working copy
//!     ├─ 4. Bump version by exactly 1, stamp updated_at
//!     ├─ 5. Append the delta to the bounded replay log
//!     ├─ 6. Emit the update into the fan-out channel (still under the lock,
//!     │     so per-order emission order equals commit order)
//!     └─ 7. Unlock, return the new state
//! ```
//!
//! The emitted updates feed delivery, persistence and notification through
//! independent channels; none of them can delay or fail a commit.

pub mod repository;

pub use repository::{NullRepository, OrderRepository, RepositoryForwarder};

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use shared::order::{ActorIdentity, Delta, DeltaPayload, Order, Snapshot};
use tokio::sync::broadcast;

use crate::core::{SyncError, SyncResult};

/// A committed change leaving the store
#[derive(Debug, Clone)]
pub enum OrderUpdate {
    /// A new order entered the live set (version 0, announced as a snapshot)
    Created { order: Arc<Order> },
    /// One mutation committed; `order` is the state at `delta.version`
    Mutated { order: Arc<Order>, delta: Arc<Delta> },
    /// The order reached a terminal status and left the active set
    Archived { order: Arc<Order> },
}

impl OrderUpdate {
    /// The order this update concerns
    pub fn order(&self) -> &Arc<Order> {
        match self {
            OrderUpdate::Created { order }
            | OrderUpdate::Mutated { order, .. }
            | OrderUpdate::Archived { order } => order,
        }
    }
}

/// Outcome of a replay request against the retained delta log
#[derive(Debug, Clone)]
pub enum ReplayPlan {
    /// Client already has the current version
    UpToDate,
    /// The missing deltas, in strictly increasing version order
    Deltas(Vec<Arc<Delta>>),
    /// The gap exceeds the retained log; a snapshot must be sent
    SnapshotRequired,
}

struct OrderEntry {
    order: Order,
    /// Recent deltas for reconnect replay, oldest first, bounded
    deltas: VecDeque<Arc<Delta>>,
}

/// Authoritative in-memory store of live orders
///
/// May act as a cache over an external [`OrderRepository`]; see
/// [`OrderStore::warm_from`].
pub struct OrderStore {
    orders: DashMap<String, Arc<Mutex<OrderEntry>>>,
    update_tx: broadcast::Sender<OrderUpdate>,
    delta_log_capacity: usize,
}

impl OrderStore {
    pub fn new(delta_log_capacity: usize, update_channel_capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(update_channel_capacity);
        Self {
            orders: DashMap::new(),
            update_tx,
            delta_log_capacity,
        }
    }

    /// Subscribe to the commit stream (delivery/persist/notify fan-out)
    pub fn subscribe_updates(&self) -> broadcast::Receiver<OrderUpdate> {
        self.update_tx.subscribe()
    }

    /// Create a fresh order at version 0 and announce it
    pub fn open_order(
        &self,
        restaurant_id: impl Into<String>,
        table_id: impl Into<String>,
        table_name: Option<String>,
    ) -> Order {
        let order = Order::open(restaurant_id, table_id, table_name);
        let entry = OrderEntry {
            order: order.clone(),
            deltas: VecDeque::new(),
        };
        self.orders
            .insert(order.order_id.clone(), Arc::new(Mutex::new(entry)));

        tracing::info!(order_id = %order.order_id, table_id = %order.table_id, "Order opened");
        self.emit(OrderUpdate::Created {
            order: Arc::new(order.clone()),
        });
        order
    }

    /// Whether an order is present in the live set
    pub fn contains(&self, order_id: &str) -> bool {
        self.orders.contains_key(order_id)
    }

    /// Current state of an order (clone)
    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|e| e.lock().order.clone())
    }

    /// Current version of an order
    pub fn version_of(&self, order_id: &str) -> Option<u64> {
        self.orders.get(order_id).map(|e| e.lock().order.version)
    }

    /// Full-state snapshot tagged with the current version
    pub fn snapshot(&self, order_id: &str) -> Option<Snapshot> {
        self.orders
            .get(order_id)
            .map(|e| Snapshot::of(&e.lock().order))
    }

    /// IDs of all orders still accepting mutations
    pub fn active_order_ids(&self) -> Vec<String> {
        self.orders
            .iter()
            .filter(|e| e.value().lock().order.is_open())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Atomic compare-and-apply, the sole write path
    ///
    /// Fails with [`SyncError::Conflict`] when the stored version does not
    /// equal `expected_version` at commit time; the mutation closure is then
    /// not run against committed state and nothing is written. This is the
    /// correctness mechanism preventing lost updates from concurrent
    /// mutators - callers recover by re-reading and retrying.
    pub fn compare_and_apply<F>(
        &self,
        order_id: &str,
        expected_version: u64,
        actor: &ActorIdentity,
        mutate: F,
    ) -> SyncResult<(Order, Arc<Delta>)>
    where
        F: FnOnce(&mut Order) -> SyncResult<DeltaPayload>,
    {
        let entry = self
            .orders
            .get(order_id)
            .ok_or_else(|| SyncError::OrderNotFound(order_id.to_string()))?
            .clone();

        let mut entry = entry.lock();

        if !entry.order.is_open() {
            return Err(SyncError::OrderClosed(order_id.to_string()));
        }
        if entry.order.version != expected_version {
            return Err(SyncError::Conflict {
                expected: expected_version,
                actual: entry.order.version,
            });
        }

        // Mutate a working copy so a failing closure leaves no partial state
        let mut working = entry.order.clone();
        let payload = mutate(&mut working)?;

        working.version += 1;
        working.updated_at = shared::util::now_millis();

        let delta = Arc::new(Delta::new(
            order_id,
            working.version,
            payload,
            actor.clone(),
        ));

        entry.order = working;
        entry.deltas.push_back(Arc::clone(&delta));
        while entry.deltas.len() > self.delta_log_capacity {
            entry.deltas.pop_front();
        }

        let committed = Arc::new(entry.order.clone());
        // Emit under the entry lock: per-order emission order = commit order
        self.emit(OrderUpdate::Mutated {
            order: Arc::clone(&committed),
            delta: Arc::clone(&delta),
        });
        if !committed.is_open() {
            tracing::info!(order_id = %order_id, status = ?committed.status, "Order archived");
            self.emit(OrderUpdate::Archived {
                order: Arc::clone(&committed),
            });
        }

        Ok(((*committed).clone(), delta))
    }

    /// Plan a reconnect replay for a client declaring `last_known`
    ///
    /// Returns the exact missing deltas `last_known+1 ..= current` when the
    /// retained log reaches back that far, otherwise demands a snapshot.
    pub fn deltas_since(&self, order_id: &str, last_known: u64) -> SyncResult<ReplayPlan> {
        let entry = self
            .orders
            .get(order_id)
            .ok_or_else(|| SyncError::OrderNotFound(order_id.to_string()))?
            .clone();
        let entry = entry.lock();

        let current = entry.order.version;
        if last_known >= current {
            return Ok(ReplayPlan::UpToDate);
        }

        // The log must contain last_known+1; otherwise the client is stale
        match entry.deltas.front() {
            Some(oldest) if oldest.version <= last_known + 1 => {
                let missing: Vec<Arc<Delta>> = entry
                    .deltas
                    .iter()
                    .filter(|d| d.version > last_known)
                    .cloned()
                    .collect();
                Ok(ReplayPlan::Deltas(missing))
            }
            _ => {
                tracing::debug!(
                    order_id = %order_id,
                    last_known,
                    current,
                    "Client beyond retained delta log, snapshot required"
                );
                Ok(ReplayPlan::SnapshotRequired)
            }
        }
    }

    /// Drop an archived order from the live map (after repository hand-off)
    pub fn evict(&self, order_id: &str) {
        if let Some((_, entry)) = self.orders.remove(order_id) {
            let order = entry.lock();
            if order.order.is_open() {
                // Should not happen: only archived orders are evicted
                tracing::warn!(order_id = %order_id, "Evicted an order that was still open");
            }
        }
    }

    /// Reload the live set from the external repository (startup)
    ///
    /// The store is a cache over the repository; replay logs start empty,
    /// so reconnecting clients are served snapshots until new deltas accrue.
    pub async fn warm_from(&self, repository: &dyn OrderRepository) -> SyncResult<usize> {
        let orders = repository.load_active().await?;
        let count = orders.len();
        for order in orders {
            let entry = OrderEntry {
                order: order.clone(),
                deltas: VecDeque::new(),
            };
            self.orders
                .insert(order.order_id.clone(), Arc::new(Mutex::new(entry)));
        }
        if count > 0 {
            tracing::info!(count, "Warmed order store from repository");
        }
        Ok(count)
    }

    fn emit(&self, update: OrderUpdate) {
        if self.update_tx.send(update).is_err() {
            // No receivers yet (startup, tests); reconciliation covers the gap
            tracing::debug!("Order update emitted with no active receivers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::{DishInput, OrderStatus};

    fn test_store() -> OrderStore {
        OrderStore::new(8, 64)
    }

    fn actor() -> ActorIdentity {
        ActorIdentity::new("c-1", "Guest")
    }

    fn add_dish_payload(order: &mut Order, name: &str) -> SyncResult<DeltaPayload> {
        let line = DishInput {
            dish_id: format!("dish-{name}"),
            name: name.to_string(),
            quantity: 1,
            comment: None,
        }
        .into_line();
        order.dishes.push(line.clone());
        Ok(DeltaPayload::DishesAdded { dishes: vec![line] })
    }

    #[test]
    fn test_open_order_starts_at_zero() {
        let store = test_store();
        let order = store.open_order("r-1", "t-1", None);
        assert_eq!(order.version, 0);
        assert_eq!(store.version_of(&order.order_id), Some(0));
    }

    #[test]
    fn test_compare_and_apply_bumps_version_by_one() {
        let store = test_store();
        let order = store.open_order("r-1", "t-1", None);

        let (updated, delta) = store
            .compare_and_apply(&order.order_id, 0, &actor(), |o| add_dish_payload(o, "paella"))
            .unwrap();

        assert_eq!(updated.version, 1);
        assert_eq!(delta.version, 1);
        assert_eq!(updated.dishes.len(), 1);
    }

    #[test]
    fn test_stale_expected_version_conflicts() {
        let store = test_store();
        let order = store.open_order("r-1", "t-1", None);
        store
            .compare_and_apply(&order.order_id, 0, &actor(), |o| add_dish_payload(o, "a"))
            .unwrap();

        let err = store
            .compare_and_apply(&order.order_id, 0, &actor(), |o| add_dish_payload(o, "b"))
            .unwrap_err();
        assert_eq!(err, SyncError::Conflict { expected: 0, actual: 1 });

        // The failed apply wrote nothing
        assert_eq!(store.get(&order.order_id).unwrap().dishes.len(), 1);
    }

    #[test]
    fn test_failing_mutation_leaves_no_partial_state() {
        let store = test_store();
        let order = store.open_order("r-1", "t-1", None);

        let err = store
            .compare_and_apply(&order.order_id, 0, &actor(), |o| {
                o.dishes.clear(); // works on the copy only
                Err(SyncError::validation("no such dish line"))
            })
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert_eq!(store.version_of(&order.order_id), Some(0));
    }

    #[test]
    fn test_versions_are_gapless_under_racing_writers() {
        let store = Arc::new(test_store());
        let order = store.open_order("r-1", "t-1", None);
        let order_id = order.order_id.clone();

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let order_id = order_id.clone();
            handles.push(std::thread::spawn(move || {
                // Optimistic retry: re-read on conflict like the producer does
                loop {
                    let expected = store.version_of(&order_id).unwrap();
                    match store.compare_and_apply(&order_id, expected, &actor(), |o| {
                        add_dish_payload(o, &format!("dish-{i}"))
                    }) {
                        Ok((order, _)) => return order.version,
                        Err(SyncError::Conflict { .. }) => continue,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }

        let mut versions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<u64>>());
        assert_eq!(store.version_of(&order_id), Some(8));
        assert_eq!(store.get(&order_id).unwrap().dishes.len(), 8);
    }

    #[test]
    fn test_replay_plan_exact_gap() {
        let store = test_store();
        let order = store.open_order("r-1", "t-1", None);
        for i in 0..4 {
            let expected = store.version_of(&order.order_id).unwrap();
            store
                .compare_and_apply(&order.order_id, expected, &actor(), |o| {
                    add_dish_payload(o, &format!("d{i}"))
                })
                .unwrap();
        }

        match store.deltas_since(&order.order_id, 1).unwrap() {
            ReplayPlan::Deltas(deltas) => {
                let versions: Vec<u64> = deltas.iter().map(|d| d.version).collect();
                assert_eq!(versions, vec![2, 3, 4]);
            }
            other => panic!("expected deltas, got {other:?}"),
        }

        assert!(matches!(
            store.deltas_since(&order.order_id, 4).unwrap(),
            ReplayPlan::UpToDate
        ));
    }

    #[test]
    fn test_replay_beyond_retained_log_requires_snapshot() {
        let store = OrderStore::new(2, 64); // tiny log
        let order = store.open_order("r-1", "t-1", None);
        for i in 0..5 {
            let expected = store.version_of(&order.order_id).unwrap();
            store
                .compare_and_apply(&order.order_id, expected, &actor(), |o| {
                    add_dish_payload(o, &format!("d{i}"))
                })
                .unwrap();
        }

        // Log retains versions 4..=5 only; a client at 1 is stale
        assert!(matches!(
            store.deltas_since(&order.order_id, 1).unwrap(),
            ReplayPlan::SnapshotRequired
        ));
        // A client at 3 can still be replayed
        assert!(matches!(
            store.deltas_since(&order.order_id, 3).unwrap(),
            ReplayPlan::Deltas(_)
        ));
    }

    #[test]
    fn test_terminal_status_closes_the_order() {
        let store = test_store();
        let order = store.open_order("r-1", "t-1", None);

        store
            .compare_and_apply(&order.order_id, 0, &actor(), |o| {
                o.status = OrderStatus::Cancelled;
                Ok(DeltaPayload::Status {
                    status: OrderStatus::Cancelled,
                })
            })
            .unwrap();

        let err = store
            .compare_and_apply(&order.order_id, 1, &actor(), |o| add_dish_payload(o, "late"))
            .unwrap_err();
        assert!(matches!(err, SyncError::OrderClosed(_)));
        assert!(store.active_order_ids().is_empty());
    }

    #[tokio::test]
    async fn test_updates_emitted_in_commit_order() {
        let store = test_store();
        let mut rx = store.subscribe_updates();
        let order = store.open_order("r-1", "t-1", None);

        for i in 0..3 {
            let expected = store.version_of(&order.order_id).unwrap();
            store
                .compare_and_apply(&order.order_id, expected, &actor(), |o| {
                    add_dish_payload(o, &format!("d{i}"))
                })
                .unwrap();
        }

        assert!(matches!(rx.recv().await.unwrap(), OrderUpdate::Created { .. }));
        for expected_version in 1..=3u64 {
            match rx.recv().await.unwrap() {
                OrderUpdate::Mutated { delta, .. } => assert_eq!(delta.version, expected_version),
                other => panic!("expected mutation, got {other:?}"),
            }
        }
    }
}
