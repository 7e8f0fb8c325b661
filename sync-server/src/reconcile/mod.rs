//! Reconciliation Scheduler - the consistency backstop
//!
//! Runs on a fixed interval, independent of delta traffic. Every pass
//! pushes an authoritative full-state snapshot of each order that has at
//! least one active subscriber, tagged with the order's current version.
//! Correctness does not depend on every delta being delivered - only on
//! every subscriber eventually receiving one of these snapshots.

use std::sync::Arc;
use std::time::Duration;

use shared::message::ServerMessage;
use tokio_util::sync::CancellationToken;

use crate::hub::ConnectionHub;
use crate::routing::resolve_destinations;
use crate::store::OrderStore;

pub struct ReconcileScheduler {
    store: Arc<OrderStore>,
    hub: Arc<ConnectionHub>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl ReconcileScheduler {
    pub fn new(
        store: Arc<OrderStore>,
        hub: Arc<ConnectionHub>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            hub,
            interval,
            shutdown,
        }
    }

    /// 主循环：周期触发快照推送
    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Reconcile scheduler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Reconcile scheduler received shutdown signal");
                    break;
                }
            }

            let pushed = self.run_once();
            if pushed > 0 {
                tracing::debug!(orders = pushed, "Reconcile pass pushed snapshots");
            }
        }

        tracing::info!("Reconcile scheduler stopped");
    }

    /// One reconciliation pass; returns the number of orders snapshotted
    ///
    /// Only orders with at least one subscriber on their topic are pushed;
    /// idle orders cost nothing.
    pub fn run_once(&self) -> usize {
        let mut pushed = 0;

        for order_id in self.hub.order_ids_with_subscribers() {
            let Some(snapshot) = self.store.snapshot(&order_id) else {
                // Archived between listing and snapshotting; subscribers saw
                // the terminal delta already
                continue;
            };

            let order = &snapshot.full_order_state;
            let msg = ServerMessage::snapshot(snapshot.clone());
            for topic in resolve_destinations(order) {
                self.hub.publish(&topic, &msg);
            }
            pushed += 1;
        }

        pushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::message::ClientIdentity;
    use shared::order::{ActorIdentity, DeltaPayload, DishInput};
    use shared::topic::Topic;

    fn mutate(store: &OrderStore, order_id: &str, name: &str) {
        let expected = store.version_of(order_id).unwrap();
        store
            .compare_and_apply(order_id, expected, &ActorIdentity::new("c", "C"), |o| {
                let line = DishInput {
                    dish_id: name.to_string(),
                    name: name.to_string(),
                    quantity: 1,
                    comment: None,
                }
                .into_line();
                o.dishes.push(line.clone());
                Ok(DeltaPayload::DishesAdded { dishes: vec![line] })
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_heals_dropped_delta() {
        let store = Arc::new(OrderStore::new(64, 256));
        let hub = Arc::new(ConnectionHub::new(Arc::clone(&store), 32));
        let scheduler = ReconcileScheduler::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Duration::from_secs(3600),
            CancellationToken::new(),
        );

        let order = store.open_order("r-1", "t-1", None);
        let (conn, mut rx) = hub.register(ClientIdentity::Customer {
            participant_id: "p-1".to_string(),
            order_id: order.order_id.clone(),
        });
        hub.subscribe(conn.id(), Topic::order(&order.order_id), None)
            .unwrap();
        let _ = rx.try_recv(); // ack

        // Client tracks versions; deltas v1..v2 are "dropped in transit"
        // (no delivery worker is running in this test)
        let mut tracker = shared::client::ClientSyncState::new();
        mutate(&store, &order.order_id, "a");
        mutate(&store, &order.order_id, "b");
        assert_eq!(tracker.last_version, 0);

        // The scheduled pass pushes the authoritative snapshot
        let pushed = scheduler.run_once();
        assert_eq!(pushed, 1);

        match rx.try_recv().unwrap() {
            ServerMessage::Snapshot { snapshot } => {
                assert_eq!(snapshot.version, 2);
                assert_eq!(snapshot.full_order_state.dishes.len(), 2);
                tracker.on_snapshot(&snapshot);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert_eq!(tracker.last_version, 2);
        assert!(!tracker.needs_resync);
    }

    #[tokio::test]
    async fn test_orders_without_subscribers_are_skipped() {
        let store = Arc::new(OrderStore::new(64, 256));
        let hub = Arc::new(ConnectionHub::new(Arc::clone(&store), 32));
        let scheduler = ReconcileScheduler::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Duration::from_secs(3600),
            CancellationToken::new(),
        );

        store.open_order("r-1", "t-1", None);
        assert_eq!(scheduler.run_once(), 0);
    }
}
