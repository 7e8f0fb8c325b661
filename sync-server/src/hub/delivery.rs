//! Delivery worker - the critical lane of the update fan-out
//!
//! Drains committed updates in order, resolves their destination topics
//! from the order state carried with the update (never a stale re-read),
//! and publishes to the hub. Per-order delivery order equals commit order
//! because the store emits under its entry lock and this worker is the
//! single consumer of the lane.

use std::sync::Arc;

use shared::message::ServerMessage;
use shared::order::Snapshot;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ConnectionHub;
use crate::routing::resolve_destinations;
use crate::store::OrderUpdate;

pub struct DeliveryWorker {
    hub: Arc<ConnectionHub>,
    rx: mpsc::Receiver<OrderUpdate>,
    shutdown: CancellationToken,
}

impl DeliveryWorker {
    pub fn new(
        hub: Arc<ConnectionHub>,
        rx: mpsc::Receiver<OrderUpdate>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { hub, rx, shutdown }
    }

    pub async fn run(mut self) {
        tracing::debug!("Delivery worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Delivery worker shutting down");
                    break;
                }
                update = self.rx.recv() => {
                    match update {
                        Some(update) => self.deliver(update),
                        None => break,
                    }
                }
            }
        }

        tracing::debug!("Delivery worker stopped");
    }

    fn deliver(&self, update: OrderUpdate) {
        let msg = match &update {
            // New orders are announced as a v0 snapshot so waiters and the
            // table display learn about them without polling
            OrderUpdate::Created { order } => ServerMessage::snapshot(Snapshot::of(order)),
            OrderUpdate::Mutated { delta, .. } => ServerMessage::delta((**delta).clone()),
            // The terminal delta was already delivered via Mutated
            OrderUpdate::Archived { .. } => return,
        };

        let order = update.order();
        for topic in resolve_destinations(order) {
            self.hub.publish(&topic, &msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrderStore;
    use shared::message::ClientIdentity;
    use shared::order::{ActorIdentity, DeltaPayload, WaiterRef};
    use shared::topic::Topic;

    #[tokio::test]
    async fn test_assignment_switches_delivery_lane() {
        let store = Arc::new(OrderStore::new(64, 256));
        let hub = Arc::new(ConnectionHub::new(Arc::clone(&store), 32));
        let shutdown = CancellationToken::new();

        let (tx, rx) = mpsc::channel(32);
        let worker = DeliveryWorker::new(Arc::clone(&hub), rx, shutdown.clone());
        let handle = tokio::spawn(worker.run());

        let mut updates = store.subscribe_updates();
        let order = store.open_order("r-1", "t-1", None);

        // Broadcast listener (unassigned-order lane) and personal listener
        let (bcast_conn, mut bcast_rx) = hub.register(ClientIdentity::TableDisplay {
            restaurant_id: "r-1".to_string(),
        });
        hub.subscribe(bcast_conn.id(), Topic::restaurant_broadcast("r-1"), None)
            .unwrap();
        let (waiter_conn, mut waiter_rx) = hub.register(ClientIdentity::Waiter {
            waiter_id: "w-1".to_string(),
            restaurant_id: "r-1".to_string(),
        });
        hub.subscribe(waiter_conn.id(), Topic::waiter("w-1"), None)
            .unwrap();
        // Drain the acks
        let _ = bcast_rx.recv().await;
        let _ = waiter_rx.recv().await;

        let actor = ActorIdentity::new("w-1", "Luis");

        // v1 while unassigned: broadcast lane
        let (_, _) = store
            .compare_and_apply(&order.order_id, 0, &actor, |o| {
                o.table_name = Some("Mesa 1".to_string());
                Ok(DeltaPayload::TableChanged {
                    table_id: o.table_id.clone(),
                    table_name: o.table_name.clone(),
                })
            })
            .unwrap();

        // v2 assigns the waiter; v3 lands after assignment
        store
            .compare_and_apply(&order.order_id, 1, &actor, |o| {
                let waiter = WaiterRef {
                    waiter_id: "w-1".to_string(),
                    display_name: "Luis".to_string(),
                };
                o.assigned_waiter = Some(waiter.clone());
                Ok(DeltaPayload::WaiterAssigned { waiter })
            })
            .unwrap();
        store
            .compare_and_apply(&order.order_id, 2, &actor, |o| {
                o.table_name = Some("Mesa 2".to_string());
                Ok(DeltaPayload::TableChanged {
                    table_id: o.table_id.clone(),
                    table_name: o.table_name.clone(),
                })
            })
            .unwrap();

        // Forward the store's update stream into the worker lane
        // (Created + three Mutated)
        for _ in 0..4 {
            let update = updates.recv().await.unwrap();
            tx.send(update).await.unwrap();
        }

        // Broadcast lane saw the creation announcement and v1, nothing after
        match bcast_rx.recv().await.unwrap() {
            ServerMessage::Snapshot { snapshot } => assert_eq!(snapshot.version, 0),
            other => panic!("expected v0 snapshot, got {other:?}"),
        }
        match bcast_rx.recv().await.unwrap() {
            ServerMessage::Delta { delta } => assert_eq!(delta.version, 1),
            other => panic!("expected v1 delta, got {other:?}"),
        }
        // Personal lane saw v2 (the assignment itself) and v3
        match waiter_rx.recv().await.unwrap() {
            ServerMessage::Delta { delta } => assert_eq!(delta.version, 2),
            other => panic!("expected v2 delta, got {other:?}"),
        }
        match waiter_rx.recv().await.unwrap() {
            ServerMessage::Delta { delta } => assert_eq!(delta.version, 3),
            other => panic!("expected v3 delta, got {other:?}"),
        }
        // Nothing further leaked to the broadcast lane
        assert!(bcast_rx.try_recv().is_err());

        shutdown.cancel();
        let _ = handle.await;
    }
}
