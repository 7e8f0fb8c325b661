//! Connection Hub - subscription membership and delta delivery
//!
//! One process-scoped hub instance owns every live connection and every
//! topic's subscriber set. Topic sets are mutated only on connect/subscribe/
//! disconnect events and read-only during publish; delivery is best-effort
//! per connection and isolated from the mutation path.
//!
//! # Reconnect backfill
//!
//! A client subscribing to an order topic may declare "I last saw version
//! V". The hub then replays the missing deltas `V+1..` in version order
//! when the store's retained log still covers them, or pushes an
//! authoritative snapshot when the client is too far behind.

pub mod connection;
pub mod delivery;
pub mod tcp;

pub use connection::{ClientConnection, ConnectionState, SendFailure};
pub use delivery::DeliveryWorker;
pub use tcp::TcpSyncServer;

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use shared::message::{ClientIdentity, ServerMessage, SyncPoint};
use shared::topic::Topic;
use tokio::sync::mpsc;

use crate::core::{SyncError, SyncResult};
use crate::store::{OrderStore, ReplayPlan};

/// Process-scoped connection and subscription registry
pub struct ConnectionHub {
    connections: DashMap<String, Arc<ClientConnection>>,
    topics: DashMap<Topic, HashSet<String>>,
    store: Arc<OrderStore>,
    send_queue_capacity: usize,
    /// Unique instance ID minted at startup; clients detect restarts with it
    epoch: String,
}

impl ConnectionHub {
    pub fn new(store: Arc<OrderStore>, send_queue_capacity: usize) -> Self {
        let epoch = shared::util::new_id();
        tracing::info!(epoch = %epoch, "Connection hub started with new epoch");
        Self {
            connections: DashMap::new(),
            topics: DashMap::new(),
            store,
            send_queue_capacity,
            epoch,
        }
    }

    /// Server instance epoch (returned in HelloAck)
    pub fn epoch(&self) -> &str {
        &self.epoch
    }

    /// Register an authenticated client and hand back its outbound queue
    pub fn register(
        &self,
        identity: ClientIdentity,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<ServerMessage>) {
        let (conn, rx) = ClientConnection::new(identity, self.send_queue_capacity);
        conn.mark_authorized();
        self.connections.insert(conn.id().to_string(), Arc::clone(&conn));
        tracing::debug!(
            connection_id = %conn.id(),
            identity = ?conn.identity(),
            "Connection registered"
        );
        (conn, rx)
    }

    /// Subscribe a connection to a topic, with optional reconnect backfill
    ///
    /// Rejections (`UnauthorizedSubscription`, `UnknownTopic`) leave the
    /// connection up; only its request is refused.
    pub fn subscribe(
        &self,
        connection_id: &str,
        topic: Topic,
        last_known: Option<SyncPoint>,
    ) -> SyncResult<()> {
        let conn = self
            .connections
            .get(connection_id)
            .map(|c| Arc::clone(&c))
            .ok_or_else(|| SyncError::internal(format!("Unknown connection: {connection_id}")))?;

        self.authorize(conn.identity(), &topic)?;

        if let Topic::Order(order_id) = &topic
            && !self.store.contains(order_id)
        {
            return Err(SyncError::UnknownTopic(topic.to_string()));
        }

        // Join the live set first so nothing published from here on is
        // missed; replayed duplicates are discarded by the client tracker.
        self.topics
            .entry(topic.clone())
            .or_default()
            .insert(connection_id.to_string());
        conn.mark_subscribed();

        let _ = conn.try_send(ServerMessage::SubscribeAck {
            topic: topic.clone(),
        });

        if let Some(sync_point) = last_known {
            self.replay(&conn, &sync_point)?;
        }

        tracing::debug!(connection_id = %connection_id, topic = %topic, "Subscribed");
        Ok(())
    }

    /// Drop one subscription
    pub fn unsubscribe(&self, connection_id: &str, topic: &Topic) {
        if let Some(mut subscribers) = self.topics.get_mut(topic) {
            subscribers.remove(connection_id);
        }
        self.topics.remove_if(topic, |_, subs| subs.is_empty());
        tracing::debug!(connection_id = %connection_id, topic = %topic, "Unsubscribed");
    }

    /// Replay missed deltas for a declared sync point, or heal with a snapshot
    ///
    /// A stale client (gap beyond the retained log) is not an error: it gets
    /// the current snapshot and moves on.
    pub fn replay(&self, conn: &ClientConnection, sync_point: &SyncPoint) -> SyncResult<()> {
        let plan = self
            .store
            .deltas_since(&sync_point.order_id, sync_point.last_known_version)?;

        match plan {
            ReplayPlan::UpToDate => {}
            ReplayPlan::Deltas(deltas) => {
                tracing::debug!(
                    connection_id = %conn.id(),
                    order_id = %sync_point.order_id,
                    count = deltas.len(),
                    "Replaying missed deltas"
                );
                for delta in deltas {
                    if self.send_isolated(conn, ServerMessage::delta((*delta).clone())) {
                        break;
                    }
                }
            }
            ReplayPlan::SnapshotRequired => {
                if let Some(snapshot) = self.store.snapshot(&sync_point.order_id) {
                    tracing::debug!(
                        connection_id = %conn.id(),
                        order_id = %sync_point.order_id,
                        last_known = sync_point.last_known_version,
                        "Stale client, sending snapshot instead of replay"
                    );
                    self.send_isolated(conn, ServerMessage::snapshot(snapshot));
                }
            }
        }
        Ok(())
    }

    /// Deliver a message to every live subscriber of a topic
    ///
    /// Per-connection failures are isolated: logged, the connection marked,
    /// and delivery to the remaining subscribers continues.
    pub fn publish(&self, topic: &Topic, msg: &ServerMessage) {
        let subscribers: Vec<String> = match self.topics.get(topic) {
            Some(set) => set.iter().cloned().collect(),
            None => return,
        };

        let mut closed: Vec<String> = Vec::new();
        for connection_id in subscribers {
            let Some(conn) = self.connections.get(&connection_id).map(|c| Arc::clone(&c)) else {
                closed.push(connection_id);
                continue;
            };
            if self.send_isolated(&conn, msg.clone()) {
                closed.push(connection_id);
            }
        }

        for connection_id in closed {
            self.on_disconnect(&connection_id);
        }
    }

    /// Tear down a connection: release every subscription, stop deliveries
    pub fn on_disconnect(&self, connection_id: &str) {
        if let Some((_, conn)) = self.connections.remove(connection_id) {
            conn.mark_disconnected();
        }
        let mut emptied: Vec<Topic> = Vec::new();
        for mut entry in self.topics.iter_mut() {
            entry.value_mut().remove(connection_id);
            if entry.value().is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        for topic in emptied {
            self.topics.remove_if(&topic, |_, subs| subs.is_empty());
        }
        tracing::debug!(connection_id = %connection_id, "Connection removed");
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    /// Orders that currently have at least one subscriber on their topic
    /// (the reconciliation scheduler's work set)
    pub fn order_ids_with_subscribers(&self) -> Vec<String> {
        self.topics
            .iter()
            .filter(|e| !e.value().is_empty())
            .filter_map(|e| e.key().order_id().map(str::to_string))
            .collect()
    }

    /// Try one delivery; returns true when the connection is gone for good
    fn send_isolated(&self, conn: &ClientConnection, msg: ServerMessage) -> bool {
        match conn.try_send(msg) {
            Ok(()) => false,
            Err(SendFailure::QueueFull) => {
                // Dropped; the next reconciliation snapshot heals the client
                tracing::warn!(
                    connection_id = %conn.id(),
                    "Delivery failure: outbound queue full, message dropped"
                );
                false
            }
            Err(SendFailure::Closed) => {
                tracing::debug!(connection_id = %conn.id(), "Delivery failed: connection closed");
                true
            }
        }
    }

    /// Topic-level authorization against the declared identity
    fn authorize(&self, identity: &ClientIdentity, topic: &Topic) -> SyncResult<()> {
        let allowed = match (identity, topic) {
            // Waiters: own personal topic, own restaurant's broadcast,
            // any order of their restaurant
            (ClientIdentity::Waiter { waiter_id, .. }, Topic::Waiter(id)) => waiter_id == id,
            (ClientIdentity::Waiter { restaurant_id, .. }, Topic::RestaurantBroadcast(id)) => {
                restaurant_id == id
            }
            (ClientIdentity::Waiter { restaurant_id, .. }, Topic::Order(order_id)) => self
                .store
                .get(order_id)
                .is_some_and(|o| &o.restaurant_id == restaurant_id),

            // Customers: only the one order they participate in
            (ClientIdentity::Customer { order_id, .. }, Topic::Order(id)) => order_id == id,
            (ClientIdentity::Customer { .. }, _) => false,

            // Table displays: restaurant-wide read surface
            (ClientIdentity::TableDisplay { restaurant_id }, Topic::RestaurantBroadcast(id)) => {
                restaurant_id == id
            }
            (ClientIdentity::TableDisplay { restaurant_id }, Topic::Order(order_id)) => self
                .store
                .get(order_id)
                .is_some_and(|o| &o.restaurant_id == restaurant_id),
            (ClientIdentity::TableDisplay { .. }, Topic::Waiter(_)) => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(SyncError::UnauthorizedSubscription(topic.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::order::{ActorIdentity, DeltaPayload, DishInput};

    fn setup() -> (Arc<OrderStore>, ConnectionHub) {
        let store = Arc::new(OrderStore::new(64, 256));
        let hub = ConnectionHub::new(Arc::clone(&store), 16);
        (store, hub)
    }

    fn waiter(id: &str) -> ClientIdentity {
        ClientIdentity::Waiter {
            waiter_id: id.to_string(),
            restaurant_id: "r-1".to_string(),
        }
    }

    fn customer(order_id: &str) -> ClientIdentity {
        ClientIdentity::Customer {
            participant_id: "p-1".to_string(),
            order_id: order_id.to_string(),
        }
    }

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

    #[test]
    fn test_publish_reaches_subscribers() {
        let (store, hub) = setup();
        let order = store.open_order("r-1", "t-1", None);

        let (conn, mut rx) = hub.register(customer(&order.order_id));
        hub.subscribe(conn.id(), Topic::order(&order.order_id), None)
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::SubscribeAck { .. }
        ));

        hub.publish(&Topic::order(&order.order_id), &ServerMessage::Pong);
        assert!(matches!(rx.try_recv().unwrap(), ServerMessage::Pong));
    }

    #[test]
    fn test_unauthorized_subscription_rejected_without_teardown() {
        let (store, hub) = setup();
        let order = store.open_order("r-1", "t-1", None);

        let (conn, _rx) = hub.register(customer(&order.order_id));
        let err = hub
            .subscribe(conn.id(), Topic::restaurant_broadcast("r-1"), None)
            .unwrap_err();
        assert!(matches!(err, SyncError::UnauthorizedSubscription(_)));

        // Connection still usable
        assert_ne!(conn.state(), ConnectionState::Disconnected);
        hub.subscribe(conn.id(), Topic::order(&order.order_id), None)
            .unwrap();
    }

    #[test]
    fn test_waiter_cannot_take_foreign_personal_topic() {
        let (_, hub) = setup();
        let (conn, _rx) = hub.register(waiter("w-1"));
        assert!(matches!(
            hub.subscribe(conn.id(), Topic::waiter("w-2"), None),
            Err(SyncError::UnauthorizedSubscription(_))
        ));
    }

    #[test]
    fn test_order_topic_for_unknown_order() {
        let (_, hub) = setup();
        let (conn, _rx) = hub.register(customer("ghost"));
        assert!(matches!(
            hub.subscribe(conn.id(), Topic::order("ghost"), None),
            Err(SyncError::UnknownTopic(_))
        ));
    }

    #[test]
    fn test_backfill_replays_exact_missing_range() {
        let (store, hub) = setup();
        let order = store.open_order("r-1", "t-1", None);
        for i in 0..5 {
            mutate(&store, &order.order_id, &format!("d{i}"));
        }

        let (conn, mut rx) = hub.register(customer(&order.order_id));
        hub.subscribe(
            conn.id(),
            Topic::order(&order.order_id),
            Some(SyncPoint {
                order_id: order.order_id.clone(),
                last_known_version: 2,
            }),
        )
        .unwrap();

        // Ack first, then deltas 3..=5 in order
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::SubscribeAck { .. }
        ));
        for expected in 3..=5u64 {
            match rx.try_recv().unwrap() {
                ServerMessage::Delta { delta } => assert_eq!(delta.version, expected),
                other => panic!("expected delta, got {other:?}"),
            }
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_backfill_beyond_log_sends_snapshot() {
        let store = Arc::new(OrderStore::new(2, 256));
        let hub = ConnectionHub::new(Arc::clone(&store), 16);
        let order = store.open_order("r-1", "t-1", None);
        for i in 0..6 {
            mutate(&store, &order.order_id, &format!("d{i}"));
        }

        let (conn, mut rx) = hub.register(customer(&order.order_id));
        hub.subscribe(
            conn.id(),
            Topic::order(&order.order_id),
            Some(SyncPoint {
                order_id: order.order_id.clone(),
                last_known_version: 1,
            }),
        )
        .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::SubscribeAck { .. }
        ));
        match rx.try_recv().unwrap() {
            ServerMessage::Snapshot { snapshot } => {
                assert_eq!(snapshot.version, 6);
                assert_eq!(snapshot.full_order_state.dishes.len(), 6);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[test]
    fn test_slow_consumer_does_not_block_others() {
        let (store, hub) = setup();
        let order = store.open_order("r-1", "t-1", None);
        let topic = Topic::order(&order.order_id);

        // Slow consumer with a queue of 1, healthy consumer with room
        let slow_hub = ConnectionHub::new(Arc::clone(&store), 1);
        let (slow, _slow_rx) = slow_hub.register(customer(&order.order_id));
        // Register the slow connection in the main hub's registry
        // (capacity is per-hub; emulate by filling its queue)
        let (healthy, mut healthy_rx) = hub.register(customer(&order.order_id));
        hub.connections
            .insert(slow.id().to_string(), Arc::clone(&slow));
        hub.topics
            .entry(topic.clone())
            .or_default()
            .extend([slow.id().to_string(), healthy.id().to_string()]);

        // Fill the slow queue
        slow.try_send(ServerMessage::Pong).unwrap();

        hub.publish(&topic, &ServerMessage::Pong);

        // Healthy consumer received despite the slow one dropping
        assert!(matches!(healthy_rx.try_recv().unwrap(), ServerMessage::Pong));
        assert_eq!(slow.state(), ConnectionState::Degraded);
    }

    #[test]
    fn test_disconnect_releases_all_subscriptions() {
        let (store, hub) = setup();
        let order_a = store.open_order("r-1", "t-1", None);
        let order_b = store.open_order("r-1", "t-2", None);

        let (conn, _rx) = hub.register(waiter("w-1"));
        hub.subscribe(conn.id(), Topic::waiter("w-1"), None).unwrap();
        hub.subscribe(conn.id(), Topic::order(&order_a.order_id), None)
            .unwrap();
        hub.subscribe(conn.id(), Topic::order(&order_b.order_id), None)
            .unwrap();
        assert_eq!(hub.order_ids_with_subscribers().len(), 2);

        hub.on_disconnect(conn.id());
        assert_eq!(hub.subscriber_count(&Topic::waiter("w-1")), 0);
        assert!(hub.order_ids_with_subscribers().is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_closed_connection_removed_on_publish() {
        let (store, hub) = setup();
        let order = store.open_order("r-1", "t-1", None);
        let topic = Topic::order(&order.order_id);

        let (conn, rx) = hub.register(customer(&order.order_id));
        hub.subscribe(conn.id(), topic.clone(), None).unwrap();
        drop(rx); // peer gone

        hub.publish(&topic, &ServerMessage::Pong);
        assert_eq!(hub.subscriber_count(&topic), 0);
        assert!(hub.connections.get(conn.id()).is_none());
    }
}
