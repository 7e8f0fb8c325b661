//! Notification seam - typed outbound call to the notification collaborator
//!
//! On every committed change the collaborator is told which topics were
//! addressed and what kind of change happened; it owns rendering and read
//! state. The call is decoupled from the mutation path by the best-effort
//! notify lane of the update fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use shared::message::NotificationKind;
use shared::topic::Topic;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::routing::resolve_destinations;
use crate::store::OrderUpdate;

/// External notification collaborator
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, recipients: &[Topic], kind: NotificationKind, order_id: &str);
}

/// Default sink: structured log lines only
#[derive(Debug, Default, Clone)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, recipients: &[Topic], kind: NotificationKind, order_id: &str) {
        let recipients: Vec<String> = recipients.iter().map(ToString::to_string).collect();
        tracing::info!(
            order_id = %order_id,
            kind = ?kind,
            recipients = ?recipients,
            "Notification emitted"
        );
    }
}

/// Background worker draining the notify lane of the update fan-out
pub struct NotificationForwarder {
    sink: Arc<dyn NotificationSink>,
    rx: mpsc::Receiver<OrderUpdate>,
    shutdown: CancellationToken,
}

impl NotificationForwarder {
    pub fn new(
        sink: Arc<dyn NotificationSink>,
        rx: mpsc::Receiver<OrderUpdate>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { sink, rx, shutdown }
    }

    pub async fn run(mut self) {
        tracing::debug!("Notification forwarder started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Notification forwarder shutting down");
                    break;
                }
                update = self.rx.recv() => {
                    match update {
                        Some(update) => self.forward(update).await,
                        None => break,
                    }
                }
            }
        }

        tracing::debug!("Notification forwarder stopped");
    }

    async fn forward(&self, update: OrderUpdate) {
        let kind = match &update {
            OrderUpdate::Created { .. } => NotificationKind::OrderOpened,
            OrderUpdate::Mutated { delta, .. } => NotificationKind::from(delta.kind),
            // The terminal delta already produced its notification
            OrderUpdate::Archived { .. } => return,
        };

        let order = update.order();
        let recipients = resolve_destinations(order);
        self.sink.notify(&recipients, kind, &order.order_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        seen: Mutex<Vec<(Vec<Topic>, NotificationKind, String)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn notify(&self, recipients: &[Topic], kind: NotificationKind, order_id: &str) {
            self.seen
                .lock()
                .push((recipients.to_vec(), kind, order_id.to_string()));
        }
    }

    #[tokio::test]
    async fn test_forwarder_maps_delta_kinds() {
        use crate::store::OrderStore;
        use shared::order::{ActorIdentity, DeltaPayload, PaymentStatus};

        let store = OrderStore::new(16, 64);
        let mut source = store.subscribe_updates();
        let (tx, rx) = mpsc::channel(16);
        let sink = Arc::new(RecordingSink::default());
        let dyn_sink: Arc<dyn NotificationSink> = sink.clone();
        let shutdown = CancellationToken::new();
        let forwarder = NotificationForwarder::new(dyn_sink, rx, shutdown.clone());
        let handle = tokio::spawn(forwarder.run());

        let order = store.open_order("r-1", "t-1", None);
        store
            .compare_and_apply(&order.order_id, 0, &ActorIdentity::new("pay", "Pay"), |o| {
                o.payment_status = PaymentStatus::Processing;
                Ok(DeltaPayload::PaymentStatus {
                    payment_status: PaymentStatus::Processing,
                })
            })
            .unwrap();

        for _ in 0..2 {
            let update = source.recv().await.unwrap();
            tx.send(update).await.unwrap();
        }
        drop(tx);
        let _ = handle.await;

        let seen = sink.seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].1, NotificationKind::OrderOpened);
        assert_eq!(seen[1].1, NotificationKind::PaymentStatusChanged);
        // Unassigned order: broadcast + order topic recipients
        assert!(seen[1].0.contains(&Topic::restaurant_broadcast("r-1")));
        assert!(seen[1].0.contains(&Topic::order(&order.order_id)));
        let _ = shutdown;
    }
}
