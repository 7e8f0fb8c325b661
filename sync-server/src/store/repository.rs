//! Repository seam - durable storage lives outside the engine
//!
//! The store is a cache over an external repository: warmed from it on
//! startup, written back asynchronously after each commit. Persistence is
//! never on the mutation path; a slow or failing repository costs nothing
//! but staleness in the durable copy.

use std::sync::Arc;

use async_trait::async_trait;
use shared::order::Order;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{OrderStore, OrderUpdate};
use crate::core::SyncResult;

/// External persistence collaborator
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Load all orders that were live when the server last stopped
    async fn load_active(&self) -> SyncResult<Vec<Order>>;

    /// Persist the current state of a live order
    async fn persist(&self, order: &Order) -> SyncResult<()>;

    /// Hand off a terminal order for archival
    async fn archive(&self, order: &Order) -> SyncResult<()>;
}

/// No-op repository for tests and repository-less deployments
#[derive(Debug, Default, Clone)]
pub struct NullRepository;

#[async_trait]
impl OrderRepository for NullRepository {
    async fn load_active(&self) -> SyncResult<Vec<Order>> {
        Ok(Vec::new())
    }

    async fn persist(&self, _order: &Order) -> SyncResult<()> {
        Ok(())
    }

    async fn archive(&self, _order: &Order) -> SyncResult<()> {
        Ok(())
    }
}

/// Background worker draining the persist lane of the update fan-out
///
/// Failures are logged and dropped: the durable copy self-heals on the next
/// commit of the same order, and the live store stays authoritative.
pub struct RepositoryForwarder {
    repository: Arc<dyn OrderRepository>,
    store: Arc<OrderStore>,
    rx: mpsc::Receiver<OrderUpdate>,
    shutdown: CancellationToken,
}

impl RepositoryForwarder {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        store: Arc<OrderStore>,
        rx: mpsc::Receiver<OrderUpdate>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            repository,
            store,
            rx,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("Repository forwarder started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::debug!("Repository forwarder shutting down");
                    break;
                }
                update = self.rx.recv() => {
                    match update {
                        Some(update) => self.handle(update).await,
                        None => break,
                    }
                }
            }
        }

        tracing::debug!("Repository forwarder stopped");
    }

    async fn handle(&self, update: OrderUpdate) {
        match update {
            OrderUpdate::Created { order } | OrderUpdate::Mutated { order, .. } => {
                if let Err(e) = self.repository.persist(&order).await {
                    tracing::warn!(order_id = %order.order_id, error = %e, "Order persist failed");
                }
            }
            OrderUpdate::Archived { order } => {
                match self.repository.archive(&order).await {
                    Ok(()) => {
                        // The durable copy owns the order now; free the live entry
                        self.store.evict(&order.order_id);
                    }
                    Err(e) => {
                        tracing::error!(
                            order_id = %order.order_id,
                            error = %e,
                            "Order archive failed, entry kept in live store"
                        );
                    }
                }
            }
        }
    }
}
