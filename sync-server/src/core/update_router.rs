//! Update Router - 提交流的分发
//!
//! 解耦 OrderStore 和各个 Worker，提供独立的通道。
//!
//! ```text
//! OrderStore (broadcast)
//!        │
//!        └── UpdateRouter
//!               ├── mpsc ──► DeliveryWorker (all updates) [CRITICAL]
//!               ├── mpsc ──► RepositoryForwarder (all updates) [best-effort]
//!               └── mpsc ──► NotificationForwarder (all updates) [best-effort]
//! ```
//!
//! ## 优先级策略
//!
//! - **Delivery**: 关键路径，阻塞发送保证不丢失
//! - **Persist/Notify**: Best-effort，满则丢弃（不阻塞关键路径）
//!
//! 丢弃不破坏正确性：持久副本在下次提交时自愈，客户端由对账快照自愈。

use tokio::sync::{broadcast, mpsc};

use crate::store::OrderUpdate;

/// 更新通道集合
pub struct UpdateChannels {
    /// 投递通道（关键路径）
    pub delivery_rx: mpsc::Receiver<OrderUpdate>,
    /// 持久化通道
    pub persist_rx: mpsc::Receiver<OrderUpdate>,
    /// 通知通道
    pub notify_rx: mpsc::Receiver<OrderUpdate>,
}

/// 更新路由器
///
/// 订阅 OrderStore 的 broadcast，分发到独立的 mpsc 通道。
pub struct UpdateRouter {
    delivery_tx: mpsc::Sender<OrderUpdate>,
    persist_tx: mpsc::Sender<OrderUpdate>,
    notify_tx: mpsc::Sender<OrderUpdate>,
}

impl UpdateRouter {
    /// 创建路由器和通道
    ///
    /// # 参数
    /// - `delivery_buffer`: 投递通道 buffer（关键路径，建议较大）
    /// - `other_buffer`: 其他通道 buffer（best-effort）
    pub fn new(delivery_buffer: usize, other_buffer: usize) -> (Self, UpdateChannels) {
        let (delivery_tx, delivery_rx) = mpsc::channel(delivery_buffer);
        let (persist_tx, persist_rx) = mpsc::channel(other_buffer);
        let (notify_tx, notify_rx) = mpsc::channel(other_buffer);

        let router = Self {
            delivery_tx,
            persist_tx,
            notify_tx,
        };

        let channels = UpdateChannels {
            delivery_rx,
            persist_rx,
            notify_rx,
        };

        (router, channels)
    }

    /// 运行路由器（阻塞直到源通道关闭）
    pub async fn run(self, mut source: broadcast::Receiver<OrderUpdate>) {
        tracing::info!("Update router started");

        loop {
            match source.recv().await {
                Ok(update) => {
                    self.dispatch(update).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Lag 意味着有客户端要等对账快照才能追上
                    tracing::error!(
                        skipped = n,
                        "Update router lagged! Deltas skipped - clients heal on next reconcile pass"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Source channel closed, update router stopping");
                    break;
                }
            }
        }
    }

    /// 分发更新到对应通道
    async fn dispatch(&self, update: OrderUpdate) {
        // 1. 投递通道优先：阻塞发送保证不丢失（关键路径）
        if self.delivery_tx.send(update.clone()).await.is_err() {
            tracing::error!("Delivery channel closed - clients will rely on reconciliation!");
        }

        // 2. 持久化通道：best-effort，满则丢弃
        match self.persist_tx.try_send(update.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    order_id = %update.order().order_id,
                    "Persist channel full, update dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Persist channel closed");
            }
        }

        // 3. 通知通道：best-effort，满则丢弃
        match self.notify_tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                tracing::warn!(
                    order_id = %update.order().order_id,
                    "Notify channel full, notification dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Notify channel closed");
            }
        }
    }
}
