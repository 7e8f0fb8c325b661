use std::sync::Arc;

use shared::order::{ActorIdentity, Order};
use tokio_util::sync::CancellationToken;

use crate::core::update_router::UpdateRouter;
use crate::core::{BackgroundTasks, Config, SyncResult, TaskKind};
use crate::hub::{ConnectionHub, DeliveryWorker, TcpSyncServer};
use crate::notify::{LogSink, NotificationForwarder, NotificationSink};
use crate::orders::{DeltaProducer, MutationIntent};
use crate::reconcile::ReconcileScheduler;
use crate::store::{NullRepository, OrderRepository, OrderStore, RepositoryForwarder};

/// Best-effort 通道容量（持久化/通知）
const BEST_EFFORT_LANE_BUFFER: usize = 256;

/// 服务器状态 - 持有所有服务的单例引用
///
/// ServerState 是同步引擎的核心数据结构，持有所有组件的共享引用。
/// 使用 Arc 实现浅拷贝，克隆成本极低。
///
/// # 服务组件
///
/// | 字段 | 类型 | 说明 |
/// |------|------|------|
/// | config | Config | 配置项 (不可变) |
/// | store | Arc<OrderStore> | 订单状态存储（版本发放） |
/// | hub | Arc<ConnectionHub> | 连接与订阅管理 |
/// | producer | Arc<DeltaProducer> | 变更入口（乐观重试） |
/// | repository | Arc<dyn OrderRepository> | 外部持久化协作方 |
/// | notification_sink | Arc<dyn NotificationSink> | 外部通知协作方 |
#[derive(Clone)]
pub struct ServerState {
    /// 服务器配置
    pub config: Config,
    /// 订单状态存储
    pub store: Arc<OrderStore>,
    /// 连接中心
    pub hub: Arc<ConnectionHub>,
    /// 变更生产者
    pub producer: Arc<DeltaProducer>,
    /// 外部持久化协作方
    pub repository: Arc<dyn OrderRepository>,
    /// 外部通知协作方
    pub notification_sink: Arc<dyn NotificationSink>,
}

impl ServerState {
    /// 初始化服务器状态（默认协作方：无持久化、日志通知）
    pub async fn initialize(config: &Config) -> Self {
        Self::initialize_with(
            config,
            Arc::new(NullRepository),
            Arc::new(LogSink),
        )
        .await
    }

    /// 初始化服务器状态（注入外部协作方）
    ///
    /// 按顺序初始化：
    /// 1. OrderStore（从仓储层预热活跃订单）
    /// 2. ConnectionHub（生成本次启动的 epoch）
    /// 3. DeltaProducer
    pub async fn initialize_with(
        config: &Config,
        repository: Arc<dyn OrderRepository>,
        notification_sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let store = Arc::new(OrderStore::new(
            config.delta_log_capacity,
            config.update_channel_capacity,
        ));

        match store.warm_from(repository.as_ref()).await {
            Ok(count) if count > 0 => {
                tracing::info!(count, "Restored active orders from repository");
            }
            Ok(_) => {}
            Err(e) => {
                // 启动继续：存储层只是仓储之上的缓存，客户端以快照自愈
                tracing::error!(error = %e, "Failed to warm order store from repository");
            }
        }

        let hub = Arc::new(ConnectionHub::new(
            Arc::clone(&store),
            config.send_queue_capacity,
        ));
        let producer = Arc::new(DeltaProducer::new(
            Arc::clone(&store),
            config.mutation_retry_limit,
        ));

        Self {
            config: config.clone(),
            store,
            hub,
            producer,
            repository,
            notification_sink,
        }
    }

    /// 服务器实例 epoch（客户端用于检测重启）
    pub fn epoch(&self) -> &str {
        self.hub.epoch()
    }

    /// 变更入口（业务层已完成鉴权和业务校验）
    ///
    /// 对应外部接口 `requestMutation(orderID, actorIdentity, mutationIntent)`。
    pub fn request_mutation(
        &self,
        order_id: &str,
        actor: &ActorIdentity,
        intent: &MutationIntent,
    ) -> SyncResult<Order> {
        self.producer.request_mutation(order_id, actor, intent)
    }

    /// 开台：在一张桌子上创建新订单
    pub fn open_order(
        &self,
        restaurant_id: &str,
        table_id: &str,
        table_name: Option<String>,
    ) -> Order {
        self.producer.open_order(restaurant_id, table_id, table_name)
    }

    /// 启动后台任务
    ///
    /// 必须在接受连接之前调用。
    ///
    /// 启动的任务：
    /// - 更新路由器（store → 各工作者通道）
    /// - 投递工作者（关键路径）
    /// - 持久化转发器 / 通知转发器（best-effort）
    /// - 对账调度器
    pub fn start_background_tasks(&self, tasks: &mut BackgroundTasks) {
        let (router, channels) = UpdateRouter::new(
            self.config.update_channel_capacity,
            BEST_EFFORT_LANE_BUFFER,
        );
        let token = tasks.shutdown_token();

        let source = self.store.subscribe_updates();
        tasks.spawn("update_router", TaskKind::Listener, router.run(source));

        let delivery = DeliveryWorker::new(
            Arc::clone(&self.hub),
            channels.delivery_rx,
            token.clone(),
        );
        tasks.spawn("delivery_worker", TaskKind::Worker, delivery.run());

        let persister = RepositoryForwarder::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.store),
            channels.persist_rx,
            token.clone(),
        );
        tasks.spawn("repository_forwarder", TaskKind::Worker, persister.run());

        let notifier = NotificationForwarder::new(
            Arc::clone(&self.notification_sink),
            channels.notify_rx,
            token.clone(),
        );
        tasks.spawn("notification_forwarder", TaskKind::Worker, notifier.run());

        let reconciler = ReconcileScheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.hub),
            self.config.reconcile_interval(),
            token,
        );
        tasks.spawn("reconcile_scheduler", TaskKind::Periodic, reconciler.run());

        tracing::info!(count = tasks.len(), "Background tasks started");
    }

    /// 创建 TCP 服务器（与后台任务共享关闭令牌）
    pub fn tcp_server(&self, shutdown: CancellationToken) -> TcpSyncServer {
        TcpSyncServer::new(
            Arc::clone(&self.hub),
            self.config.listen_addr(),
            self.config.liveness_timeout(),
            shutdown,
        )
    }
}
