//! Order Sync Server - 餐厅实时订单同步引擎
//!
//! # 架构概述
//!
//! 本模块是同步引擎的主入口，提供以下核心功能：
//!
//! - **订单状态存储** (`store`): 权威内存状态 + 版本发放 + 重连回放日志
//! - **变更生产** (`orders`): 变更意图 → 乐观重试 → 每次提交恰好一条增量
//! - **主题路由** (`routing`): 按当前订单状态解析增量的目标主题
//! - **连接中心** (`hub`): 订阅管理、best-effort 投递、TCP 传输、重连回放
//! - **对账调度** (`reconcile`): 周期性全量快照推送（一致性兜底）
//!
//! # 数据流
//!
//! ```text
//! requestMutation ──► DeltaProducer ──► OrderStore (CAS + 版本+1)
//!                                           │ broadcast
//!                                      UpdateRouter
//!                          ┌────────────────┼─────────────────┐
//!                    DeliveryWorker   RepositoryForwarder  NotificationForwarder
//!                          │
//!                    resolve_destinations ──► ConnectionHub ──► clients
//! ```
//!
//! # 模块结构
//!
//! ```text
//! sync-server/src/
//! ├── core/          # 配置、状态、错误、后台任务、更新分发
//! ├── common/        # 日志基础设施
//! ├── store/         # 订单状态存储与仓储接缝
//! ├── orders/        # 变更意图与增量生产
//! ├── routing/       # 主题路由（纯函数）
//! ├── hub/           # 连接、订阅、投递、TCP
//! ├── reconcile/     # 对账调度器
//! └── notify/        # 通知协作方接缝
//! ```

pub mod common;
pub mod core;
pub mod hub;
pub mod notify;
pub mod orders;
pub mod reconcile;
pub mod routing;
pub mod store;

// Re-export 公共类型
pub use core::{BackgroundTasks, Config, ServerState, SyncError, SyncResult, TaskKind};
pub use hub::{ClientConnection, ConnectionHub, ConnectionState, TcpSyncServer};
pub use notify::{LogSink, NotificationSink};
pub use orders::{DeltaProducer, MutationIntent};
pub use reconcile::ReconcileScheduler;
pub use routing::resolve_destinations;
pub use store::{NullRepository, OrderRepository, OrderStore, OrderUpdate, ReplayPlan};

// Re-export logger functions
pub use common::{init_logger, init_logger_with_file};
