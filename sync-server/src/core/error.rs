//! 统一错误处理
//!
//! 同步引擎的错误分类：
//!
//! | 分类 | 说明 | 处理方式 |
//! |------|------|----------|
//! | 冲突 | 版本比较失败 | 内部重试，超限后上抛 |
//! | 订阅 | 主题未知/未授权 | 拒绝订阅，连接保留 |
//! | 订单 | 不存在/已终结/结构校验失败 | 上抛给调用方 |
//! | 传输 | 客户端落后/投递失败/断连 | 自愈（快照）或仅记录日志 |
//!
//! 唯一面向用户的失败是 [`SyncError::ConcurrentModification`]
//! （以及来自预校验边界的 `Validation`）；其余要么自愈，要么只进日志。

use shared::message::ProtocolErrorCode;

/// 同步引擎错误枚举
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum SyncError {
    // ========== 冲突与重试 ==========
    /// 版本比较失败（内部错误，由生产者重试消化）
    #[error("Version conflict: expected {expected}, actual {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// 重试预算耗尽（面向调用方，可重试）
    #[error("Concurrent modification after {attempts} attempts, try again")]
    ConcurrentModification { attempts: u32 },

    // ========== 订阅与路由 ==========
    /// 主题不存在（如指向未知订单的 order 主题）
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// 此连接的身份无权订阅该主题
    #[error("Unauthorized subscription to {0}")]
    UnauthorizedSubscription(String),

    // ========== 订单状态 ==========
    /// 订单不存在
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// 订单已终结，不再接受变更
    #[error("Order {0} is closed")]
    OrderClosed(String),

    /// 变更结构校验失败（业务校验在上游完成）
    #[error("Validation failed: {0}")]
    Validation(String),

    // ========== 连接与传输 ==========
    /// 客户端版本落后于保留的增量日志（以快照自愈，不上抛）
    #[error("Stale client: version {last_known} is beyond the retained delta log")]
    StaleClient { last_known: u64 },

    /// 单连接投递失败（仅记录日志，隔离处理）
    #[error("Delivery failure: {0}")]
    DeliveryFailure(String),

    /// 协议版本不匹配
    #[error("Protocol mismatch: server={server}, client={client}")]
    ProtocolMismatch { server: u16, client: u16 },

    /// 对端关闭了连接
    #[error("Connection closed")]
    ConnectionClosed,

    /// 内部错误
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        SyncError::Internal(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        SyncError::Validation(msg.into())
    }

    /// Whether the caller may simply retry the same request
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::ConcurrentModification { .. })
    }

    /// Map to a protocol error code when the error is reportable to a
    /// client over the wire (subscription failures stay on the connection)
    pub fn protocol_code(&self) -> ProtocolErrorCode {
        match self {
            SyncError::UnknownTopic(_) | SyncError::OrderNotFound(_) => {
                ProtocolErrorCode::UnknownTopic
            }
            SyncError::UnauthorizedSubscription(_) => ProtocolErrorCode::UnauthorizedSubscription,
            SyncError::ProtocolMismatch { .. } => ProtocolErrorCode::ProtocolMismatch,
            _ => ProtocolErrorCode::Internal,
        }
    }
}

/// 统一结果别名
pub type SyncResult<T> = Result<T, SyncError>;
