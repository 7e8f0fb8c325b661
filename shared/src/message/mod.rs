//! 客户端与服务器之间的协议消息定义
//!
//! 这些类型在 sync-server 和 clients 之间共享，用于持久连接上的
//! 帧式 JSON 通信。

use serde::{Deserialize, Serialize};

use crate::order::{Delta, Snapshot};
use crate::topic::Topic;

/// 协议版本号
pub const PROTOCOL_VERSION: u16 = 1;

/// Who is on the other end of a connection
///
/// Authentication happens upstream; the engine only uses the identity for
/// topic-level subscription authorization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientIdentity {
    /// A waiter terminal
    Waiter {
        waiter_id: String,
        restaurant_id: String,
    },
    /// A customer at a table, bound to one order
    Customer {
        participant_id: String,
        order_id: String,
    },
    /// The restaurant's live table-status display
    TableDisplay { restaurant_id: String },
}

/// Client's last known position for one order (reconnect/subscribe)
///
/// Wire contract: `{orderId, lastKnownVersion}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPoint {
    pub order_id: String,
    pub last_known_version: u64,
}

/// Messages a client sends to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// First message on every connection
    Hello {
        protocol_version: u16,
        identity: ClientIdentity,
    },
    /// Subscribe to a topic; `last_known` triggers delta replay for order topics
    Subscribe {
        topic: Topic,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_known: Option<SyncPoint>,
    },
    /// Drop one subscription
    Unsubscribe { topic: Topic },
    /// Explicit resync request (client detected a version gap)
    Resync { sync_point: SyncPoint },
    /// Liveness probe; clients send these at half the liveness timeout
    Ping,
}

/// Error codes carried in protocol error frames
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolErrorCode {
    ProtocolMismatch,
    UnknownTopic,
    UnauthorizedSubscription,
    Internal,
}

/// Messages the server pushes to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake acknowledgement
    ///
    /// `server_epoch` changes on every server restart; a client seeing a
    /// new epoch must drop its version tracking and take snapshots.
    HelloAck {
        connection_id: String,
        server_epoch: String,
    },
    /// One versioned change to one order
    Delta { delta: Delta },
    /// Authoritative full state; overwrites client state unconditionally
    Snapshot { snapshot: Snapshot },
    /// Subscription accepted
    SubscribeAck { topic: Topic },
    /// Subscription or protocol error; the connection stays up
    Error {
        code: ProtocolErrorCode,
        message: String,
    },
    /// Liveness reply
    Pong,
}

impl ServerMessage {
    pub fn delta(delta: Delta) -> Self {
        ServerMessage::Delta { delta }
    }

    pub fn snapshot(snapshot: Snapshot) -> Self {
        ServerMessage::Snapshot { snapshot }
    }

    pub fn error(code: ProtocolErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Notification kinds handed to the external notification collaborator
///
/// Derived from the delta kind; the collaborator owns rendering and read
/// state, the engine only names what happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    OrderOpened,
    OrderStatusChanged,
    DishesChanged,
    ParticipantsChanged,
    WaiterAssigned,
    PaymentStatusChanged,
    TableChanged,
}

impl From<crate::order::DeltaKind> for NotificationKind {
    fn from(kind: crate::order::DeltaKind) -> Self {
        use crate::order::DeltaKind;
        match kind {
            DeltaKind::Status => NotificationKind::OrderStatusChanged,
            DeltaKind::DishesAdded | DeltaKind::DishesModified | DeltaKind::DishesRemoved => {
                NotificationKind::DishesChanged
            }
            DeltaKind::ParticipantsAdded | DeltaKind::ParticipantsRemoved => {
                NotificationKind::ParticipantsChanged
            }
            DeltaKind::WaiterAssigned => NotificationKind::WaiterAssigned,
            DeltaKind::PaymentStatus => NotificationKind::PaymentStatusChanged,
            DeltaKind::TableChanged => NotificationKind::TableChanged,
        }
    }
}
