//! Order deltas - versioned, minimal descriptions of one change
//!
//! A delta is immutable once produced. Its `version` is the order version
//! the mutation committed; a client may apply a delta only when its local
//! version is exactly `version - 1`, otherwise it must resync.

use super::types::{ActorIdentity, DishLine, DishStatus, OrderStatus, Participant, PaymentStatus, WaiterRef};
use serde::{Deserialize, Serialize};

/// Delta kind enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaKind {
    Status,
    DishesAdded,
    DishesModified,
    DishesRemoved,
    ParticipantsAdded,
    ParticipantsRemoved,
    WaiterAssigned,
    PaymentStatus,
    TableChanged,
}

impl std::fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeltaKind::Status => write!(f, "STATUS"),
            DeltaKind::DishesAdded => write!(f, "DISHES_ADDED"),
            DeltaKind::DishesModified => write!(f, "DISHES_MODIFIED"),
            DeltaKind::DishesRemoved => write!(f, "DISHES_REMOVED"),
            DeltaKind::ParticipantsAdded => write!(f, "PARTICIPANTS_ADDED"),
            DeltaKind::ParticipantsRemoved => write!(f, "PARTICIPANTS_REMOVED"),
            DeltaKind::WaiterAssigned => write!(f, "WAITER_ASSIGNED"),
            DeltaKind::PaymentStatus => write!(f, "PAYMENT_STATUS"),
            DeltaKind::TableChanged => write!(f, "TABLE_CHANGED"),
        }
    }
}

/// Changed fields of one dish line (only what changed is present)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DishChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DishStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DishChanges {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.status.is_none() && self.comment.is_none()
    }
}

/// Delta payload variants - each carries only the changed fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum DeltaPayload {
    Status {
        status: OrderStatus,
    },

    DishesAdded {
        /// Complete lines as materialized by the server (with line IDs)
        dishes: Vec<DishLine>,
    },

    DishesModified {
        line_id: String,
        changes: DishChanges,
    },

    DishesRemoved {
        line_ids: Vec<String>,
    },

    ParticipantsAdded {
        participants: Vec<Participant>,
    },

    ParticipantsRemoved {
        participant_ids: Vec<String>,
    },

    WaiterAssigned {
        waiter: WaiterRef,
    },

    PaymentStatus {
        payment_status: PaymentStatus,
    },

    TableChanged {
        table_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        table_name: Option<String>,
    },
}

impl DeltaPayload {
    /// The kind this payload describes
    pub fn kind(&self) -> DeltaKind {
        match self {
            DeltaPayload::Status { .. } => DeltaKind::Status,
            DeltaPayload::DishesAdded { .. } => DeltaKind::DishesAdded,
            DeltaPayload::DishesModified { .. } => DeltaKind::DishesModified,
            DeltaPayload::DishesRemoved { .. } => DeltaKind::DishesRemoved,
            DeltaPayload::ParticipantsAdded { .. } => DeltaKind::ParticipantsAdded,
            DeltaPayload::ParticipantsRemoved { .. } => DeltaKind::ParticipantsRemoved,
            DeltaPayload::WaiterAssigned { .. } => DeltaKind::WaiterAssigned,
            DeltaPayload::PaymentStatus { .. } => DeltaKind::PaymentStatus,
            DeltaPayload::TableChanged { .. } => DeltaKind::TableChanged,
        }
    }
}

/// Versioned delta message
///
/// Wire contract: `{orderId, version, kind, payload}`. The actor and the
/// server production timestamp ride along for audit and debugging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    /// Order this delta belongs to
    pub order_id: String,
    /// Target version (= order version after the mutation committed)
    pub version: u64,
    /// Delta kind
    pub kind: DeltaKind,
    /// Kind-specific payload, only the changed fields
    pub payload: DeltaPayload,
    /// Who caused the mutation (snapshot for audit)
    pub actor: ActorIdentity,
    /// Server timestamp when the delta was produced (Unix millis)
    pub produced_at: i64,
}

impl Delta {
    /// Create a delta; the kind is derived from the payload so the two
    /// can never disagree
    pub fn new(
        order_id: impl Into<String>,
        version: u64,
        payload: DeltaPayload,
        actor: ActorIdentity,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            version,
            kind: payload.kind(),
            payload,
            actor,
            produced_at: crate::util::now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_keys_are_camel_case() {
        let delta = Delta::new(
            "order-1",
            3,
            DeltaPayload::PaymentStatus {
                payment_status: PaymentStatus::Paid,
            },
            ActorIdentity::new("w-1", "Marta"),
        );

        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["orderId"], "order-1");
        assert_eq!(json["version"], 3);
        assert_eq!(json["kind"], "PAYMENT_STATUS");
        assert_eq!(json["payload"]["type"], "PAYMENT_STATUS");
        assert_eq!(json["payload"]["paymentStatus"], "PAID");
        assert!(json["producedAt"].is_i64());
    }

    #[test]
    fn test_kind_derived_from_payload() {
        let delta = Delta::new(
            "order-1",
            1,
            DeltaPayload::DishesRemoved {
                line_ids: vec!["l-1".to_string()],
            },
            ActorIdentity::new("c-1", "Guest"),
        );
        assert_eq!(delta.kind, DeltaKind::DishesRemoved);
    }

    #[test]
    fn test_delta_round_trip() {
        let delta = Delta::new(
            "order-9",
            5,
            DeltaPayload::DishesModified {
                line_id: "l-4".to_string(),
                changes: DishChanges {
                    quantity: Some(2),
                    status: None,
                    comment: None,
                },
            },
            ActorIdentity::new("c-2", "Ana"),
        );

        let bytes = serde_json::to_vec(&delta).unwrap();
        let parsed: Delta = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, delta);
    }
}
