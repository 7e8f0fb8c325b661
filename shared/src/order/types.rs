//! Building-block types for the order aggregate

use serde::{Deserialize, Serialize};

/// Order lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Active,
    AwaitingPayment,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses archive the order; no further mutations are accepted
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

/// Per-dish-line preparation status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DishStatus {
    #[default]
    Ordered,
    InPreparation,
    Served,
    Rejected,
}

/// Payment progress of the whole order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Processing,
    Paid,
}

/// One ordered dish line
///
/// `line_id` identifies the line within its order; the same dish can be
/// ordered on several lines (different comments, different customers).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DishLine {
    pub line_id: String,
    pub dish_id: String,
    /// Dish name snapshot (menu lookups stay out of the sync path)
    pub name: String,
    pub quantity: i32,
    pub status: DishStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Input for adding a dish line; the server assigns the line ID
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DishInput {
    pub dish_id: String,
    pub name: String,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl DishInput {
    /// Materialize into a dish line with a server-assigned line ID
    pub fn into_line(self) -> DishLine {
        DishLine {
            line_id: crate::util::new_id(),
            dish_id: self.dish_id,
            name: self.name,
            quantity: self.quantity,
            status: DishStatus::Ordered,
            comment: self.comment,
        }
    }
}

/// A customer participating in a shared table order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub participant_id: String,
    pub display_name: String,
    pub joined_at: i64,
}

/// Reference to the waiter an order is assigned to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaiterRef {
    pub waiter_id: String,
    pub display_name: String,
}

/// Who triggered a mutation (customer or waiter, already authenticated
/// and authorized upstream)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActorIdentity {
    pub actor_id: String,
    pub display_name: String,
}

impl ActorIdentity {
    pub fn new(actor_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            display_name: display_name.into(),
        }
    }
}
