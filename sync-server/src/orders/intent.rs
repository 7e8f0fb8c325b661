//! Semantic mutation intents
//!
//! An intent captures *what* the caller wants changed, independent of the
//! order version it lands on; the producer reapplies the same intent on a
//! fresh read when a commit races. Applying an intent performs the
//! structural change and yields the delta payload describing it.
//!
//! Only structural validation happens here (the line exists, the order is
//! open); menu availability, pricing and authorization are the upstream
//! business layer's job.

use serde::{Deserialize, Serialize};
use shared::order::{
    DeltaPayload, DishChanges, DishInput, Order, OrderStatus, Participant, PaymentStatus, WaiterRef,
};

use crate::core::{SyncError, SyncResult};

/// One requested change to an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum MutationIntent {
    /// Append dish lines (server assigns line IDs)
    AddDishes { dishes: Vec<DishInput> },

    /// Change quantity/status/comment of one dish line
    ModifyDish {
        line_id: String,
        changes: DishChanges,
    },

    /// Remove dish lines
    RemoveDishes { line_ids: Vec<String> },

    /// Change the order lifecycle status
    SetStatus { status: OrderStatus },

    /// Customers joining the shared order
    AddParticipants { participants: Vec<Participant> },

    /// Customers leaving the shared order
    RemoveParticipants { participant_ids: Vec<String> },

    /// Assign (or re-assign) the waiter; flips routing off the broadcast
    AssignWaiter { waiter: WaiterRef },

    /// Payment progress reported by the payment collaborator
    SetPaymentStatus { payment_status: PaymentStatus },

    /// The party moved to another table
    MoveTable {
        table_id: String,
        table_name: Option<String>,
    },
}

impl MutationIntent {
    /// Apply the intent to an order and describe the change
    ///
    /// Runs inside the store's compare-and-apply, on a working copy; a
    /// returned error aborts the commit with no partial state.
    pub fn apply(&self, order: &mut Order) -> SyncResult<DeltaPayload> {
        match self {
            MutationIntent::AddDishes { dishes } => {
                if dishes.is_empty() {
                    return Err(SyncError::validation("No dishes to add"));
                }
                let lines: Vec<_> = dishes.iter().cloned().map(DishInput::into_line).collect();
                order.dishes.extend(lines.iter().cloned());
                Ok(DeltaPayload::DishesAdded { dishes: lines })
            }

            MutationIntent::ModifyDish { line_id, changes } => {
                if changes.is_empty() {
                    return Err(SyncError::validation("Empty dish modification"));
                }
                let line = order.dish_line_mut(line_id).ok_or_else(|| {
                    SyncError::validation(format!("Dish line not found: {line_id}"))
                })?;
                if let Some(quantity) = changes.quantity {
                    if quantity <= 0 {
                        return Err(SyncError::validation("Quantity must be positive"));
                    }
                    line.quantity = quantity;
                }
                if let Some(status) = changes.status {
                    line.status = status;
                }
                if let Some(comment) = &changes.comment {
                    line.comment = Some(comment.clone());
                }
                Ok(DeltaPayload::DishesModified {
                    line_id: line_id.clone(),
                    changes: changes.clone(),
                })
            }

            MutationIntent::RemoveDishes { line_ids } => {
                for line_id in line_ids {
                    if order.dish_line(line_id).is_none() {
                        return Err(SyncError::validation(format!(
                            "Dish line not found: {line_id}"
                        )));
                    }
                }
                order.dishes.retain(|d| !line_ids.contains(&d.line_id));
                Ok(DeltaPayload::DishesRemoved {
                    line_ids: line_ids.clone(),
                })
            }

            MutationIntent::SetStatus { status } => {
                order.status = *status;
                Ok(DeltaPayload::Status { status: *status })
            }

            MutationIntent::AddParticipants { participants } => {
                if participants.is_empty() {
                    return Err(SyncError::validation("No participants to add"));
                }
                for p in participants {
                    if order.has_participant(&p.participant_id) {
                        return Err(SyncError::validation(format!(
                            "Participant already present: {}",
                            p.participant_id
                        )));
                    }
                }
                order.participants.extend(participants.iter().cloned());
                Ok(DeltaPayload::ParticipantsAdded {
                    participants: participants.clone(),
                })
            }

            MutationIntent::RemoveParticipants { participant_ids } => {
                order
                    .participants
                    .retain(|p| !participant_ids.contains(&p.participant_id));
                Ok(DeltaPayload::ParticipantsRemoved {
                    participant_ids: participant_ids.clone(),
                })
            }

            MutationIntent::AssignWaiter { waiter } => {
                order.assigned_waiter = Some(waiter.clone());
                Ok(DeltaPayload::WaiterAssigned {
                    waiter: waiter.clone(),
                })
            }

            MutationIntent::SetPaymentStatus { payment_status } => {
                order.payment_status = *payment_status;
                // Payment completion terminates the order
                if *payment_status == PaymentStatus::Paid {
                    order.status = OrderStatus::Completed;
                }
                Ok(DeltaPayload::PaymentStatus {
                    payment_status: *payment_status,
                })
            }

            MutationIntent::MoveTable {
                table_id,
                table_name,
            } => {
                order.table_id = table_id.clone();
                order.table_name = table_name.clone();
                Ok(DeltaPayload::TableChanged {
                    table_id: table_id.clone(),
                    table_name: table_name.clone(),
                })
            }
        }
    }
}
