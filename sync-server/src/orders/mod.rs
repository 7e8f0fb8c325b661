//! Mutation intents and the delta producer
//!
//! Mutations enter the engine as [`MutationIntent`] values from the
//! business-logic layer (already authorized and business-validated) and
//! leave as exactly one versioned delta per committed change.

pub mod intent;
pub mod producer;

pub use intent::MutationIntent;
pub use producer::DeltaProducer;
