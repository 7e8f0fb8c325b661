//! Topic addressing - named routing destinations for delta fan-out
//!
//! Three topic kinds exist, with stable addressable names:
//! - `waiter:{waiterId}` - one waiter's personal topic
//! - `restaurant-broadcast:{restaurantId}` - all active waiters of a restaurant
//! - `order:{orderId}` - everyone following one order

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A named routing destination
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Personal topic of one waiter
    Waiter(String),
    /// All active waiters of a restaurant (unassigned orders)
    RestaurantBroadcast(String),
    /// Everyone following one order (customers, table display)
    Order(String),
}

impl Topic {
    pub fn waiter(waiter_id: impl Into<String>) -> Self {
        Topic::Waiter(waiter_id.into())
    }

    pub fn restaurant_broadcast(restaurant_id: impl Into<String>) -> Self {
        Topic::RestaurantBroadcast(restaurant_id.into())
    }

    pub fn order(order_id: impl Into<String>) -> Self {
        Topic::Order(order_id.into())
    }

    /// The order ID this topic is bound to, if it is an order topic
    pub fn order_id(&self) -> Option<&str> {
        match self {
            Topic::Order(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Waiter(id) => write!(f, "waiter:{}", id),
            Topic::RestaurantBroadcast(id) => write!(f, "restaurant-broadcast:{}", id),
            Topic::Order(id) => write!(f, "order:{}", id),
        }
    }
}

/// Error for unparseable topic names
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("Invalid topic name: {0}")]
pub struct TopicParseError(pub String);

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| TopicParseError(s.to_string()))?;
        if id.is_empty() {
            return Err(TopicParseError(s.to_string()));
        }
        match kind {
            "waiter" => Ok(Topic::Waiter(id.to_string())),
            "restaurant-broadcast" => Ok(Topic::RestaurantBroadcast(id.to_string())),
            "order" => Ok(Topic::Order(id.to_string())),
            _ => Err(TopicParseError(s.to_string())),
        }
    }
}

// Topics travel as their addressable string form
impl Serialize for Topic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Topic {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
