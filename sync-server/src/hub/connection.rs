//! Per-connection state and best-effort delivery
//!
//! Every connection owns a bounded outbound queue. Delivery is
//! `try_send`-only: a full queue marks the connection Degraded and drops
//! the message (the reconciliation snapshot heals the client), a closed
//! queue means the peer is gone. A slow or broken connection can never
//! block delivery to others or the mutation path.

use parking_lot::Mutex;
use shared::message::{ClientIdentity, ServerMessage};
use shared::util::{new_id, now_millis};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connection lifecycle
///
/// `Connecting → Authorized → Subscribed → (Active ⇄ Degraded) → Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, handshake pending
    Connecting,
    /// Identity declared and accepted
    Authorized,
    /// At least one subscription active
    Subscribed,
    /// Deliveries flowing normally
    Active,
    /// Last delivery attempt failed (queue full); still subscribed
    Degraded,
    /// Torn down; all subscriptions released, no further deliveries
    Disconnected,
}

/// Why a delivery attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// Outbound queue full; message dropped, connection degraded
    QueueFull,
    /// Peer gone; connection must be disconnected
    Closed,
}

/// One live client connection, transport-agnostic
///
/// The TCP layer (and tests) drain the paired receiver and push frames to
/// the wire; the hub only ever talks to the queue.
pub struct ClientConnection {
    id: String,
    identity: ClientIdentity,
    tx: mpsc::Sender<ServerMessage>,
    state: Mutex<ConnectionState>,
    pub connected_at: i64,
}

impl ClientConnection {
    /// Create a connection with a bounded outbound queue
    pub fn new(
        identity: ClientIdentity,
        queue_capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(queue_capacity);
        let conn = Arc::new(Self {
            id: new_id(),
            identity,
            tx,
            state: Mutex::new(ConnectionState::Connecting),
            connected_at: now_millis(),
        });
        (conn, rx)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    pub(crate) fn mark_authorized(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Authorized;
        }
    }

    pub(crate) fn mark_subscribed(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Authorized {
            *state = ConnectionState::Subscribed;
        }
    }

    pub(crate) fn mark_disconnected(&self) {
        *self.state.lock() = ConnectionState::Disconnected;
    }

    /// Best-effort delivery into the outbound queue
    pub fn try_send(&self, msg: ServerMessage) -> Result<(), SendFailure> {
        if self.is_disconnected() {
            return Err(SendFailure::Closed);
        }
        match self.tx.try_send(msg) {
            Ok(()) => {
                let mut state = self.state.lock();
                if matches!(
                    *state,
                    ConnectionState::Subscribed | ConnectionState::Degraded
                ) {
                    *state = ConnectionState::Active;
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut state = self.state.lock();
                if *state != ConnectionState::Disconnected {
                    *state = ConnectionState::Degraded;
                }
                Err(SendFailure::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_disconnected();
                Err(SendFailure::Closed)
            }
        }
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ClientIdentity {
        ClientIdentity::TableDisplay {
            restaurant_id: "r-1".to_string(),
        }
    }

    #[test]
    fn test_state_machine_progression() {
        let (conn, _rx) = ClientConnection::new(identity(), 4);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        conn.mark_authorized();
        assert_eq!(conn.state(), ConnectionState::Authorized);
        conn.mark_subscribed();
        assert_eq!(conn.state(), ConnectionState::Subscribed);
        conn.try_send(ServerMessage::Pong).unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_full_queue_degrades_and_drops() {
        let (conn, _rx) = ClientConnection::new(identity(), 1);
        conn.mark_authorized();
        conn.mark_subscribed();

        conn.try_send(ServerMessage::Pong).unwrap();
        // Queue full: dropped, degraded
        assert_eq!(
            conn.try_send(ServerMessage::Pong),
            Err(SendFailure::QueueFull)
        );
        assert_eq!(conn.state(), ConnectionState::Degraded);
    }

    #[test]
    fn test_degraded_recovers_on_successful_send() {
        let (conn, mut rx) = ClientConnection::new(identity(), 1);
        conn.mark_authorized();
        conn.mark_subscribed();

        conn.try_send(ServerMessage::Pong).unwrap();
        let _ = conn.try_send(ServerMessage::Pong); // degrade
        rx.try_recv().unwrap(); // consumer drains
        conn.try_send(ServerMessage::Pong).unwrap();
        assert_eq!(conn.state(), ConnectionState::Active);
    }

    #[test]
    fn test_closed_receiver_disconnects() {
        let (conn, rx) = ClientConnection::new(identity(), 1);
        drop(rx);
        assert_eq!(conn.try_send(ServerMessage::Pong), Err(SendFailure::Closed));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
