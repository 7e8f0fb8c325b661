//! Client-side sync state tracking
//!
//! Clients apply a delta only when it is the exact successor of their
//! local version; anything else is discarded and answered with a resync
//! request. Snapshots are authoritative and reset the tracker.

use crate::message::SyncPoint;
use crate::order::{Delta, Snapshot};

/// What a client should do with an incoming delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaDecision {
    /// Exact successor of the local version: apply it
    Apply,
    /// Already seen (version <= local): drop silently
    Duplicate,
    /// Gap or reordering detected: discard and request a snapshot
    OutOfOrder,
}

/// Per-order sync state tracker for clients
#[derive(Debug, Clone, Default)]
pub struct ClientSyncState {
    /// Last applied order version
    pub last_version: u64,
    /// Whether we are currently connected
    pub connected: bool,
    /// Whether a gap was detected and a snapshot is required
    pub needs_resync: bool,
    /// Server epoch observed at handshake; a change voids `last_version`
    pub server_epoch: Option<String>,
}

impl ClientSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful handshake
    ///
    /// If the server epoch changed (server restarted), local version
    /// tracking is void and a full resync is required.
    pub fn on_connect(&mut self, server_epoch: &str) {
        self.connected = true;
        if let Some(prev) = &self.server_epoch
            && prev != server_epoch
        {
            self.needs_resync = true;
        }
        self.server_epoch = Some(server_epoch.to_string());
    }

    /// Record a disconnect
    pub fn on_disconnect(&mut self) {
        self.connected = false;
    }

    /// Decide what to do with an incoming delta and update the tracker
    pub fn on_delta(&mut self, delta: &Delta) -> DeltaDecision {
        if delta.version == self.last_version + 1 {
            self.last_version = delta.version;
            DeltaDecision::Apply
        } else if delta.version <= self.last_version {
            DeltaDecision::Duplicate
        } else {
            // Gap: do NOT advance past it, a snapshot must close it
            self.needs_resync = true;
            DeltaDecision::OutOfOrder
        }
    }

    /// Snapshots are authoritative: adopt their version unconditionally
    pub fn on_snapshot(&mut self, snapshot: &Snapshot) {
        self.last_version = snapshot.version;
        self.needs_resync = false;
    }

    /// Whether the client should request a resync
    pub fn should_resync(&self) -> bool {
        !self.connected || self.needs_resync
    }

    /// Build the sync point to declare on reconnect/subscribe
    pub fn sync_point(&self, order_id: impl Into<String>) -> SyncPoint {
        SyncPoint {
            order_id: order_id.into(),
            last_known_version: self.last_version,
        }
    }
}
