//! Listener records and published snapshots

use djrelay_common::{ListenerId, ListenerMode};
use serde::Serialize;
use std::collections::HashSet;
use tokio::time::Instant;

/// One active listener
#[derive(Debug, Clone)]
pub struct ListenerRecord {
    pub mode: ListenerMode,
    pub last_activity: Instant,
    /// Contributor-inactivity warning already sent
    pub warned_contributor: bool,
    /// Direct-stream-inactivity warning already sent
    pub warned_direct: bool,
}

impl ListenerRecord {
    pub fn new(mode: ListenerMode, now: Instant) -> Self {
        Self {
            mode,
            last_activity: now,
            warned_contributor: false,
            warned_direct: false,
        }
    }

    /// Touch activity and clear both warnings; returns whether a warning was cleared
    pub fn refresh(&mut self, now: Instant) -> bool {
        let was_warned = self.warned_contributor || self.warned_direct;
        self.last_activity = now;
        self.warned_contributor = false;
        self.warned_direct = false;
        was_warned
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerEntry {
    pub id: ListenerId,
    pub mode: ListenerMode,
}

/// Immutable view of listeners and the contributor rotation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ListenerSnapshot {
    /// Sorted by id
    pub listeners: Vec<ListenerEntry>,
    /// Rotation order, head first
    pub queue: Vec<ListenerId>,
    pub anonymous: usize,
}

impl ListenerSnapshot {
    pub fn listener_ids(&self) -> HashSet<ListenerId> {
        self.listeners.iter().map(|entry| entry.id).collect()
    }

    pub fn mode_of(&self, id: ListenerId) -> Option<ListenerMode> {
        self.listeners.iter().find(|entry| entry.id == id).map(|entry| entry.mode)
    }

    /// Identified or anonymous listeners present
    pub fn someone_listening(&self) -> bool {
        !self.listeners.is_empty() || self.anonymous > 0
    }

    pub fn contributors_present(&self) -> bool {
        !self.queue.is_empty()
    }
}

/// A connection that must be torn down because the listener moved or timed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub listener: ListenerId,
    /// Mode of the connection being revoked
    pub mode: ListenerMode,
}

/// Fused "listener/queue state changed" notification
#[derive(Debug, Clone)]
pub struct ListenerUpdate {
    pub snapshot: ListenerSnapshot,
    pub revoked: Vec<Revocation>,
}
