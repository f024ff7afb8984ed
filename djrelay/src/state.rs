//! Shared relay state
//!
//! Holds the relay event bus and the last committed [`RelayStatus`]. The
//! player is the only writer of the status; readers never see a status that
//! mixes a new state with the previous item.

use djrelay_common::events::RelayEvent;
use djrelay_common::{ListenerId, PlaybackState};
use serde::Serialize;
use tokio::sync::{broadcast, watch};

/// What is playing right now
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlaying {
    pub content_id: Option<u64>,
    pub contributor: Option<ListenerId>,
    pub title: String,
    pub duration_secs: u64,
}

/// Committed player status, republished after every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayStatus {
    pub state: PlaybackState,
    /// Human-readable status line for the chat front end
    pub status: String,
    /// Title carried in stream metadata
    pub stream_title: String,
    pub now_playing: Option<NowPlaying>,
    pub listeners: usize,
    pub skip_votes: usize,
    pub hypes: usize,
}

impl Default for RelayStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            status: "Player is stopped".to_string(),
            stream_title: "Awkward silence".to_string(),
            now_playing: None,
            listeners: 0,
            skip_votes: 0,
            hypes: 0,
        }
    }
}

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE events
    pub event_tx: broadcast::Sender<RelayEvent>,

    status_tx: watch::Sender<RelayStatus>,
}

impl SharedState {
    /// Create new shared state with default values
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(100); // Buffer up to 100 events
        let (status_tx, _) = watch::channel(RelayStatus::default());
        Self { event_tx, status_tx }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: RelayEvent) {
        // Ignore send errors (no receivers is OK)
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<RelayEvent> {
        self.event_tx.subscribe()
    }

    /// Last committed status
    pub fn status(&self) -> RelayStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch committed status changes
    pub fn subscribe_status(&self) -> watch::Receiver<RelayStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn publish_status(&self, status: RelayStatus) {
        self.status_tx.send_replace(status);
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
