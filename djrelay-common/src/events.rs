//! Event types for the relay event bus
//!
//! Every state change the relay commits is published as a [`RelayEvent`]. The
//! control API forwards them verbatim over SSE, so the serialized shape is part
//! of the external contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque listener identity supplied by the chat front end
pub type ListenerId = u64;

/// Relay event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayEvent {
    /// Player committed a state transition
    PlaybackStateChanged {
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Status line and stream title republished
    StatusChanged {
        state: PlaybackState,
        status: String,
        stream_title: String,
        timestamp: DateTime<Utc>,
    },

    /// An item started playing
    ItemStarted {
        content_id: Option<u64>,
        contributor: Option<ListenerId>,
        title: String,
        duration_secs: u64,
        timestamp: DateTime<Utc>,
    },

    /// The current item ended (naturally or skipped)
    ItemFinished {
        content_id: Option<u64>,
        title: String,
        skipped: bool,
        listeners: usize,
        skip_votes: usize,
        timestamp: DateTime<Utc>,
    },

    /// Listener set or contributor queue changed
    ListenersChanged {
        listeners: usize,
        anonymous: usize,
        queue: Vec<ListenerId>,
        timestamp: DateTime<Utc>,
    },

    /// A direct (token) listener attached to the broadcast endpoint
    DirectListenerConnected {
        listener: ListenerId,
        metadata: bool,
        timestamp: DateTime<Utc>,
    },

    /// A direct listener was evicted or replaced
    DirectListenerDisconnected {
        listener: ListenerId,
        timestamp: DateTime<Utc>,
    },

    /// Output gain changed
    VolumeChanged {
        percent: u32,
        timestamp: DateTime<Utc>,
    },
}

impl RelayEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            RelayEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            RelayEvent::StatusChanged { .. } => "StatusChanged",
            RelayEvent::ItemStarted { .. } => "ItemStarted",
            RelayEvent::ItemFinished { .. } => "ItemFinished",
            RelayEvent::ListenersChanged { .. } => "ListenersChanged",
            RelayEvent::DirectListenerConnected { .. } => "DirectListenerConnected",
            RelayEvent::DirectListenerDisconnected { .. } => "DirectListenerDisconnected",
            RelayEvent::VolumeChanged { .. } => "VolumeChanged",
        }
    }
}

/// Player mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Stopped,
    /// DJ mode, nobody listening yet
    Waiting,
    /// DJ mode, grace period before background content
    Cooldown,
    /// DJ mode, an item is playing
    Playing,
    /// External stream relay
    Streaming,
}

impl PlaybackState {
    /// States in which a decoder may be running
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Streaming)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Waiting => write!(f, "waiting"),
            PlaybackState::Cooldown => write!(f, "cooldown"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Streaming => write!(f, "streaming"),
        }
    }
}

/// How a listener is attached to the relay
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ListenerMode {
    /// Present in the voice channel
    Voice,
    /// Connected to the broadcast endpoint with a token
    Direct,
}

impl std::fmt::Display for ListenerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerMode::Voice => write!(f, "voice"),
            ListenerMode::Direct => write!(f, "direct"),
        }
    }
}
