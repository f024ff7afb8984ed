//! Error types for djrelay
//!
//! Each subsystem gets a small tagged enum so callers can match on the exact
//! failure (the player's selection loop distinguishes an empty source from a
//! transiently unavailable one, the API maps listener errors to 4xx codes).
//! [`Error`] wraps all of them for the `?` paths that just propagate.

use djrelay_common::ListenerId;
use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    /// Shared crate errors (config loading, I/O)
    #[error(transparent)]
    Common(#[from] djrelay_common::Error),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listener registry and contributor queue errors
    #[error(transparent)]
    Listener(#[from] ListenerError),

    /// Player control errors
    #[error(transparent)]
    Player(#[from] PlayerError),

    /// Content provider errors
    #[error(transparent)]
    Content(#[from] ContentError),

    /// External decode/encode process errors
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Stream metadata encoding errors
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Frame pump thread unavailable
    #[error("Frame pump error: {0}")]
    Pump(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using the relay Error
pub type Result<T> = std::result::Result<T, Error>;

/// Listener registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    #[error("Listener {0} is not listening")]
    NotListening(ListenerId),

    #[error("Listener {0} is not in the contributor queue")]
    NotInQueue(ListenerId),

    #[error("Queue position must be positive, got {0}")]
    InvalidPosition(usize),

    #[error("Token is invalid, expired or already claimed")]
    InvalidToken,

    #[error("Listener {0} is connected by voice")]
    VoiceConnected(ListenerId),
}

/// Player control errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// A transition is in progress; vote-class requests are dropped
    #[error("Player is busy with a transition")]
    Busy,

    #[error("Nothing is playing")]
    NotPlaying,

    #[error("Operation not available while {0}")]
    InvalidState(djrelay_common::PlaybackState),

    #[error("Volume must be between 0 and 200 percent, got {0}")]
    InvalidVolume(u32),
}

/// Content provider errors
///
/// The selection loop treats these differently: `Empty` drops the contributor
/// at once, `Unavailable` and `Flagged` consume one retry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    /// The contributor has nothing left to play
    #[error("Content source is empty")]
    Empty,

    /// Transient failure fetching the next item
    #[error("Content temporarily unavailable: {reason}")]
    Unavailable { reason: String },

    /// The item was marked unavailable upstream
    #[error("Item [{item_id}] {title} was flagged: {reason}")]
    Flagged {
        item_id: u64,
        title: String,
        reason: String,
    },

    /// Provider backend failure (stats sink, storage)
    #[error("Content provider error: {0}")]
    Provider(String),
}

/// External process errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Command template is empty")]
    EmptyCommand,

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process {0} did not expose a pipe")]
    MissingPipe(&'static str),

    #[error("Stream resolution failed: {0}")]
    Resolve(String),
}

/// ICY metadata encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Metadata needs {blocks} blocks, maximum is 255")]
    TooLong { blocks: usize },
}
