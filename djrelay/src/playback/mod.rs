//! Player state machine
//!
//! **Module Structure:**
//! - `player.rs`: lifecycle, the transition loop, entry actions and cleanup
//! - `control.rs`: control, vote and volume operations, external signals
//! - `selection.rs`: contributor rotation and background selection
//! - `context.rs`: per-item accumulators (listeners, skip votes, hypes)
//! - `status.rs`: status line and stream title per state

mod context;
mod control;
mod player;
mod selection;
mod status;

pub use context::PlaybackContext;
pub use player::{Player, PlayerDeps, PlayerSettings};
pub use selection::Selector;
pub use status::{describe, StatusText, UNTITLED_STREAM};

use crate::error::MetadataError;
use async_trait::async_trait;

/// Receives the stream title whenever the committed status changes
#[async_trait]
pub trait MetadataSink: Send + Sync {
    async fn set_stream_title(&self, title: &str) -> Result<(), MetadataError>;
}
