//! # djrelay Common Library
//!
//! Shared code for the relay service and its tooling:
//! - Event types (RelayEvent enum) and the playback state enum
//! - Configuration file resolution
//! - Common error type

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{ListenerId, ListenerMode, PlaybackState, RelayEvent};
