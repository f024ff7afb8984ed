//! # djrelay
//!
//! Relays contributor-queued content and external streams to a voice channel
//! and to a multi-listener HTTP broadcast endpoint.
//!
//! **Architecture:**
//! - [`playback::Player`]: state machine choosing what plays next
//! - [`audio::FramePump`]: real-time thread pacing fixed-size PCM frames
//! - [`broadcast::BroadcastServer`]: encoder pipeline and ICY multiplexing
//! - [`listeners::ListenerManager`]: listener registry, rotation queue, tokens
//! - [`api`]: JSON control surface and SSE event stream

pub mod api;
pub mod audio;
pub mod broadcast;
pub mod config;
pub mod content;
pub mod error;
pub mod listeners;
pub mod notify;
pub mod playback;
pub mod process;
pub mod state;

pub use error::{ContentError, Error, ListenerError, MetadataError, PlayerError, ProcessError, Result};
pub use state::SharedState;
