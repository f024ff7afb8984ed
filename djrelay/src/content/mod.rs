//! Content selection capabilities
//!
//! The relay does not store songs. It asks a [`ContentProvider`] for the next
//! item of a contributor (or for a background item) and hands back a
//! [`PlaybackSummary`] once the item is over. Live streams are resolved through
//! a [`StreamResolver`].

pub mod memory;

pub use memory::MemoryContentProvider;

use crate::error::{ContentError, ProcessError};
use async_trait::async_trait;
use djrelay_common::ListenerId;
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;

/// One playable item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentItem {
    /// Provider-side id; `None` for ad-hoc items
    pub content_id: Option<u64>,
    pub title: String,
    pub duration_secs: u64,
    /// Passed to the decoder command in place of `{input}`
    pub locator: String,
    /// Contributor whose turn produced the item; `None` for background content
    pub contributor: Option<ListenerId>,
}

/// Final statistics of one played item
#[derive(Debug, Clone)]
pub struct PlaybackSummary {
    pub item: ContentItem,
    /// Everyone observed listening while the item played
    pub listeners: HashSet<ListenerId>,
    pub skip_voters: HashSet<ListenerId>,
    pub hypers: HashSet<ListenerId>,
    pub played: Duration,
    pub skipped: bool,
}

/// Source of contributor and background content
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Next item from a contributor's source
    ///
    /// `Empty` means the source is exhausted; `Unavailable` and `Flagged`
    /// mean this attempt failed but the source may still have items.
    async fn next_item_for(&self, contributor: ListenerId) -> Result<ContentItem, ContentError>;

    /// Pick a background item, or `None` if nothing is eligible
    async fn next_background_item(&self) -> Result<Option<ContentItem>, ContentError>;

    async fn record_stats(&self, summary: PlaybackSummary) -> Result<(), ContentError>;
}

/// A resolved live stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStream {
    pub locator: String,
    pub title: Option<String>,
}

/// Turns a user-supplied stream address into something the decoder can open
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(&self, locator: &str) -> Result<ResolvedStream, ProcessError>;
}

/// Resolver that hands the locator to the decoder unchanged
#[derive(Debug, Default, Clone)]
pub struct PassthroughResolver;

#[async_trait]
impl StreamResolver for PassthroughResolver {
    async fn resolve(&self, locator: &str) -> Result<ResolvedStream, ProcessError> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ProcessError::Resolve("stream address is empty".to_string()));
        }
        Ok(ResolvedStream {
            locator: locator.to_string(),
            title: None,
        })
    }
}
