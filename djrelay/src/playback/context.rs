//! Per-item playback accumulators

use crate::content::{ContentItem, PlaybackSummary};
use djrelay_common::ListenerId;
use std::collections::HashSet;
use tokio::time::Instant;

/// State of the item currently playing
///
/// Created when the player commits to an item and consumed by
/// [`finish`](Self::finish) when the item is over.
#[derive(Debug)]
pub struct PlaybackContext {
    item: ContentItem,
    started: Instant,
    /// Everyone seen listening since the item started
    all_listeners: HashSet<ListenerId>,
    skip_voters: HashSet<ListenerId>,
    /// A listener is either a hyper or a skip voter, never both
    hypers: HashSet<ListenerId>,
}

impl PlaybackContext {
    pub fn new(item: ContentItem, listeners: HashSet<ListenerId>) -> Self {
        Self {
            item,
            started: Instant::now(),
            all_listeners: listeners,
            skip_voters: HashSet::new(),
            hypers: HashSet::new(),
        }
    }

    pub fn item(&self) -> &ContentItem {
        &self.item
    }

    pub fn contributor(&self) -> Option<ListenerId> {
        self.item.contributor
    }

    /// Record the current listener set
    pub fn observe(&mut self, listeners: &HashSet<ListenerId>) {
        self.all_listeners.extend(listeners.iter().copied());
    }

    /// Returns false if the vote was already counted
    pub fn vote(&mut self, listener: ListenerId) -> bool {
        self.hypers.remove(&listener);
        self.skip_voters.insert(listener)
    }

    pub fn unvote(&mut self, listener: ListenerId) -> bool {
        self.skip_voters.remove(&listener)
    }

    pub fn skip_votes(&self) -> usize {
        self.skip_voters.len()
    }

    /// Returns false if already counted; contributors cannot hype their own item
    pub fn hype(&mut self, listener: ListenerId) -> bool {
        if self.contributor() == Some(listener) {
            return false;
        }
        self.skip_voters.remove(&listener);
        self.hypers.insert(listener)
    }

    pub fn unhype(&mut self, listener: ListenerId) -> bool {
        self.hypers.remove(&listener)
    }

    pub fn hypes(&self) -> usize {
        self.hypers.len()
    }

    /// Whether the votes of current listeners reach `ratio` of them
    pub fn should_skip(&self, listeners: &HashSet<ListenerId>, ratio: f64) -> bool {
        if listeners.is_empty() {
            return false;
        }
        let qualifying = listeners.intersection(&self.skip_voters).count();
        qualifying as f64 >= ratio * listeners.len() as f64
    }

    pub fn finish(self, skipped: bool) -> PlaybackSummary {
        PlaybackSummary {
            played: self.started.elapsed(),
            item: self.item,
            listeners: self.all_listeners,
            skip_voters: self.skip_voters,
            hypers: self.hypers,
            skipped,
        }
    }
}
