//! In-memory content provider seeded from the `[library]` config section

use super::{ContentItem, ContentProvider, PlaybackSummary};
use crate::config::{LibraryConfig, LibraryItem};
use crate::error::ContentError;
use async_trait::async_trait;
use djrelay_common::ListenerId;
use rand::seq::SliceRandom;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Accumulated statistics of one library item
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemStats {
    pub listener_count: u64,
    pub skip_votes: u64,
    pub hype_count: u64,
    pub play_count: u64,
    pub credits: u32,
}

#[derive(Debug)]
struct Entry {
    item: LibraryItem,
    credits: u32,
    credit_cap: u32,
    last_played: Option<Instant>,
    listener_count: u64,
    skip_votes: u64,
    hype_count: u64,
    play_count: u64,
    failure: Option<String>,
}

#[derive(Debug, Default)]
struct Playlist {
    items: VecDeque<u64>,
    repeat: bool,
}

#[derive(Debug)]
struct Library {
    entries: HashMap<u64, Entry>,
    playlists: HashMap<ListenerId, Playlist>,
    /// Renewal periods are counted from here
    last_renewal: Instant,
}

/// Selection limits
#[derive(Debug, Clone)]
struct Limits {
    protection: Duration,
    hype_threshold: u64,
    hype_skip_ratio: f64,
    max_duration_secs: u64,
    credit_renew: Duration,
}

/// Content provider keeping the library and per-contributor playlists in memory
///
/// Contributor picks are refused when the item is blacklisted, was played
/// within the protection interval, has no credits left or is too long.
/// Background picks are random among items that pass the same checks and
/// have enough hypes for their skip votes. Credits spent by plays come back
/// one per renewal interval, up to each item's initial amount.
pub struct MemoryContentProvider {
    library: Mutex<Library>,
    limits: Limits,
}

impl MemoryContentProvider {
    pub fn from_config(config: &LibraryConfig) -> Self {
        let mut library = Library {
            entries: HashMap::new(),
            playlists: HashMap::new(),
            last_renewal: Instant::now(),
        };
        for item in &config.items {
            let credits = item.credits.unwrap_or(config.default_credits);
            library.entries.insert(
                item.id,
                Entry {
                    credits,
                    credit_cap: credits,
                    item: item.clone(),
                    last_played: None,
                    listener_count: 0,
                    skip_votes: 0,
                    hype_count: 0,
                    play_count: 0,
                    failure: None,
                },
            );
        }
        for playlist in &config.playlists {
            let unknown: Vec<u64> = playlist
                .items
                .iter()
                .copied()
                .filter(|id| !library.entries.contains_key(id))
                .collect();
            if !unknown.is_empty() {
                warn!("Playlist of {} references unknown items {:?}", playlist.contributor, unknown);
            }
            library.playlists.insert(
                playlist.contributor,
                Playlist {
                    items: playlist.items.iter().copied().collect(),
                    repeat: playlist.repeat,
                },
            );
        }
        info!(
            "Library loaded: {} items, {} playlists",
            library.entries.len(),
            library.playlists.len()
        );

        Self {
            library: Mutex::new(library),
            limits: Limits {
                protection: Duration::from_secs(config.protection_secs),
                hype_threshold: config.hype_threshold,
                hype_skip_ratio: config.hype_skip_ratio,
                max_duration_secs: config.max_duration_secs,
                credit_renew: Duration::from_secs(config.credit_renew_secs.max(1)),
            },
        }
    }

    /// Replace a contributor's playlist
    pub async fn set_playlist(&self, contributor: ListenerId, items: Vec<u64>, repeat: bool) {
        let mut library = self.library.lock().await;
        library.playlists.insert(
            contributor,
            Playlist {
                items: items.into(),
                repeat,
            },
        );
    }

    /// Mark an item as failing; it is flagged on its next contributor pick
    /// and never chosen as background content
    pub async fn mark_failed(&self, id: u64, reason: impl Into<String>) -> bool {
        let mut library = self.library.lock().await;
        match library.entries.get_mut(&id) {
            Some(entry) => {
                entry.failure = Some(reason.into());
                true
            }
            None => false,
        }
    }

    pub async fn item_stats(&self, id: u64) -> Option<ItemStats> {
        let library = self.library.lock().await;
        library.entries.get(&id).map(|entry| ItemStats {
            listener_count: entry.listener_count,
            skip_votes: entry.skip_votes,
            hype_count: entry.hype_count,
            play_count: entry.play_count,
            credits: entry.credits,
        })
    }

    /// Add one credit per renewal interval elapsed since the last renewal
    ///
    /// Returns the number of intervals credited. The remainder of a partial
    /// interval carries over to the next call.
    pub async fn renew_credits(&self, now: Instant) -> u32 {
        let mut library = self.library.lock().await;
        let elapsed = now.saturating_duration_since(library.last_renewal);
        let periods = u32::try_from(elapsed.as_nanos() / self.limits.credit_renew.as_nanos()).unwrap_or(u32::MAX);
        if periods == 0 {
            return 0;
        }

        library.last_renewal = library
            .last_renewal
            .checked_add(self.limits.credit_renew.saturating_mul(periods))
            .unwrap_or(now);
        for entry in library.entries.values_mut() {
            entry.credits = entry.credits.saturating_add(periods).min(entry.credit_cap);
        }
        info!("Renewed {} credit(s) for {} items", periods, library.entries.len());
        periods
    }

    /// Periodically run [`renew_credits`](Self::renew_credits)
    pub fn spawn_credit_renewal(self: &Arc<Self>) -> JoinHandle<()> {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(provider.limits.credit_renew);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                provider.renew_credits(Instant::now()).await;
            }
        })
    }

    fn played_recently(&self, entry: &Entry, now: Instant) -> bool {
        entry
            .last_played
            .is_some_and(|played| now.saturating_duration_since(played) < self.limits.protection)
    }

    fn background_eligible(&self, entry: &Entry, now: Instant) -> bool {
        !entry.item.blacklisted
            && entry.failure.is_none()
            && entry.item.duplicate_of.is_none()
            && entry.item.duration_secs <= self.limits.max_duration_secs
            && entry.credits > 0
            && !self.played_recently(entry, now)
            && entry.hype_count >= self.limits.hype_threshold
            && entry.skip_votes as f64 * self.limits.hype_skip_ratio <= entry.hype_count as f64
    }
}

fn to_item(entry: &Entry, contributor: Option<ListenerId>) -> ContentItem {
    ContentItem {
        content_id: Some(entry.item.id),
        title: entry.item.title.clone(),
        duration_secs: entry.item.duration_secs,
        locator: entry.item.locator.clone(),
        contributor,
    }
}

#[async_trait]
impl ContentProvider for MemoryContentProvider {
    async fn next_item_for(&self, contributor: ListenerId) -> Result<ContentItem, ContentError> {
        let mut library = self.library.lock().await;
        let playlist = library.playlists.get_mut(&contributor).ok_or(ContentError::Empty)?;
        let picked = playlist.items.pop_front().ok_or(ContentError::Empty)?;
        if playlist.repeat {
            playlist.items.push_back(picked);
        }

        let mut entry = library.entries.get(&picked).ok_or_else(|| ContentError::Unavailable {
            reason: format!("song [{}] is no longer in the library", picked),
        })?;
        if let Some(original) = entry.item.duplicate_of {
            debug!("Song [{}] is a duplicate of [{}]", picked, original);
            entry = library.entries.get(&original).ok_or_else(|| ContentError::Unavailable {
                reason: format!("song [{}] is no longer in the library", original),
            })?;
        }

        let id = entry.item.id;
        let title = &entry.item.title;
        if entry.item.blacklisted {
            return Err(ContentError::Unavailable {
                reason: format!("song [{}] {} is blacklisted", id, title),
            });
        }
        if self.played_recently(entry, Instant::now()) {
            return Err(ContentError::Unavailable {
                reason: format!("song [{}] {} has been played recently", id, title),
            });
        }
        if entry.credits == 0 {
            return Err(ContentError::Unavailable {
                reason: format!("song [{}] {} has no credits left", id, title),
            });
        }
        if entry.item.duration_secs > self.limits.max_duration_secs {
            return Err(ContentError::Unavailable {
                reason: format!("song [{}] {} is too long", id, title),
            });
        }
        if let Some(reason) = &entry.failure {
            return Err(ContentError::Flagged {
                item_id: id,
                title: title.clone(),
                reason: reason.clone(),
            });
        }

        Ok(to_item(entry, Some(contributor)))
    }

    async fn next_background_item(&self) -> Result<Option<ContentItem>, ContentError> {
        let library = self.library.lock().await;
        let now = Instant::now();
        let eligible: Vec<&Entry> = library
            .entries
            .values()
            .filter(|entry| self.background_eligible(entry, now))
            .collect();
        let picked = eligible.choose(&mut rand::thread_rng()).map(|entry| to_item(entry, None));
        if picked.is_none() {
            debug!("No background item is eligible");
        }
        Ok(picked)
    }

    async fn record_stats(&self, summary: PlaybackSummary) -> Result<(), ContentError> {
        let Some(id) = summary.item.content_id else {
            return Ok(());
        };
        let mut library = self.library.lock().await;
        let entry = library
            .entries
            .get_mut(&id)
            .ok_or_else(|| ContentError::Provider(format!("unknown item {}", id)))?;
        entry.listener_count += summary.listeners.len() as u64;
        entry.skip_votes += summary.skip_voters.len() as u64;
        entry.hype_count += summary.hypers.len() as u64;
        entry.last_played = Some(Instant::now());
        entry.credits = entry.credits.saturating_sub(1);
        entry.play_count += 1;
        debug!(
            "Recorded stats for [{}]: {} listeners, {} hypes, {} skip votes, skipped={}",
            id,
            summary.listeners.len(),
            summary.hypers.len(),
            summary.skip_voters.len(),
            summary.skipped
        );
        Ok(())
    }
}
