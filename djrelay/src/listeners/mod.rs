//! Listener registry, contributor rotation and access tokens
//!
//! One mutex guards the whole registry because its invariants span several
//! collections (a queued contributor must be an active listener, a token is
//! rejected while its owner is connected by voice). Every mutation that
//! changes who is listening or queued publishes exactly one
//! [`ListenerUpdate`] on a broadcast channel; the player and the broadcast
//! server subscribe to it instead of being called back directly.

pub mod record;
pub mod timeouts;

pub use record::{ListenerEntry, ListenerRecord, ListenerSnapshot, ListenerUpdate, Revocation};
pub use timeouts::{SweepReport, TimeoutPolicy, Verdict};

use crate::config::ListenerConfig;
use crate::error::ListenerError;
use crate::notify::{ChatNotifier, InactivityKind, Notice};
use djrelay_common::{ListenerId, ListenerMode};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Length of generated access tokens
pub const TOKEN_LEN: usize = 64;

/// Manager settings
#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub contributor_timeout: TimeoutPolicy,
    pub direct_timeout: TimeoutPolicy,
    pub token_timeout: TimeoutPolicy,
    pub sweep_interval: Duration,
    pub allow_voice_token_claims: bool,
    pub update_capacity: usize,
}

impl From<&ListenerConfig> for ListenerSettings {
    fn from(config: &ListenerConfig) -> Self {
        Self {
            contributor_timeout: config.contributor_timeout.into(),
            direct_timeout: config.direct_timeout.into(),
            token_timeout: config.token_timeout.into(),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs.max(1)),
            allow_voice_token_claims: config.allow_voice_token_claims,
            update_capacity: config.update_capacity.max(1),
        }
    }
}

/// Result of [`ListenerManager::move_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveOutcome {
    /// True if the listener was not queued before
    pub inserted: bool,
    /// Effective 1-based position after clamping
    pub position: usize,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    issued: Instant,
    owner: ListenerId,
    warned: bool,
}

#[derive(Debug, Default)]
struct Registry {
    listeners: HashMap<ListenerId, ListenerRecord>,
    queue: VecDeque<ListenerId>,
    tokens: HashMap<String, TokenEntry>,
    anonymous: usize,
}

impl Registry {
    fn snapshot(&self) -> ListenerSnapshot {
        let mut listeners: Vec<ListenerEntry> = self
            .listeners
            .iter()
            .map(|(id, record)| ListenerEntry { id: *id, mode: record.mode })
            .collect();
        listeners.sort_by_key(|entry| entry.id);
        ListenerSnapshot {
            listeners,
            queue: self.queue.iter().copied().collect(),
            anonymous: self.anonymous,
        }
    }

    fn dequeue(&mut self, id: ListenerId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| *queued != id);
        self.queue.len() != before
    }
}

/// Listener and contributor-queue manager
pub struct ListenerManager {
    registry: Mutex<Registry>,
    settings: ListenerSettings,
    updates: broadcast::Sender<ListenerUpdate>,
    notifier: Arc<dyn ChatNotifier>,
}

impl ListenerManager {
    pub fn new(settings: ListenerSettings, notifier: Arc<dyn ChatNotifier>) -> Self {
        let (updates, _) = broadcast::channel(settings.update_capacity);
        Self {
            registry: Mutex::new(Registry::default()),
            settings,
            updates,
            notifier,
        }
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    /// Subscribe to fused change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerUpdate> {
        self.updates.subscribe()
    }

    fn publish(&self, registry: &Registry, revoked: Vec<Revocation>) {
        // No subscribers is fine (tests, shutdown)
        let _ = self.updates.send(ListenerUpdate {
            snapshot: registry.snapshot(),
            revoked,
        });
    }

    // ========================================================================
    // Read accessors
    // ========================================================================

    pub async fn snapshot(&self) -> ListenerSnapshot {
        self.registry.lock().await.snapshot()
    }

    pub async fn someone_listening(&self) -> bool {
        let registry = self.registry.lock().await;
        !registry.listeners.is_empty() || registry.anonymous > 0
    }

    pub async fn is_listening(&self, id: ListenerId) -> bool {
        self.registry.lock().await.listeners.contains_key(&id)
    }

    // ========================================================================
    // Listener presence
    // ========================================================================

    /// Register a listener, replacing a connection of the other mode
    ///
    /// Returns false when the request was ignored (duplicate voice join, or a
    /// direct claim by a voice listener while claims are not allowed).
    pub async fn add_listener(&self, id: ListenerId, mode: ListenerMode) -> bool {
        let mut registry = self.registry.lock().await;
        let mut revoked = Vec::new();

        if let Some(existing) = registry.listeners.get(&id) {
            match (existing.mode, mode) {
                (ListenerMode::Direct, ListenerMode::Voice) => {
                    debug!("Switching listener {} from direct stream to voice", id);
                    revoked.push(Revocation { listener: id, mode: ListenerMode::Direct });
                }
                (ListenerMode::Voice, ListenerMode::Direct) => {
                    if !self.settings.allow_voice_token_claims {
                        error!("Listener {} connected directly while in voice; ignoring", id);
                        return false;
                    }
                    debug!("Switching listener {} from voice to direct stream", id);
                    revoked.push(Revocation { listener: id, mode: ListenerMode::Voice });
                }
                (ListenerMode::Voice, ListenerMode::Voice) => {
                    warn!("Listener {} joined voice twice; ignoring", id);
                    return false;
                }
                (ListenerMode::Direct, ListenerMode::Direct) => {}
            }
        }

        registry.listeners.insert(id, ListenerRecord::new(mode, Instant::now()));
        info!("Listener {} joined ({})", id, mode);
        self.publish(&registry, revoked);
        true
    }

    /// Remove a listener; a removal for the wrong mode is a stale event and is ignored
    pub async fn remove_listener(&self, id: ListenerId, mode: ListenerMode) -> Result<bool, ListenerError> {
        let mut registry = self.registry.lock().await;
        let Some(record) = registry.listeners.get(&id) else {
            return Err(ListenerError::NotListening(id));
        };
        if record.mode != mode {
            debug!("Ignoring {} removal for listener {} connected by {}", mode, id, record.mode);
            return Ok(false);
        }

        registry.dequeue(id);
        registry.listeners.remove(&id);
        info!("Listener {} left ({})", id, mode);
        self.publish(&registry, Vec::new());
        Ok(true)
    }

    /// Set the count of unidentified listeners
    pub async fn update_anonymous(&self, count: usize) {
        let mut registry = self.registry.lock().await;
        if registry.anonymous == count {
            return;
        }
        registry.anonymous = count;
        self.publish(&registry, Vec::new());
    }

    /// Touch a listener's activity; sends a notice if a warning is withdrawn
    pub async fn refresh_activity(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock().await;
        let Some(record) = registry.listeners.get_mut(&id) else {
            return false;
        };
        debug!("Refreshing activity for listener {}", id);
        if record.refresh(Instant::now()) {
            self.notifier.whisper(id, Notice::ActivityReset);
        }
        true
    }

    // ========================================================================
    // Contributor queue
    // ========================================================================

    /// Append to the rotation; returns false if already queued
    pub async fn join_queue(&self, id: ListenerId) -> Result<bool, ListenerError> {
        let mut registry = self.registry.lock().await;
        if !registry.listeners.contains_key(&id) {
            return Err(ListenerError::NotListening(id));
        }
        if registry.queue.contains(&id) {
            return Ok(false);
        }
        registry.queue.push_back(id);
        self.publish(&registry, Vec::new());
        Ok(true)
    }

    pub async fn leave_queue(&self, id: ListenerId) -> Result<(), ListenerError> {
        let mut registry = self.registry.lock().await;
        if !registry.dequeue(id) {
            return Err(ListenerError::NotInQueue(id));
        }
        self.publish(&registry, Vec::new());
        Ok(())
    }

    /// Place a listener at a 1-based position, clamped to the queue length
    pub async fn move_listener(&self, id: ListenerId, position: usize) -> Result<MoveOutcome, ListenerError> {
        if position < 1 {
            return Err(ListenerError::InvalidPosition(position));
        }
        let mut registry = self.registry.lock().await;
        if !registry.listeners.contains_key(&id) {
            return Err(ListenerError::NotListening(id));
        }

        let inserted = !registry.dequeue(id);
        let index = (position - 1).min(registry.queue.len());
        registry.queue.insert(index, id);
        let outcome = MoveOutcome {
            inserted,
            position: position.min(registry.queue.len()),
        };
        self.publish(&registry, Vec::new());
        Ok(outcome)
    }

    /// Serve the head of the rotation and move it to the back
    pub async fn next_contributor(&self) -> Option<ListenerId> {
        let mut registry = self.registry.lock().await;
        let head = registry.queue.pop_front()?;
        registry.queue.push_back(head);
        Some(head)
    }

    /// Drop a contributor from the rotation; returns whether they were queued
    pub async fn remove_from_queue(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock().await;
        let removed = registry.dequeue(id);
        if removed {
            self.publish(&registry, Vec::new());
        }
        removed
    }

    pub async fn clear_queue(&self) {
        let mut registry = self.registry.lock().await;
        if registry.queue.is_empty() {
            return;
        }
        registry.queue.clear();
        self.publish(&registry, Vec::new());
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Issue a new access token for the broadcast endpoint
    pub async fn issue_token(&self, owner: ListenerId) -> String {
        // Generate outside the critical section
        let token: String = OsRng
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let issued = Instant::now();

        let mut registry = self.registry.lock().await;
        registry.tokens.insert(token.clone(), TokenEntry { issued, owner, warned: false });
        debug!("Issued token for listener {}", owner);
        token
    }

    /// Resolve a token to its owner
    pub async fn validate_token(&self, token: &str) -> Result<ListenerId, ListenerError> {
        let registry = self.registry.lock().await;
        let Some(entry) = registry.tokens.get(token) else {
            debug!("Token verification failed");
            return Err(ListenerError::InvalidToken);
        };
        if entry.issued.elapsed() > self.settings.token_timeout.remove_after {
            debug!("Token for listener {} has expired", entry.owner);
            return Err(ListenerError::InvalidToken);
        }
        let voice_connected = registry
            .listeners
            .get(&entry.owner)
            .is_some_and(|record| record.mode == ListenerMode::Voice);
        if voice_connected && !self.settings.allow_voice_token_claims {
            debug!("Token is valid for listener {}, but they are connected by voice", entry.owner);
            return Err(ListenerError::InvalidToken);
        }
        Ok(entry.owner)
    }

    // ========================================================================
    // Timeouts
    // ========================================================================

    /// Apply the three inactivity policies as of `now`
    pub async fn check_timeouts(&self, now: Instant) -> SweepReport {
        let mut registry = self.registry.lock().await;
        let registry = &mut *registry;
        let mut report = SweepReport::default();

        let mut expired = Vec::new();
        for (token, entry) in registry.tokens.iter_mut() {
            match self.settings.token_timeout.judge(now.saturating_duration_since(entry.issued), entry.warned) {
                Verdict::Remove => expired.push(token.clone()),
                Verdict::Warn => {
                    entry.warned = true;
                    self.notifier
                        .whisper(entry.owner, Notice::InactivityWarning { kind: InactivityKind::Token });
                }
                Verdict::Keep => {}
            }
        }
        for token in &expired {
            if let Some(entry) = registry.tokens.remove(token) {
                info!("Token for listener {} has timed out", entry.owner);
            }
        }
        report.expired_tokens = expired.len();

        for id in registry.queue.iter() {
            let Some(record) = registry.listeners.get_mut(id) else {
                continue;
            };
            let idle = now.saturating_duration_since(record.last_activity);
            match self.settings.contributor_timeout.judge(idle, record.warned_contributor) {
                Verdict::Remove => {
                    self.notifier
                        .whisper(*id, Notice::InactivityRemoval { kind: InactivityKind::Contributor });
                    report.removed_contributors.push(*id);
                }
                Verdict::Warn => {
                    info!("Contributor {} notified for being inactive", id);
                    record.warned_contributor = true;
                    self.notifier
                        .whisper(*id, Notice::InactivityWarning { kind: InactivityKind::Contributor });
                    report.warned.push(*id);
                }
                Verdict::Keep => {}
            }
        }

        for (id, record) in registry.listeners.iter_mut() {
            if record.mode != ListenerMode::Direct {
                continue;
            }
            let idle = now.saturating_duration_since(record.last_activity);
            match self.settings.direct_timeout.judge(idle, record.warned_direct) {
                Verdict::Remove => {
                    self.notifier
                        .whisper(*id, Notice::InactivityRemoval { kind: InactivityKind::DirectStream });
                    report.removed_listeners.push(*id);
                }
                Verdict::Warn => {
                    info!("Listener {} notified for being inactive", id);
                    record.warned_direct = true;
                    self.notifier
                        .whisper(*id, Notice::InactivityWarning { kind: InactivityKind::DirectStream });
                    report.warned.push(*id);
                }
                Verdict::Keep => {}
            }
        }

        for id in &report.removed_contributors {
            info!("Contributor {} has timed out", id);
            registry.dequeue(*id);
        }
        let mut revoked = Vec::new();
        for id in &report.removed_listeners {
            info!("Listener {} has timed out", id);
            registry.dequeue(*id);
            registry.listeners.remove(id);
            revoked.push(Revocation { listener: *id, mode: ListenerMode::Direct });
        }

        if report.changed_listeners() {
            self.publish(registry, revoked);
        }
        report
    }

    /// Run [`check_timeouts`](Self::check_timeouts) every sweep interval
    pub fn spawn_timeout_task(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.settings.sweep_interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = manager.check_timeouts(Instant::now()).await;
                if report.changed_listeners() || report.expired_tokens > 0 {
                    debug!("Timeout sweep: {:?}", report);
                }
            }
        })
    }
}
