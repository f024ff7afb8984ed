//! Player lifecycle, transition loop and entry actions
//!
//! One task owns the transition loop. It holds the machine lock for the whole
//! of a transition (entry action plus status update), releases it while the
//! state is settled and waits for a wake-up, then re-acquires it and cleans up
//! the previous state before entering the next one. Everything else that
//! wants a transition sets `next_state` under the lock and signals.

use super::context::PlaybackContext;
use super::selection::Selector;
use super::status::{self, UNTITLED_STREAM};
use super::MetadataSink;
use crate::audio::{PumpEvent, PumpHandle};
use crate::config::{InitialState, RelayConfig};
use crate::content::{ContentProvider, StreamResolver};
use crate::error::Result;
use crate::listeners::{ListenerManager, ListenerSnapshot};
use crate::notify::{ChatNotifier, Notice};
use crate::process::{self, DecoderFinished, DecoderLauncher};
use crate::state::{NowPlaying, RelayStatus, SharedState};
use chrono::Utc;
use djrelay_common::events::RelayEvent;
use djrelay_common::PlaybackState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Player tuning
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub initial_state: InitialState,
    pub skip_ratio: f64,
    pub cooldown: Duration,
    pub content_retries: u32,
    pub cleanup_timeout: Duration,
    /// Decoded chunks buffered between the decoder feeder and the pump
    pub input_frames: usize,
}

impl PlayerSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            initial_state: config.player.initial_state,
            skip_ratio: config.player.skip_ratio,
            cooldown: config.player.cooldown(),
            content_retries: config.player.content_retries.max(1),
            cleanup_timeout: config.player.cleanup_timeout(),
            input_frames: config.pump.input_frames.max(1),
        }
    }
}

/// Collaborators injected into the player
pub struct PlayerDeps {
    pub state: Arc<SharedState>,
    pub listeners: Arc<ListenerManager>,
    pub provider: Arc<dyn ContentProvider>,
    pub resolver: Arc<dyn StreamResolver>,
    pub decoder: Arc<dyn DecoderLauncher>,
    pub notifier: Arc<dyn ChatNotifier>,
    /// Broadcast metadata, if a broadcast endpoint is attached
    pub metadata: Option<Arc<dyn MetadataSink>>,
    pub pump: PumpHandle,
}

pub(super) struct StreamRequest {
    pub(super) locator: String,
    pub(super) title: Option<String>,
}

struct Decode {
    child: Option<Child>,
    feeder: JoinHandle<()>,
}

/// Everything guarded by the transition lock
pub(super) struct Machine {
    pub(super) state: PlaybackState,
    pub(super) next_state: PlaybackState,
    /// Set while a wake-up is outstanding or a transition is running
    pub(super) wake_pending: bool,
    /// Insert Cooldown before background content
    pub(super) cooldown_pending: bool,
    nothing_to_play: bool,
    pub(super) context: Option<PlaybackContext>,
    pub(super) stream: Option<StreamRequest>,
    pub(super) stream_name: String,
    cooldown_task: Option<JoinHandle<()>>,
    decode: Option<Decode>,
    /// Decode session counter; stale end-of-input signals carry an older value
    pub(super) generation: u64,
    /// The current item is ending because of a skip
    pub(super) skipped: bool,
    published_title: Option<String>,
    pub(super) shutdown: bool,
}

impl Machine {
    fn new(next_state: PlaybackState) -> Self {
        Self {
            state: PlaybackState::Stopped,
            next_state,
            wake_pending: true,
            cooldown_pending: true,
            nothing_to_play: false,
            context: None,
            stream: None,
            stream_name: String::new(),
            cooldown_task: None,
            decode: None,
            generation: 0,
            skipped: false,
            published_title: None,
            shutdown: false,
        }
    }
}

pub(super) struct Inner {
    pub(super) machine: Mutex<Machine>,
    wake: Notify,
    wakeups: AtomicU64,
    pub(super) state_tx: watch::Sender<PlaybackState>,
    pub(super) deps: PlayerDeps,
    pub(super) settings: PlayerSettings,
    decoder_done: mpsc::UnboundedSender<DecoderFinished>,
}

struct Tasks {
    fsm: Option<JoinHandle<()>>,
    signals: Option<JoinHandle<()>>,
}

/// Handle to the running player
#[derive(Clone)]
pub struct Player {
    pub(super) inner: Arc<Inner>,
    tasks: Arc<Mutex<Tasks>>,
}

impl Player {
    /// Spawn the transition loop and the signal loop
    ///
    /// `pump_events` is the receiving end of the channel given to
    /// [`FramePump::start`](crate::audio::FramePump::start).
    pub fn start(deps: PlayerDeps, settings: PlayerSettings, pump_events: mpsc::UnboundedReceiver<PumpEvent>) -> Self {
        let initial = match settings.initial_state {
            InitialState::Stopped => PlaybackState::Stopped,
            InitialState::Playing => PlaybackState::Playing,
        };
        info!("Starting player (initial state: {})", initial);

        let (decoder_done, decoder_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(PlaybackState::Stopped);
        let updates = deps.listeners.subscribe();

        let inner = Arc::new(Inner {
            machine: Mutex::new(Machine::new(initial)),
            wake: Notify::new(),
            wakeups: AtomicU64::new(0),
            state_tx,
            deps,
            settings,
            decoder_done,
        });

        let fsm = tokio::spawn(run_fsm(Arc::clone(&inner)));
        let signals = tokio::spawn(super::control::run_signals(
            Arc::clone(&inner),
            pump_events,
            decoder_rx,
            updates,
        ));

        Self {
            inner,
            tasks: Arc::new(Mutex::new(Tasks {
                fsm: Some(fsm),
                signals: Some(signals),
            })),
        }
    }

    /// Last committed state
    pub fn state(&self) -> PlaybackState {
        *self.inner.state_tx.borrow()
    }

    /// Watch committed states
    pub fn subscribe_state(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of wake-ups delivered to the transition loop
    pub fn wakeup_count(&self) -> u64 {
        self.inner.wakeups.load(Ordering::Relaxed)
    }

    /// Stop playback, clean up and end both player tasks
    pub async fn shutdown(&self) {
        info!("Stopping player");
        {
            let mut machine = self.inner.machine.lock().await;
            machine.shutdown = true;
            machine.next_state = PlaybackState::Stopped;
            self.inner.signal(&mut machine);
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(signals) = tasks.signals.take() {
            signals.abort();
        }
        if let Some(fsm) = tasks.fsm.take() {
            if let Err(e) = fsm.await {
                warn!("Player task ended abnormally: {}", e);
            }
        }
        info!("Player stopped");
    }
}

async fn run_fsm(inner: Arc<Inner>) {
    let mut machine = inner.machine.lock().await;
    loop {
        inner.transition(&mut machine).await;
        if machine.shutdown {
            break;
        }

        machine.wake_pending = false;
        drop(machine);
        debug!("Player: waiting");
        inner.wake.notified().await;
        machine = inner.machine.lock().await;

        inner.cleanup(&mut machine).await;
        if machine.shutdown {
            break;
        }
    }

    inner.cleanup(&mut machine).await;
    machine.state = PlaybackState::Stopped;
    inner.state_tx.send_replace(PlaybackState::Stopped);
    inner.update_status(&mut machine, None).await;
}

impl Inner {
    /// Wake the transition loop unless a wake-up is already outstanding
    pub(super) fn signal(&self, machine: &mut Machine) {
        if machine.wake_pending {
            return;
        }
        machine.wake_pending = true;
        self.wakeups.fetch_add(1, Ordering::Relaxed);
        self.wake.notify_one();
    }

    /// Commit `next_state`, run entry actions until one settles, publish status
    async fn transition(self: &Arc<Self>, machine: &mut Machine) {
        loop {
            let old_state = machine.state;
            let new_state = machine.next_state;
            debug!("Player: {} -> {}", old_state, new_state);
            machine.state = new_state;
            self.state_tx.send_replace(new_state);
            self.deps.state.broadcast_event(RelayEvent::PlaybackStateChanged {
                old_state,
                new_state,
                timestamp: Utc::now(),
            });

            let settled = match new_state {
                PlaybackState::Stopped => self.enter_stopped(machine).await,
                PlaybackState::Streaming => self.enter_streaming(machine).await,
                PlaybackState::Waiting => self.enter_waiting(machine),
                PlaybackState::Cooldown => self.enter_cooldown(machine),
                PlaybackState::Playing => self.enter_playing(machine).await,
            };
            if settled || machine.shutdown {
                break;
            }
        }

        if !(machine.state == PlaybackState::Cooldown && machine.nothing_to_play) {
            self.update_status(machine, None).await;
        }
    }

    // ========================================================================
    // Entry actions (return false to transition again at once)
    // ========================================================================

    async fn enter_stopped(&self, machine: &mut Machine) -> bool {
        self.deps.listeners.clear_queue().await;
        machine.cooldown_pending = true;
        machine.stream = None;
        machine.stream_name.clear();
        true
    }

    async fn enter_streaming(&self, machine: &mut Machine) -> bool {
        self.deps.listeners.clear_queue().await;
        machine.cooldown_pending = true;
        // When the stream ends or fails the player stops
        machine.next_state = PlaybackState::Stopped;

        let Some(request) = machine.stream.as_ref() else {
            warn!("Streaming entered without a stream request");
            return false;
        };
        let requested_title = request.title.clone();
        let locator = request.locator.clone();

        let resolved = match self.deps.resolver.resolve(&locator).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("Failed to resolve stream {}: {}", locator, e);
                self.deps.notifier.announce(Notice::StreamUnavailable { reason: e.to_string() });
                return false;
            }
        };
        machine.stream_name = requested_title
            .or(resolved.title)
            .unwrap_or_else(|| UNTITLED_STREAM.to_string());

        if let Err(e) = self.spawn_decode(machine, &resolved.locator).await {
            error!("Failed to start decoder for stream {}: {}", resolved.locator, e);
            return false;
        }
        info!("Streaming {} ({})", machine.stream_name, resolved.locator);
        true
    }

    fn enter_waiting(&self, machine: &mut Machine) -> bool {
        machine.cooldown_pending = true;
        machine.next_state = PlaybackState::Playing;
        true
    }

    fn enter_cooldown(self: &Arc<Self>, machine: &mut Machine) -> bool {
        machine.next_state = PlaybackState::Playing;
        machine.cooldown_pending = false;

        let inner = Arc::clone(self);
        let delay = self.settings.cooldown;
        machine.cooldown_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut machine = inner.machine.lock().await;
            if machine.state == PlaybackState::Cooldown {
                debug!("Cooldown elapsed");
                inner.signal(&mut machine);
            }
        }));
        true
    }

    async fn enter_playing(&self, machine: &mut Machine) -> bool {
        if !self.deps.listeners.someone_listening().await {
            machine.next_state = PlaybackState::Waiting;
            return false;
        }

        let selector = Selector {
            provider: self.deps.provider.as_ref(),
            listeners: &self.deps.listeners,
            notifier: self.deps.notifier.as_ref(),
            retries: self.settings.content_retries,
        };

        let item = match selector.contributor_item().await {
            Some(item) => item,
            None => {
                if machine.cooldown_pending {
                    machine.next_state = PlaybackState::Cooldown;
                    return false;
                }
                match selector.background_item().await {
                    Some(item) => item,
                    None => {
                        if !machine.nothing_to_play {
                            machine.nothing_to_play = true;
                            self.deps.notifier.announce(Notice::NothingEligible);
                        }
                        machine.cooldown_pending = true;
                        machine.next_state = PlaybackState::Cooldown;
                        return false;
                    }
                }
            }
        };
        machine.nothing_to_play = false;

        if let Err(e) = self.spawn_decode(machine, &item.locator).await {
            error!("Failed to start decoder for {:?}: {}", item.title, e);
            machine.next_state = PlaybackState::Stopped;
            return false;
        }

        info!(
            "Playing {:?} ({}s), contributor {:?}",
            item.title, item.duration_secs, item.contributor
        );
        self.deps.state.broadcast_event(RelayEvent::ItemStarted {
            content_id: item.content_id,
            contributor: item.contributor,
            title: item.title.clone(),
            duration_secs: item.duration_secs,
            timestamp: Utc::now(),
        });
        let listeners = self.deps.listeners.snapshot().await.listener_ids();
        machine.context = Some(PlaybackContext::new(item, listeners));
        true
    }

    /// Start a decoder and attach its output to the pump under a new generation
    async fn spawn_decode(&self, machine: &mut Machine, locator: &str) -> Result<()> {
        let session = self.deps.decoder.spawn(locator)?;
        machine.generation += 1;
        let generation = machine.generation;

        let (input_tx, input_rx) = mpsc::channel(self.settings.input_frames);
        if let Err(e) = self.deps.pump.attach(generation, input_rx) {
            process::terminate(session.child, "decoder").await;
            return Err(e);
        }
        let feeder = process::spawn_feeder(
            generation,
            session.output,
            input_tx,
            self.deps.pump.frame_len(),
            self.decoder_done.clone(),
        );
        debug!("Decoder generation {} attached", generation);
        machine.decode = Some(Decode {
            child: session.child,
            feeder,
        });
        Ok(())
    }

    /// Tear down whatever the previous state left running
    async fn cleanup(&self, machine: &mut Machine) {
        if let Some(context) = machine.context.take() {
            let summary = context.finish(machine.skipped);
            self.deps.state.broadcast_event(RelayEvent::ItemFinished {
                content_id: summary.item.content_id,
                title: summary.item.title.clone(),
                skipped: summary.skipped,
                listeners: summary.listeners.len(),
                skip_votes: summary.skip_voters.len(),
                timestamp: Utc::now(),
            });
            if let Err(e) = self.deps.provider.record_stats(summary).await {
                warn!("Failed to record playback statistics: {}", e);
            }
        }
        machine.skipped = false;

        if let Some(task) = machine.cooldown_task.take() {
            task.abort();
            let _ = task.await;
        }

        if let Some(decode) = machine.decode.take() {
            decode.feeder.abort();
            process::terminate(decode.child, "decoder").await;
        }

        match tokio::time::timeout(self.settings.cleanup_timeout, self.deps.pump.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Pump flush failed: {}", e),
            Err(_) => warn!(
                "Pump did not acknowledge flush within {:?}",
                self.settings.cleanup_timeout
            ),
        }
    }

    /// Republish status and metadata; applies the auto-skip rule while playing
    pub(super) async fn update_status(&self, machine: &mut Machine, snapshot: Option<ListenerSnapshot>) {
        let snapshot = match snapshot {
            Some(snapshot) => snapshot,
            None => self.deps.listeners.snapshot().await,
        };
        let listener_ids = snapshot.listener_ids();

        let playing = machine.state == PlaybackState::Playing;
        if playing {
            if let Some(context) = machine.context.as_mut() {
                context.observe(&listener_ids);
            }
        }

        let text = status::describe(machine.state, machine.context.as_ref(), &machine.stream_name, &snapshot);
        let context = machine.context.as_ref().filter(|_| playing);
        let relay_status = RelayStatus {
            state: machine.state,
            status: text.status.clone(),
            stream_title: text.stream_title.clone(),
            now_playing: context.map(|context| NowPlaying {
                content_id: context.item().content_id,
                contributor: context.contributor(),
                title: context.item().title.clone(),
                duration_secs: context.item().duration_secs,
            }),
            listeners: snapshot.listeners.len() + snapshot.anonymous,
            skip_votes: context.map_or(0, |context| context.skip_votes()),
            hypes: context.map_or(0, |context| context.hypes()),
        };

        if relay_status != self.deps.state.status() {
            self.deps.state.publish_status(relay_status);
            self.deps.state.broadcast_event(RelayEvent::StatusChanged {
                state: machine.state,
                status: text.status.clone(),
                stream_title: text.stream_title.clone(),
                timestamp: Utc::now(),
            });
            self.deps.notifier.status_changed(&text.status);
        }

        if machine.published_title.as_deref() != Some(text.stream_title.as_str()) {
            if let Some(metadata) = &self.deps.metadata {
                if let Err(e) = metadata.set_stream_title(&text.stream_title).await {
                    warn!("Failed to update stream metadata: {}", e);
                }
            }
            machine.published_title = Some(text.stream_title);
        }

        let community_skip = !machine.wake_pending
            && context.is_some_and(|context| context.should_skip(&listener_ids, self.settings.skip_ratio));
        if community_skip {
            info!("Community voted to skip");
            self.deps.notifier.announce(Notice::CommunitySkip);
            machine.skipped = true;
            self.signal(machine);
        }
    }
}
