//! Player operations and external signals
//!
//! Control operations wait for the transition lock. Vote-class operations
//! only try it and answer [`PlayerError::Busy`] while a transition runs.

use super::player::{Inner, Player, StreamRequest};
use crate::audio::PumpEvent;
use crate::error::PlayerError;
use crate::listeners::{ListenerSnapshot, ListenerUpdate};
use crate::notify::Notice;
use crate::process::DecoderFinished;
use chrono::Utc;
use djrelay_common::events::RelayEvent;
use djrelay_common::{ListenerId, PlaybackState};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Highest accepted volume, in percent
pub const MAX_VOLUME_PERCENT: u32 = 200;

impl Player {
    // ========================================================================
    // Control operations
    // ========================================================================

    pub async fn request_stop(&self) {
        let mut machine = self.inner.machine.lock().await;
        if machine.state != PlaybackState::Stopped {
            info!("Stop requested");
            machine.next_state = PlaybackState::Stopped;
            self.inner.signal(&mut machine);
        }
    }

    /// Enter contributor mode; only valid from Stopped or Streaming
    pub async fn request_dj_mode(&self) -> bool {
        let mut machine = self.inner.machine.lock().await;
        match machine.state {
            PlaybackState::Stopped | PlaybackState::Streaming => {
                info!("DJ mode requested");
                machine.next_state = PlaybackState::Playing;
                self.inner.signal(&mut machine);
                true
            }
            _ => false,
        }
    }

    /// Relay an external stream; repeating the running stream is a no-op
    pub async fn request_stream(&self, locator: impl Into<String>, title: Option<String>) -> bool {
        let locator = locator.into();
        let mut machine = self.inner.machine.lock().await;
        let same_stream = machine.state == PlaybackState::Streaming
            && machine.stream.as_ref().is_some_and(|stream| stream.locator == locator);
        if same_stream {
            return false;
        }

        info!("Stream requested: {}", locator);
        machine.stream = Some(StreamRequest { locator, title });
        machine.next_state = PlaybackState::Streaming;
        self.inner.signal(&mut machine);
        true
    }

    // ========================================================================
    // Vote-class operations
    // ========================================================================

    pub async fn vote_skip(&self, listener: ListenerId) -> Result<(), PlayerError> {
        let mut machine = self.inner.machine.try_lock().map_err(|_| PlayerError::Busy)?;
        if machine.state != PlaybackState::Playing {
            return Err(PlayerError::NotPlaying);
        }
        let context = machine.context.as_mut().ok_or(PlayerError::NotPlaying)?;

        if context.contributor() == Some(listener) {
            info!("Item skipped by its contributor {}", listener);
            self.inner.deps.notifier.announce(Notice::SkippedByContributor);
            machine.skipped = true;
            self.inner.signal(&mut machine);
            return Ok(());
        }

        if context.vote(listener) {
            debug!("Skip vote from {}", listener);
        }
        self.inner.update_status(&mut machine, None).await;
        Ok(())
    }

    pub async fn unvote_skip(&self, listener: ListenerId) -> Result<(), PlayerError> {
        let mut machine = self.inner.machine.try_lock().map_err(|_| PlayerError::Busy)?;
        if machine.state != PlaybackState::Playing {
            return Err(PlayerError::NotPlaying);
        }
        let context = machine.context.as_mut().ok_or(PlayerError::NotPlaying)?;
        if context.unvote(listener) {
            self.inner.update_status(&mut machine, None).await;
        }
        Ok(())
    }

    /// Hype the current item; replaces a skip vote of the same listener
    pub async fn hype(&self, listener: ListenerId) -> Result<(), PlayerError> {
        let mut machine = self.inner.machine.try_lock().map_err(|_| PlayerError::Busy)?;
        if machine.state != PlaybackState::Playing {
            return Err(PlayerError::NotPlaying);
        }
        let context = machine.context.as_mut().ok_or(PlayerError::NotPlaying)?;
        if context.hype(listener) {
            debug!("Hype from {}", listener);
            self.inner.update_status(&mut machine, None).await;
        }
        Ok(())
    }

    pub async fn unhype(&self, listener: ListenerId) -> Result<(), PlayerError> {
        let mut machine = self.inner.machine.try_lock().map_err(|_| PlayerError::Busy)?;
        if machine.state != PlaybackState::Playing {
            return Err(PlayerError::NotPlaying);
        }
        let context = machine.context.as_mut().ok_or(PlayerError::NotPlaying)?;
        if context.unhype(listener) {
            self.inner.update_status(&mut machine, None).await;
        }
        Ok(())
    }

    pub async fn force_skip(&self) -> Result<(), PlayerError> {
        let mut machine = self.inner.machine.try_lock().map_err(|_| PlayerError::Busy)?;
        if !machine.state.is_active() {
            return Err(PlayerError::NotPlaying);
        }
        info!("Forced skip");
        machine.skipped = true;
        self.inner.signal(&mut machine);
        Ok(())
    }

    /// Rename the running stream
    pub async fn set_stream_title(&self, title: impl Into<String>) -> Result<(), PlayerError> {
        let mut machine = self.inner.machine.try_lock().map_err(|_| PlayerError::Busy)?;
        if machine.state != PlaybackState::Streaming {
            return Err(PlayerError::InvalidState(machine.state));
        }
        machine.stream_name = title.into();
        self.inner.update_status(&mut machine, None).await;
        Ok(())
    }

    // ========================================================================
    // Volume
    // ========================================================================

    /// Set output volume in percent (0-200); returns the applied value
    pub fn set_volume(&self, percent: u32) -> Result<u32, PlayerError> {
        if percent > MAX_VOLUME_PERCENT {
            return Err(PlayerError::InvalidVolume(percent));
        }
        let gain = self.inner.deps.pump.set_volume(percent as f32 / 100.0);
        let applied = (gain * 100.0).round() as u32;
        info!("Volume set to {}%", applied);
        self.inner.deps.state.broadcast_event(RelayEvent::VolumeChanged {
            percent: applied,
            timestamp: Utc::now(),
        });
        Ok(applied)
    }

    pub fn volume(&self) -> u32 {
        (self.inner.deps.pump.volume() * 100.0).round() as u32
    }
}

impl Inner {
    /// The decoder input of `generation` ran out
    async fn playback_ended(&self, generation: u64) {
        let mut machine = self.machine.lock().await;
        if generation != machine.generation || !machine.state.is_active() || machine.wake_pending {
            debug!("Ignoring end of generation {}", generation);
            return;
        }
        info!("Playback of generation {} ended", generation);
        if machine.state == PlaybackState::Streaming {
            self.deps.notifier.announce(Notice::StreamEnded);
        }
        self.signal(&mut machine);
    }

    /// React to a change in the listener set or contributor queue
    async fn users_changed(&self, snapshot: ListenerSnapshot) {
        let mut machine = self.machine.lock().await;
        if machine.state == PlaybackState::Stopped {
            return;
        }

        if snapshot.someone_listening() {
            if machine.state == PlaybackState::Waiting {
                self.signal(&mut machine);
                return;
            }
        } else if machine.state == PlaybackState::Cooldown {
            machine.cooldown_pending = true;
            self.signal(&mut machine);
            return;
        }

        if snapshot.contributors_present() {
            machine.cooldown_pending = true;
            if machine.state == PlaybackState::Cooldown {
                self.signal(&mut machine);
                return;
            }
        }

        self.update_status(&mut machine, Some(snapshot)).await;
    }

    fn publish_listeners(&self, snapshot: &ListenerSnapshot) {
        self.deps.state.broadcast_event(RelayEvent::ListenersChanged {
            listeners: snapshot.listeners.len(),
            anonymous: snapshot.anonymous,
            queue: snapshot.queue.clone(),
            timestamp: Utc::now(),
        });
    }
}

/// Funnel pump, decoder and listener signals into the player
pub(super) async fn run_signals(
    inner: Arc<Inner>,
    mut pump_events: mpsc::UnboundedReceiver<PumpEvent>,
    mut decoder_done: mpsc::UnboundedReceiver<DecoderFinished>,
    mut updates: broadcast::Receiver<ListenerUpdate>,
) {
    loop {
        tokio::select! {
            Some(event) = pump_events.recv() => match event {
                PumpEvent::InputExhausted { generation } => inner.playback_ended(generation).await,
            },
            Some(done) = decoder_done.recv() => {
                // Output that reached the pump ends through InputExhausted instead
                if done.bytes == 0 {
                    warn!("Decoder generation {} produced no audio", done.generation);
                    inner.playback_ended(done.generation).await;
                }
            }
            update = updates.recv() => match update {
                Ok(update) => {
                    inner.publish_listeners(&update.snapshot);
                    inner.users_changed(update.snapshot).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Player missed {} listener updates; resynchronizing", missed);
                    let snapshot = inner.deps.listeners.snapshot().await;
                    inner.publish_listeners(&snapshot);
                    inner.users_changed(snapshot).await;
                }
                Err(RecvError::Closed) => break,
            },
            else => break,
        }
    }
    debug!("Player signal loop finished");
}
