//! Frame pump thread
//!
//! A fixed-period loop on its own OS thread. Each tick it:
//! 1. Applies pending commands (attach/flush input, add/remove sinks)
//! 2. Reads one frame from the attached input, or substitutes silence
//! 3. Scales the frame by the current volume
//! 4. Offers the frame to every sink without blocking
//!
//! The thread never touches async-side state. It reports back through an
//! unbounded channel ([`PumpEvent`]) and exposes counters through atomics.

use crate::audio::frame::{self, Volume};
use crate::audio::pacer::Pacer;
use crate::audio::sink::{FrameSink, SinkStatus};
use crate::config::PumpConfig;
use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Pump timing and format
#[derive(Debug, Clone)]
pub struct PumpSettings {
    pub frame_len: usize,
    pub period: Duration,
    /// Silent ticks to wait after the input reports it is not ready
    pub backoff_ticks: u32,
    pub initial_gain: f32,
}

impl PumpSettings {
    pub fn from_config(config: &PumpConfig, volume_percent: u32) -> Self {
        Self {
            frame_len: config.frame_len(),
            period: config.period(),
            backoff_ticks: config.backoff_ticks(),
            initial_gain: volume_percent as f32 / 100.0,
        }
    }
}

/// Signals from the pump thread to the async side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEvent {
    /// The attached input closed after delivering data; fired once per input
    InputExhausted { generation: u64 },
}

enum PumpCommand {
    Attach {
        generation: u64,
        input: mpsc::Receiver<Bytes>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
    AddSink {
        name: String,
        sink: Box<dyn FrameSink>,
    },
    RemoveSink {
        name: String,
    },
    Shutdown,
}

/// Pump counters
#[derive(Debug, Default)]
pub struct PumpStats {
    ticks: AtomicU64,
    input_frames: AtomicU64,
    silent_frames: AtomicU64,
    dropped_writes: AtomicU64,
    sinks: AtomicU64,
}

impl PumpStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Frames that carried input data (including padded ones)
    pub fn input_frames(&self) -> u64 {
        self.input_frames.load(Ordering::Relaxed)
    }

    pub fn silent_frames(&self) -> u64 {
        self.silent_frames.load(Ordering::Relaxed)
    }

    /// Frames lost to congested sinks, summed over sinks
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    /// Sinks currently registered
    pub fn sinks(&self) -> u64 {
        self.sinks.load(Ordering::Relaxed)
    }
}

/// Cloneable handle for controlling a running pump
#[derive(Clone)]
pub struct PumpHandle {
    commands: Sender<PumpCommand>,
    volume: Arc<Volume>,
    stats: Arc<PumpStats>,
    frame_len: usize,
}

impl PumpHandle {
    fn send(&self, command: PumpCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Pump("frame pump thread has stopped".to_string()))
    }

    /// Replace the current input; `generation` tags the exhaustion event
    pub fn attach(&self, generation: u64, input: mpsc::Receiver<Bytes>) -> Result<()> {
        self.send(PumpCommand::Attach { generation, input })
    }

    /// Drop the input and any buffered bytes; resolves once the pump has done so
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(PumpCommand::Flush { ack })?;
        done.await
            .map_err(|_| Error::Pump("frame pump stopped before acknowledging flush".to_string()))
    }

    /// Register a sink; a sink with the same name is replaced
    pub fn add_sink(&self, name: impl Into<String>, sink: Box<dyn FrameSink>) -> Result<()> {
        self.send(PumpCommand::AddSink { name: name.into(), sink })
    }

    pub fn remove_sink(&self, name: impl Into<String>) -> Result<()> {
        self.send(PumpCommand::RemoveSink { name: name.into() })
    }

    /// Set the gain, clamped to `[0.0, 2.0]`; returns the applied value
    pub fn set_volume(&self, gain: f32) -> f32 {
        self.volume.set(gain)
    }

    pub fn volume(&self) -> f32 {
        self.volume.get()
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

/// Owner of the pump thread; stops and joins it on drop
pub struct FramePump {
    handle: PumpHandle,
    thread: Option<JoinHandle<()>>,
}

impl FramePump {
    /// Spawn the pump thread
    pub fn start(settings: PumpSettings, events: mpsc::UnboundedSender<PumpEvent>) -> Result<Self> {
        if settings.frame_len == 0 || settings.period.is_zero() {
            return Err(Error::Config("frame length and period must be non-zero".to_string()));
        }

        let (commands, command_rx) = crossbeam_channel::unbounded();
        let volume = Arc::new(Volume::new(settings.initial_gain));
        let stats = Arc::new(PumpStats::default());

        let worker = PumpWorker {
            silence: frame::silence(settings.frame_len),
            settings: settings.clone(),
            commands: command_rx,
            events,
            volume: Arc::clone(&volume),
            stats: Arc::clone(&stats),
            input: None,
            sinks: Vec::new(),
            producer_idle: true,
            backoff_left: 0,
            not_ready_logged: false,
        };

        let thread = std::thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            handle: PumpHandle {
                commands,
                volume,
                stats,
                frame_len: settings.frame_len,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> PumpHandle {
        self.handle.clone()
    }

    /// Stop the thread and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.handle.send(PumpCommand::Shutdown);
            if thread.join().is_err() {
                warn!("Frame pump thread panicked");
            }
        }
    }
}

impl Drop for FramePump {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Pump thread
// ============================================================================

struct Input {
    generation: u64,
    rx: mpsc::Receiver<Bytes>,
    carry: BytesMut,
    disconnected: bool,
}

enum ReadOutcome {
    Frame(Bytes),
    /// Producer closed mid-frame; already zero-padded
    Padded(Bytes),
    /// Producer closed and nothing is left
    Exhausted,
    /// Producer connected but has not delivered a full frame yet
    NotReady,
}

impl Input {
    fn new(generation: u64, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            generation,
            rx,
            carry: BytesMut::new(),
            disconnected: false,
        }
    }

    fn read_frame(&mut self, frame_len: usize) -> ReadOutcome {
        while self.carry.len() < frame_len && !self.disconnected {
            match self.rx.try_recv() {
                Ok(chunk) => self.carry.extend_from_slice(&chunk),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.disconnected = true,
            }
        }

        if self.carry.len() >= frame_len {
            ReadOutcome::Frame(self.carry.split_to(frame_len).freeze())
        } else if self.disconnected {
            if self.carry.is_empty() {
                ReadOutcome::Exhausted
            } else {
                let rest = self.carry.split();
                ReadOutcome::Padded(frame::pad(&rest, frame_len))
            }
        } else {
            ReadOutcome::NotReady
        }
    }
}

struct SinkSlot {
    name: String,
    sink: Box<dyn FrameSink>,
    congested: bool,
}

struct PumpWorker {
    settings: PumpSettings,
    commands: Receiver<PumpCommand>,
    events: mpsc::UnboundedSender<PumpEvent>,
    volume: Arc<Volume>,
    stats: Arc<PumpStats>,
    input: Option<Input>,
    sinks: Vec<SinkSlot>,
    silence: Bytes,
    /// Set until the current input delivers data; debounces InputExhausted
    producer_idle: bool,
    backoff_left: u32,
    not_ready_logged: bool,
}

impl PumpWorker {
    fn run(mut self) {
        info!(
            "Frame pump started: {} bytes every {:?}",
            self.settings.frame_len, self.settings.period
        );
        let mut pacer = Pacer::new(self.settings.period);

        while self.apply_commands() {
            self.tick();
            self.stats.ticks.fetch_add(1, Ordering::Relaxed);
            pacer.wait();
        }

        info!("Frame pump stopped after {} ticks", pacer.ticks());
    }

    /// Returns false when the pump should exit
    fn apply_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(PumpCommand::Attach { generation, input }) => {
                    debug!("Frame pump: attached input generation {}", generation);
                    self.input = Some(Input::new(generation, input));
                    self.reset_input_flags();
                }
                Ok(PumpCommand::Flush { ack }) => {
                    if let Some(input) = self.input.take() {
                        debug!(
                            "Frame pump: flushed input generation {} ({} buffered bytes)",
                            input.generation,
                            input.carry.len()
                        );
                    }
                    self.reset_input_flags();
                    let _ = ack.send(());
                }
                Ok(PumpCommand::AddSink { name, sink }) => {
                    debug!("Frame pump: sink '{}' added", name);
                    self.sinks.retain(|slot| slot.name != name);
                    self.sinks.push(SinkSlot { name, sink, congested: false });
                }
                Ok(PumpCommand::RemoveSink { name }) => {
                    debug!("Frame pump: sink '{}' removed", name);
                    self.sinks.retain(|slot| slot.name != name);
                }
                Ok(PumpCommand::Shutdown) => return false,
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
            self.stats.sinks.store(self.sinks.len() as u64, Ordering::Relaxed);
        }
    }

    fn reset_input_flags(&mut self) {
        self.producer_idle = true;
        self.backoff_left = 0;
        self.not_ready_logged = false;
    }

    fn tick(&mut self) {
        let frame = self.next_frame();
        let frame = self.scale(frame);
        self.fan_out(frame);
    }

    fn next_frame(&mut self) -> Bytes {
        if self.backoff_left > 0 {
            self.backoff_left -= 1;
            return self.silent();
        }

        let frame_len = self.settings.frame_len;
        let Some(input) = self.input.as_mut() else {
            return self.silent();
        };

        match input.read_frame(frame_len) {
            ReadOutcome::Frame(frame) => {
                self.producer_idle = false;
                if self.not_ready_logged {
                    debug!("Frame pump: input ready again");
                    self.not_ready_logged = false;
                }
                self.stats.input_frames.fetch_add(1, Ordering::Relaxed);
                frame
            }
            ReadOutcome::Padded(frame) => {
                self.producer_idle = false;
                debug!("Frame pump: final frame padded with zeros");
                self.stats.input_frames.fetch_add(1, Ordering::Relaxed);
                frame
            }
            ReadOutcome::Exhausted => {
                let generation = input.generation;
                self.input = None;
                if !self.producer_idle {
                    self.producer_idle = true;
                    debug!("Frame pump: input generation {} exhausted", generation);
                    let _ = self.events.send(PumpEvent::InputExhausted { generation });
                }
                self.silent()
            }
            ReadOutcome::NotReady => {
                if !self.not_ready_logged {
                    warn!(
                        "Frame pump: input not ready, substituting silence for {} ticks",
                        self.settings.backoff_ticks
                    );
                    self.not_ready_logged = true;
                }
                self.backoff_left = self.settings.backoff_ticks;
                self.silent()
            }
        }
    }

    fn silent(&self) -> Bytes {
        self.stats.silent_frames.fetch_add(1, Ordering::Relaxed);
        self.silence.clone()
    }

    fn scale(&self, frame: Bytes) -> Bytes {
        let gain = self.volume.get();
        if gain == 1.0 {
            return frame;
        }
        let mut buf = BytesMut::from(&frame[..]);
        frame::apply_gain(&mut buf, gain);
        buf.freeze()
    }

    fn fan_out(&mut self, frame: Bytes) {
        let stats = &self.stats;
        self.sinks.retain_mut(|slot| match slot.sink.try_send(frame.clone()) {
            SinkStatus::Sent => {
                if slot.congested {
                    info!("Frame pump: sink '{}' caught up", slot.name);
                    slot.congested = false;
                }
                true
            }
            SinkStatus::Congested => {
                stats.dropped_writes.fetch_add(1, Ordering::Relaxed);
                if !slot.congested {
                    warn!("Frame pump: sink '{}' congested, dropping frames", slot.name);
                    slot.congested = true;
                }
                true
            }
            SinkStatus::Closed => {
                info!("Frame pump: sink '{}' closed, unregistering", slot.name);
                false
            }
        });
        stats.sinks.store(self.sinks.len() as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::ChannelSink;
    use tokio::time::timeout;

    const FRAME: usize = 4;

    fn settings(backoff_ticks: u32) -> PumpSettings {
        PumpSettings {
            frame_len: FRAME,
            period: Duration::from_millis(5),
            backoff_ticks,
            initial_gain: 1.0,
        }
    }

    async fn next_nonsilent(rx: &mut mpsc::Receiver<Bytes>) -> Bytes {
        loop {
            let frame = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("sink closed");
            assert_eq!(frame.len(), FRAME);
            if frame.iter().any(|b| *b != 0) {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_frames_forwarded_then_exhaustion_fires_once() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();
        let handle = pump.handle();

        let (sink, mut out) = ChannelSink::channel(256);
        handle.add_sink("test", Box::new(sink)).unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        tx.send(Bytes::from_static(&[4, 5, 6, 7, 8])).await.unwrap();
        tx.send(Bytes::from_static(&[9, 9])).await.unwrap();
        drop(tx);
        handle.attach(7, rx).unwrap();

        assert_eq!(next_nonsilent(&mut out).await.as_ref(), &[1, 2, 3, 4]);
        assert_eq!(next_nonsilent(&mut out).await.as_ref(), &[5, 6, 7, 8]);
        assert_eq!(next_nonsilent(&mut out).await.as_ref(), &[9, 9, 0, 0]);

        let event = timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(event, PumpEvent::InputExhausted { generation: 7 });

        // Idle ticks after exhaustion must not re-fire
        assert!(timeout(Duration::from_millis(60), events.recv()).await.is_err());
        pump.shutdown();
    }

    #[tokio::test]
    async fn test_input_that_never_delivers_does_not_fire() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();

        let (tx, rx) = mpsc::channel::<Bytes>(1);
        pump.handle().attach(1, rx).unwrap();
        drop(tx);

        assert!(timeout(Duration::from_millis(60), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_not_ready_input_backs_off_with_silence() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(4), events_tx).unwrap();
        let handle = pump.handle();

        let (sink, mut out) = ChannelSink::channel(256);
        handle.add_sink("test", Box::new(sink)).unwrap();
        let (tx, rx) = mpsc::channel(8);
        handle.attach(1, rx).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(Bytes::from_static(&[5, 5, 5, 5])).await.unwrap();

        assert_eq!(next_nonsilent(&mut out).await.as_ref(), &[5, 5, 5, 5]);
        assert!(handle.stats().silent_frames() >= 4);
        assert_eq!(handle.stats().input_frames(), 1);
    }

    #[tokio::test]
    async fn test_congested_sink_does_not_affect_others() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();
        let handle = pump.handle();

        let (stalled, _stalled_rx) = ChannelSink::channel(1);
        let (healthy, mut healthy_rx) = ChannelSink::channel(256);
        handle.add_sink("stalled", Box::new(stalled)).unwrap();
        handle.add_sink("healthy", Box::new(healthy)).unwrap();

        let mut received = 0;
        while received < 10 {
            timeout(Duration::from_secs(2), healthy_rx.recv()).await.unwrap().unwrap();
            received += 1;
        }
        assert!(handle.stats().dropped_writes() >= 8);
    }

    #[tokio::test]
    async fn test_closed_sink_is_unregistered() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();
        let handle = pump.handle();

        let (sink, rx) = ChannelSink::channel(16);
        handle.add_sink("gone", Box::new(sink)).unwrap();
        drop(rx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.stats().sinks(), 0);
        assert_eq!(handle.stats().dropped_writes(), 0);
    }

    #[tokio::test]
    async fn test_volume_applied_to_frames() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();
        let handle = pump.handle();
        assert_eq!(handle.set_volume(0.5), 0.5);
        assert_eq!(handle.set_volume(7.0), 2.0);
        handle.set_volume(0.5);

        let (sink, mut out) = ChannelSink::channel(256);
        handle.add_sink("test", Box::new(sink)).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let samples: Vec<u8> = [1000i16, -400].iter().flat_map(|s| s.to_le_bytes()).collect();
        tx.send(Bytes::from(samples)).await.unwrap();
        handle.attach(1, rx).unwrap();

        let frame = next_nonsilent(&mut out).await;
        let scaled: Vec<i16> = frame.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect();
        assert_eq!(scaled, vec![500, -200]);
    }

    #[tokio::test]
    async fn test_flush_detaches_input() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();
        let handle = pump.handle();

        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(&[1, 1, 1, 1])).await.unwrap();
        handle.attach(3, rx).unwrap();

        timeout(Duration::from_secs(2), handle.flush()).await.unwrap().unwrap();
        assert!(tx.is_closed());
        drop(tx);

        // A flushed input never reports exhaustion
        assert!(timeout(Duration::from_millis(60), events.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_handle_errors_after_shutdown() {
        let (events_tx, _events) = mpsc::unbounded_channel();
        let pump = FramePump::start(settings(0), events_tx).unwrap();
        let handle = pump.handle();
        pump.shutdown();

        let (_tx, rx) = mpsc::channel(1);
        assert!(matches!(handle.attach(1, rx), Err(Error::Pump(_))));
        assert!(matches!(handle.flush().await, Err(Error::Pump(_))));
    }
}
