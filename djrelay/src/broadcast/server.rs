//! Broadcast hub
//!
//! Owns the connection table and the encoder pipeline. The encoder is
//! started with the first connection and torn down with the last one. Its
//! output is read at most one metadata interval at a time, so block
//! boundaries always fall between reads and metadata can be appended there.

use super::connection::{Connection, DirectStream};
use super::icy;
use crate::audio::{ChannelSink, PumpHandle};
use crate::config::BroadcastConfig;
use crate::error::{ListenerError, MetadataError, Result};
use crate::listeners::{ListenerManager, ListenerUpdate};
use crate::playback::MetadataSink;
use crate::process::{self, EncoderLauncher};
use crate::state::SharedState;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use djrelay_common::events::RelayEvent;
use djrelay_common::{ListenerId, ListenerMode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Name of the pump sink feeding the encoder
pub const SINK_NAME: &str = "broadcast";

struct Pipeline {
    generation: u64,
    child: Option<Child>,
    writer: JoinHandle<()>,
    /// Dropping this stops the reader after its current delivery
    _stop_reader: oneshot::Sender<()>,
}

struct HubState {
    connections: HashMap<ListenerId, Connection>,
    pipeline: Option<Pipeline>,
    /// Encoded bytes since the last metadata boundary
    current_frame: BytesMut,
    meta: Bytes,
    meta_changed: bool,
    generation: u64,
}

#[derive(Debug, Default)]
struct LifecycleStats {
    pipeline_starts: AtomicU64,
    teardowns: AtomicU64,
    dropped_chunks: AtomicU64,
}

struct Hub {
    config: BroadcastConfig,
    /// Frames buffered between the pump and the encoder writer
    sink_queue_frames: usize,
    listeners: Arc<ListenerManager>,
    state: Arc<SharedState>,
    encoder: Arc<dyn EncoderLauncher>,
    pump: PumpHandle,
    shared: Mutex<HubState>,
    stats: LifecycleStats,
}

/// Multi-listener streaming endpoint
#[derive(Clone)]
pub struct BroadcastServer {
    hub: Arc<Hub>,
}

impl BroadcastServer {
    pub fn new(
        config: BroadcastConfig,
        sink_queue_frames: usize,
        listeners: Arc<ListenerManager>,
        state: Arc<SharedState>,
        encoder: Arc<dyn EncoderLauncher>,
        pump: PumpHandle,
    ) -> Self {
        Self {
            hub: Arc::new(Hub {
                config,
                sink_queue_frames: sink_queue_frames.max(1),
                listeners,
                state,
                encoder,
                pump,
                shared: Mutex::new(HubState {
                    connections: HashMap::new(),
                    pipeline: None,
                    current_frame: BytesMut::new(),
                    meta: icy::unchanged(),
                    meta_changed: false,
                    generation: 0,
                }),
                stats: LifecycleStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.hub.config
    }

    pub fn listeners(&self) -> &Arc<ListenerManager> {
        &self.hub.listeners
    }

    /// Spawn the liveness sweep and the revocation watcher
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let hub = Arc::clone(&self.hub);
        let updates = hub.listeners.subscribe();
        tokio::spawn(run_maintenance(hub, updates))
    }

    /// Register a streaming connection for an already validated listener
    ///
    /// Fails with [`ListenerError::VoiceConnected`] when the registry refuses
    /// the direct claim, e.g. the listener joined voice after validating.
    pub async fn connect(&self, listener: ListenerId, metadata: bool) -> Result<DirectStream> {
        let (tx, frames) = mpsc::channel(self.hub.config.connection_queue.max(1));
        let (gate_tx, gate) = oneshot::channel();
        let connection = Connection::new(tx, metadata, gate_tx);
        let serial = connection.serial;
        {
            let mut shared = self.hub.shared.lock().await;
            if shared.pipeline.is_none() {
                self.hub.start_pipeline(&mut shared)?;
            }
            if let Some(mut previous) = shared.connections.insert(listener, connection) {
                debug!("Replacing existing connection of listener {}", listener);
                previous.close();
            }
            info!(
                "Listener {} connected (metadata: {}, {} connections)",
                listener,
                metadata,
                shared.connections.len()
            );
        }

        if !self.hub.listeners.add_listener(listener, ListenerMode::Direct).await {
            self.hub.withdraw(listener, serial).await;
            return Err(ListenerError::VoiceConnected(listener).into());
        }
        self.hub.state.broadcast_event(RelayEvent::DirectListenerConnected {
            listener,
            metadata,
            timestamp: Utc::now(),
        });
        Ok(DirectStream {
            frames,
            gate,
            closed: false,
        })
    }

    /// Close a listener's connection without touching the listener registry
    pub async fn disconnect(&self, listener: ListenerId) -> bool {
        self.hub.disconnect(listener).await
    }

    pub async fn connection_count(&self) -> usize {
        self.hub.shared.lock().await.connections.len()
    }

    pub fn pipeline_starts(&self) -> u64 {
        self.hub.stats.pipeline_starts.load(Ordering::Relaxed)
    }

    pub fn teardowns(&self) -> u64 {
        self.hub.stats.teardowns.load(Ordering::Relaxed)
    }

    /// Chunks dropped for connections whose queue was full
    pub fn dropped_chunks(&self) -> u64 {
        self.hub.stats.dropped_chunks.load(Ordering::Relaxed)
    }

    /// Close every connection and stop the encoder
    pub async fn shutdown(&self) {
        let mut shared = self.hub.shared.lock().await;
        for (_, mut connection) in shared.connections.drain() {
            connection.close();
        }
        self.hub.teardown(&mut shared);
    }
}

#[async_trait]
impl MetadataSink for BroadcastServer {
    async fn set_stream_title(&self, title: &str) -> std::result::Result<(), MetadataError> {
        let block = icy::encode(title, self.hub.config.title_budget)?;
        let mut shared = self.hub.shared.lock().await;
        shared.meta = block;
        shared.meta_changed = true;
        debug!("Stream title set to {:?}", title);
        Ok(())
    }
}

impl Hub {
    fn block_size(&self) -> usize {
        self.config.block_size
    }

    /// Start the encoder and attach it to the pump
    fn start_pipeline(self: &Arc<Self>, shared: &mut HubState) -> Result<()> {
        let session = self.encoder.spawn()?;
        let (sink, frames) = ChannelSink::channel(self.sink_queue_frames);
        if let Err(e) = self.pump.add_sink(SINK_NAME, Box::new(sink)) {
            tokio::spawn(process::terminate(session.child, "encoder"));
            return Err(e);
        }

        shared.generation += 1;
        let generation = shared.generation;
        shared.current_frame.clear();
        let (stop_reader, stop) = oneshot::channel();
        tokio::spawn(read_encoder(Arc::clone(self), generation, session.output, stop));
        shared.pipeline = Some(Pipeline {
            generation,
            child: session.child,
            writer: tokio::spawn(write_encoder(session.input, frames)),
            _stop_reader: stop_reader,
        });

        self.stats.pipeline_starts.fetch_add(1, Ordering::Relaxed);
        info!("Broadcast encoder started (generation {})", generation);
        Ok(())
    }

    /// Stop the encoder pipeline
    ///
    /// Synchronous so it can run from the reader task it stops.
    fn teardown(&self, shared: &mut HubState) {
        let Some(pipeline) = shared.pipeline.take() else {
            return;
        };
        if let Err(e) = self.pump.remove_sink(SINK_NAME) {
            warn!("Failed to detach broadcast sink: {}", e);
        }
        pipeline.writer.abort();
        if pipeline.child.is_some() {
            tokio::spawn(process::terminate(pipeline.child, "encoder"));
        }
        shared.current_frame.clear();
        self.stats.teardowns.fetch_add(1, Ordering::Relaxed);
        info!("Broadcast encoder stopped (generation {})", pipeline.generation);
    }

    /// Fan a chunk of encoder output out to every connection
    ///
    /// Never waits on a client. A full queue drops the chunk for that
    /// connection only; a connection that stays full past the send timeout is
    /// evicted, as is one whose client went away.
    async fn deliver(&self, generation: u64, data: Bytes) {
        let now = Instant::now();
        let limit = self.config.send_timeout();
        let block_size = self.block_size();
        let mut dead = Vec::new();
        {
            let mut shared = self.shared.lock().await;
            let shared = &mut *shared;
            if shared.pipeline.as_ref().map(|p| p.generation) != Some(generation) {
                return;
            }

            if shared.current_frame.len() >= block_size {
                shared.current_frame.clear();
            }
            shared.current_frame.extend_from_slice(&data);
            let frame_complete = shared.current_frame.len() == block_size;

            for (listener, connection) in shared.connections.iter_mut() {
                let fresh = connection.first_send || connection.resync;
                let mut payload = BytesMut::new();
                if connection.resync && connection.metadata && connection.block_sent > 0 {
                    // Finish the interval the client is in so metadata stays aligned
                    payload.resize(block_size - connection.block_sent, 0);
                    payload.extend_from_slice(&shared.meta);
                }
                if fresh {
                    payload.extend_from_slice(&shared.current_frame);
                } else {
                    payload.extend_from_slice(&data);
                }
                if connection.metadata && frame_complete {
                    if fresh || shared.meta_changed {
                        payload.extend_from_slice(&shared.meta);
                    } else {
                        payload.extend_from_slice(&icy::unchanged());
                    }
                }

                match connection.tx.try_send(payload.freeze()) {
                    Ok(()) => {
                        connection.first_send = false;
                        connection.resync = false;
                        connection.congested_since = None;
                        connection.block_sent = if frame_complete { 0 } else { shared.current_frame.len() };
                    }
                    Err(TrySendError::Full(_)) => {
                        self.stats.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                        if connection.congested_since.is_none() {
                            debug!("Listener {} is not keeping up, dropping data", listener);
                            connection.congested_since = Some(now);
                        }
                        if !connection.first_send {
                            connection.resync = true;
                        }
                        if connection.stalled(now, limit) {
                            dead.push((*listener, connection.serial));
                        }
                    }
                    Err(TrySendError::Closed(_)) => dead.push((*listener, connection.serial)),
                }
            }
            if frame_complete {
                shared.meta_changed = false;
            }
        }

        for (listener, serial) in dead {
            debug!("Listener {} stopped accepting data", listener);
            self.evict(listener, Some(serial)).await;
        }
    }

    /// Drop a dead connection and tell the registry the listener left
    async fn evict(&self, listener: ListenerId, serial: Option<Uuid>) {
        {
            let mut shared = self.shared.lock().await;
            let matches = shared
                .connections
                .get(&listener)
                .is_some_and(|connection| serial.map_or(true, |serial| connection.serial == serial));
            if !matches {
                return;
            }
            if let Some(mut connection) = shared.connections.remove(&listener) {
                connection.close();
            }
            if shared.connections.is_empty() {
                self.teardown(&mut shared);
            }
        }

        info!("Listener {} disconnected", listener);
        match self.listeners.remove_listener(listener, ListenerMode::Direct).await {
            Ok(_) => {}
            Err(e) => debug!("Registry already dropped listener {}: {}", listener, e),
        }
        self.state.broadcast_event(RelayEvent::DirectListenerDisconnected {
            listener,
            timestamp: Utc::now(),
        });
    }

    /// Undo a registration the registry refused
    async fn withdraw(&self, listener: ListenerId, serial: Uuid) {
        let mut shared = self.shared.lock().await;
        if shared.connections.get(&listener).map(|c| c.serial) != Some(serial) {
            return;
        }
        if let Some(mut connection) = shared.connections.remove(&listener) {
            connection.close();
        }
        if shared.connections.is_empty() {
            self.teardown(&mut shared);
        }
        warn!("Refused direct connection of listener {} while in voice", listener);
    }

    async fn disconnect(&self, listener: ListenerId) -> bool {
        {
            let mut shared = self.shared.lock().await;
            let Some(mut connection) = shared.connections.remove(&listener) else {
                return false;
            };
            connection.close();
            if shared.connections.is_empty() {
                self.teardown(&mut shared);
            }
        }
        info!("Listener {} connection revoked", listener);
        self.state.broadcast_event(RelayEvent::DirectListenerDisconnected {
            listener,
            timestamp: Utc::now(),
        });
        true
    }

    /// Encoder output closed; a crash while listeners remain evicts all of them
    async fn encoder_closed(&self, generation: u64) {
        let evicted: Vec<ListenerId> = {
            let mut shared = self.shared.lock().await;
            if shared.pipeline.as_ref().map(|p| p.generation) != Some(generation) {
                return;
            }
            warn!("Broadcast encoder output closed with {} connections", shared.connections.len());
            let evicted = shared
                .connections
                .drain()
                .map(|(listener, mut connection)| {
                    connection.close();
                    listener
                })
                .collect();
            self.teardown(&mut shared);
            evicted
        };

        for listener in evicted {
            if let Err(e) = self.listeners.remove_listener(listener, ListenerMode::Direct).await {
                debug!("Registry already dropped listener {}: {}", listener, e);
            }
            self.state.broadcast_event(RelayEvent::DirectListenerDisconnected {
                listener,
                timestamp: Utc::now(),
            });
        }
    }

    /// Evict connections whose client went away or stayed congested too long
    async fn sweep(&self) {
        let now = Instant::now();
        let limit = self.config.send_timeout();
        let closed: Vec<(ListenerId, Uuid)> = {
            let shared = self.shared.lock().await;
            shared
                .connections
                .iter()
                .filter(|(_, connection)| connection.tx.is_closed() || connection.stalled(now, limit))
                .map(|(listener, connection)| (*listener, connection.serial))
                .collect()
        };
        for (listener, serial) in closed {
            self.evict(listener, Some(serial)).await;
        }
    }
}

async fn write_encoder(mut input: Box<dyn AsyncWrite + Send + Unpin>, mut frames: mpsc::Receiver<Bytes>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = input.write_all(&frame).await {
            warn!("Failed to write to broadcast encoder: {}", e);
            break;
        }
    }
    debug!("Broadcast encoder writer finished");
}

async fn read_encoder(
    hub: Arc<Hub>,
    generation: u64,
    mut output: Box<dyn AsyncRead + Send + Unpin>,
    mut stop: oneshot::Receiver<()>,
) {
    let block_size = hub.block_size();
    let mut buf = vec![0u8; block_size];
    // Mirrors the hub's current frame length for this generation
    let mut frame_fill = 0usize;
    loop {
        let want = if frame_fill >= block_size {
            block_size
        } else {
            block_size - frame_fill
        };
        let read = tokio::select! {
            _ = &mut stop => {
                debug!("Broadcast encoder reader {} stopped", generation);
                return;
            }
            read = output.read(&mut buf[..want]) => read,
        };
        let n = match read {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                error!("Failed to read from broadcast encoder: {}", e);
                break;
            }
        };
        frame_fill = if frame_fill >= block_size { n } else { frame_fill + n };
        hub.deliver(generation, Bytes::copy_from_slice(&buf[..n])).await;
    }
    hub.encoder_closed(generation).await;
}

async fn run_maintenance(hub: Arc<Hub>, mut updates: broadcast::Receiver<ListenerUpdate>) {
    let mut ticker = tokio::time::interval(hub.config.sweep_interval());
    loop {
        tokio::select! {
            _ = ticker.tick() => hub.sweep().await,
            update = updates.recv() => match update {
                Ok(update) => {
                    for revocation in update.revoked {
                        if revocation.mode == ListenerMode::Direct {
                            hub.disconnect(revocation.listener).await;
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!("Broadcast server missed {} listener updates", missed);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}
