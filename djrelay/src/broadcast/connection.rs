//! Broadcast connections

use bytes::Bytes;
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

/// Server-side state of one streaming connection
pub(super) struct Connection {
    pub(super) tx: mpsc::Sender<Bytes>,
    /// Client asked for in-band metadata
    pub(super) metadata: bool,
    /// Nothing delivered yet; the first payload carries the whole current frame
    pub(super) first_send: bool,
    /// Dropping this ends the HTTP response
    pub(super) gate: Option<oneshot::Sender<()>>,
    /// Distinguishes a replaced connection from its successor
    pub(super) serial: Uuid,
    /// Bytes of the current metadata interval the client has received
    pub(super) block_sent: usize,
    /// A chunk was dropped; the next payload realigns the client
    pub(super) resync: bool,
    /// Start of the current run of full-queue drops
    pub(super) congested_since: Option<Instant>,
}

impl Connection {
    pub(super) fn new(tx: mpsc::Sender<Bytes>, metadata: bool, gate: oneshot::Sender<()>) -> Self {
        Self {
            tx,
            metadata,
            first_send: true,
            gate: Some(gate),
            serial: Uuid::new_v4(),
            block_sent: 0,
            resync: false,
            congested_since: None,
        }
    }

    /// Congested for at least `limit` as of `now`
    pub(super) fn stalled(&self, now: Instant, limit: std::time::Duration) -> bool {
        self.congested_since
            .is_some_and(|since| now.saturating_duration_since(since) >= limit)
    }

    /// Release the liveness gate
    pub(super) fn close(&mut self) {
        self.gate.take();
    }
}

/// Client side of a connection, handed to the HTTP layer
pub struct DirectStream {
    pub(super) frames: mpsc::Receiver<Bytes>,
    pub(super) gate: oneshot::Receiver<()>,
    pub(super) closed: bool,
}

impl DirectStream {
    /// Payloads until the connection is evicted, replaced or the server drops it
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let DirectStream { mut frames, mut gate, closed } = self;
        async_stream::stream! {
            if closed {
                return;
            }
            loop {
                let next = tokio::select! {
                    _ = &mut gate => None,
                    chunk = frames.recv() => chunk,
                };
                match next {
                    Some(chunk) => yield Ok::<_, std::io::Error>(chunk),
                    None => break,
                }
            }
        }
    }

    /// Next payload, or `None` once the connection is closed
    pub async fn recv(&mut self) -> Option<Bytes> {
        if self.closed {
            return None;
        }
        let next = tokio::select! {
            _ = &mut self.gate => None,
            chunk = self.frames.recv() => chunk,
        };
        self.closed = next.is_none();
        next
    }
}
