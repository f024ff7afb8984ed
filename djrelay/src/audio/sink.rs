//! Output sinks fed by the frame pump
//!
//! Sinks are written from the real-time thread, so `try_send` must never
//! block: a full sink reports [`SinkStatus::Congested`] and the frame is lost
//! for that sink only.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Result of a non-blocking frame write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Sent,
    /// Consumer is behind; frame dropped
    Congested,
    /// Consumer is gone; the pump unregisters the sink
    Closed,
}

/// Destination for processed frames
pub trait FrameSink: Send {
    fn try_send(&mut self, frame: Bytes) -> SinkStatus;
}

/// Sink backed by a bounded tokio channel
///
/// Used for the broadcast encoder feed and for voice clients that consume
/// frames on the async side.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Create a sink and its receiving end with room for `capacity` frames
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl FrameSink for ChannelSink {
    fn try_send(&mut self, frame: Bytes) -> SinkStatus {
        match self.tx.try_send(frame) {
            Ok(()) => SinkStatus::Sent,
            Err(TrySendError::Full(_)) => SinkStatus::Congested,
            Err(TrySendError::Closed(_)) => SinkStatus::Closed,
        }
    }
}
