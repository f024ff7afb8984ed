//! Real-time audio frame pipeline
//!
//! The [`pump::FramePump`] owns a dedicated OS thread that emits exactly one
//! frame per period to every registered [`sink::FrameSink`]. Everything on the
//! async side talks to it through [`pump::PumpHandle`].

pub mod frame;
pub mod pacer;
pub mod pump;
pub mod sink;

pub use frame::Volume;
pub use pacer::Pacer;
pub use pump::{FramePump, PumpEvent, PumpHandle, PumpSettings, PumpStats};
pub use sink::{ChannelSink, FrameSink, SinkStatus};
