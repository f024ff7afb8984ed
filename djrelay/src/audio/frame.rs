//! Frame helpers: silence, padding and gain
//!
//! Frames are interleaved signed 16-bit little-endian PCM.

use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU32, Ordering};

/// Highest accepted gain (200%)
pub const MAX_GAIN: f32 = 2.0;

/// Clamp a requested gain into `[0.0, MAX_GAIN]`; NaN maps to silence
pub fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.clamp(0.0, MAX_GAIN)
    }
}

/// A full frame of zeros
pub fn silence(frame_len: usize) -> Bytes {
    Bytes::from(vec![0u8; frame_len])
}

/// Zero-pad a short read up to `frame_len`
pub fn pad(partial: &[u8], frame_len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(frame_len);
    buf.extend_from_slice(&partial[..partial.len().min(frame_len)]);
    buf.resize(frame_len, 0);
    buf.freeze()
}

/// Scale every s16le sample by `gain`, saturating at the sample range
///
/// A trailing odd byte is left untouched.
pub fn apply_gain(samples: &mut [u8], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for chunk in samples.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]) as f32 * gain;
        let scaled = sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        chunk.copy_from_slice(&scaled.to_le_bytes());
    }
}

/// Lock-free gain shared between the API and the pump thread
///
/// Stored as f32 bits so the real-time thread never takes a lock.
#[derive(Debug)]
pub struct Volume {
    bits: AtomicU32,
}

impl Volume {
    pub fn new(gain: f32) -> Self {
        Self { bits: AtomicU32::new(clamp_gain(gain).to_bits()) }
    }

    /// Current gain, always within `[0.0, MAX_GAIN]`
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Store a clamped gain and return the value actually applied
    pub fn set(&self, gain: f32) -> f32 {
        let clamped = clamp_gain(gain);
        self.bits.store(clamped.to_bits(), Ordering::Relaxed);
        clamped
    }
}

impl Default for Volume {
    fn default() -> Self {
        Self::new(1.0)
    }
}
