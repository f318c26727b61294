//! AV1 video encoding front-end.
//!
//! [`Av1Encoder`] owns keyframe policy and measurement; the actual
//! codec lives behind [`EncoderBackend`]. Backends are tried in order
//! of preference at open time (hardware first, then software) by the
//! host's backend factory; this module is codec-agnostic.
//!
//! A resolution change discards the encoder: the orchestrator
//! constructs a new one from the capture callback's notification, off
//! the capture thread.

pub mod passthrough;

use std::time::{Duration, Instant};

use crate::error::Result;

/// Forced-I-frame cadence: an I-frame is emitted at least this often.
pub const KEY_INTERVAL: Duration = Duration::from_secs(2);

/// Common output parameters every backend applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Target bitrate, bits/second.
    pub bitrate: u64,
    /// Peak bitrate and rate-control buffer, bits/second.
    pub peak_bitrate: u64,
}

impl EncoderConfig {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            bitrate: 20_000_000,
            peak_bitrate: 40_000_000,
        }
    }

    /// GOP length: two seconds of frames.
    pub fn gop(&self) -> u32 {
        self.fps * 2
    }

    /// Worker threads: 1 for hardware paths, `min(4, cores/2)` for
    /// software.
    pub fn software_threads() -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cores / 2).clamp(1, 4)
    }
}

/// One compressed frame unit as produced for the transport.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Concatenated packets of one picture.
    pub data: Vec<u8>,
    /// Source capture timestamp, µs.
    pub ts: i64,
    /// Wall-clock encode latency, µs.
    pub encode_us: u32,
    /// Whether any collected packet carried the key flag.
    pub is_key: bool,
}

/// The codec seam. `submit` may buffer; `drain` collects every packet
/// currently available and reports whether one carried the key flag.
pub trait EncoderBackend: Send {
    type Texture;

    /// Feed one picture. `force_key` requests an I-frame regardless
    /// of GOP position.
    fn submit(&mut self, texture: &Self::Texture, pts: i64, force_key: bool) -> Result<()>;

    /// Append all pending packets to `out`; returns `true` if any
    /// packet was a keyframe.
    fn drain(&mut self, out: &mut Vec<u8>) -> Result<bool>;

    /// Drop all buffered pictures and reset codec state.
    fn reset(&mut self);
}

/// Keyframe policy, latency measurement and packet collection around a
/// backend.
pub struct Av1Encoder<B: EncoderBackend> {
    backend: B,
    config: EncoderConfig,
    frame_number: i64,
    last_key: Instant,
    encoded: u64,
    failed: u64,
}

impl<B: EncoderBackend> Av1Encoder<B> {
    pub fn new(backend: B, config: EncoderConfig) -> Self {
        Self {
            backend,
            config,
            frame_number: 0,
            // Ensure the very first frame is an I-frame.
            last_key: Instant::now() - KEY_INTERVAL,
            encoded: 0,
            failed: 0,
        }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode one texture. Returns `None` when the backend fails or
    /// produced no packets yet (packet-delay warm-up) — the latter is
    /// not an error.
    pub fn encode(
        &mut self,
        texture: &B::Texture,
        ts: i64,
        force_key: bool,
    ) -> Option<EncodedFrame> {
        let start = Instant::now();
        let key = force_key || self.last_key.elapsed() >= KEY_INTERVAL;

        if let Err(e) = self.backend.submit(texture, self.frame_number, key) {
            tracing::warn!("encoder submit failed: {e}");
            self.failed += 1;
            return None;
        }
        self.frame_number += 1;
        if key {
            self.last_key = Instant::now();
        }

        let mut data = Vec::new();
        let saw_key = match self.backend.drain(&mut data) {
            Ok(saw_key) => saw_key,
            Err(e) => {
                tracing::warn!("encoder drain failed: {e}");
                self.failed += 1;
                return None;
            }
        };
        if data.is_empty() {
            return None;
        }

        self.encoded += 1;
        Some(EncodedFrame {
            data,
            ts,
            encode_us: start.elapsed().as_micros() as u32,
            is_key: saw_key,
        })
    }

    /// Drain and reset the codec so the next encoded frame is an IDR.
    /// Used after a reconnect.
    pub fn flush(&mut self) {
        self.backend.reset();
        self.last_key = Instant::now() - KEY_INTERVAL;
    }

    /// Frames successfully encoded since the last call.
    pub fn take_encoded(&mut self) -> u64 {
        std::mem::take(&mut self.encoded)
    }

    /// Frames lost to backend failures since the last call.
    pub fn take_failed(&mut self) -> u64 {
        std::mem::take(&mut self.failed)
    }
}

// ── Tests ────────────────────────────────────────────────────────
