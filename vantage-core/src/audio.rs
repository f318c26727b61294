//! System-audio capture pipeline: float PCM in, Opus packets out.
//!
//! The platform source delivers interleaved f32 loopback samples at
//! its native rate via [`OpusPipeline::submit_pcm`]. The pipeline
//! accumulates 20 ms frames, linearly resamples to the nearest Opus
//! rate when the device rate is not one, converts to i16 and encodes.
//! Packets land in a bounded queue the dispatch thread pops from;
//! audio is latency-biased, so a full queue drops the incoming packet.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use audiopus::coder::Encoder;
use audiopus::{Application, Bitrate, Channels, SampleRate, Signal};

use crate::error::{Result, VantageError};

/// One compressed packet: payload, capture timestamp, samples per
/// channel.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub data: Vec<u8>,
    pub ts: i64,
    pub samples: u16,
}

/// Packets buffered between the capture and dispatch threads.
pub const AUDIO_QUEUE_MAX: usize = 50;

/// Opus frame duration produced by the pipeline.
pub const FRAME_MS: u32 = 20;

/// Upper bound for one encoded packet.
pub const MAX_OPUS_PACKET: usize = 4000;

// ── AudioQueue ───────────────────────────────────────────────────

/// Bounded FIFO with a blocking pop. Overflow drops the newest packet
/// (the one being pushed).
#[derive(Debug, Default)]
pub struct AudioQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct QueueInner {
    packets: VecDeque<AudioPacket>,
    closed: bool,
}

impl AudioQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a packet; returns `false` when the queue was full and
    /// the packet was dropped.
    pub fn push(&self, packet: AudioPacket) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || inner.packets.len() >= AUDIO_QUEUE_MAX {
            return false;
        }
        inner.packets.push_back(packet);
        self.cond.notify_one();
        true
    }

    /// Wait up to `timeout` for the next packet. Returns `None` on
    /// timeout or when the queue is closed and empty.
    pub fn pop(&self, timeout: Duration) -> Option<AudioPacket> {
        let inner = self.inner.lock().unwrap();
        let (mut inner, _) = self
            .cond
            .wait_timeout_while(inner, timeout, |q| q.packets.is_empty() && !q.closed)
            .unwrap();
        inner.packets.pop_front()
    }

    /// Wake every blocked pop; subsequent pops drain then return `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Platform source seam ─────────────────────────────────────────

/// Lifecycle contract the loopback capture implementation fulfils.
/// Delivery happens by calling [`OpusPipeline::submit_pcm`] from the
/// source's capture thread. Held by the orchestrating thread; the
/// platform stream object need not be `Send`.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
}

// ── Resampling ───────────────────────────────────────────────────

/// Linear-interpolation resample of one interleaved f32 frame block
/// into `dst_frames` i16 frames.
pub fn resample_to_i16(
    src: &[f32],
    channels: usize,
    src_frames: usize,
    dst_frames: usize,
) -> Vec<i16> {
    debug_assert!(src.len() >= src_frames * channels);
    let mut out = vec![0i16; dst_frames * channels];
    if src_frames == 0 || dst_frames == 0 {
        return out;
    }
    if src_frames == dst_frames {
        for (o, &s) in out.iter_mut().zip(src[..src_frames * channels].iter()) {
            *o = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
        }
        return out;
    }
    let ratio = src_frames as f64 / dst_frames as f64;
    for frame in 0..dst_frames {
        let pos = frame as f64 * ratio;
        let i0 = pos as usize;
        let i1 = (i0 + 1).min(src_frames - 1);
        let t = (pos - i0 as f64) as f32;
        for ch in 0..channels {
            let a = src[i0 * channels + ch];
            let b = src[i1 * channels + ch];
            let v = (a * (1.0 - t) + b * t).clamp(-1.0, 1.0);
            out[frame * channels + ch] = (v * 32767.0) as i16;
        }
    }
    out
}

/// Rates Opus accepts natively; other device rates are resampled to
/// 48 kHz.
fn opus_rate_for(device_rate: u32) -> u32 {
    match device_rate {
        8000 | 12000 | 16000 | 24000 | 48000 => device_rate,
        _ => 48000,
    }
}

// ── OpusPipeline ─────────────────────────────────────────────────

/// Accumulates PCM, frames it, resamples and encodes. Thread-safe;
/// `submit_pcm` is called from the platform capture thread only.
pub struct OpusPipeline {
    encoder: Mutex<Encoder>,
    pending: Mutex<Vec<f32>>,
    queue: std::sync::Arc<AudioQueue>,
    device_rate: u32,
    opus_rate: u32,
    channels: usize,
    device_frame_samples: usize,
    opus_frame_samples: usize,
}

impl OpusPipeline {
    pub fn new(
        device_rate: u32,
        channels: u16,
        queue: std::sync::Arc<AudioQueue>,
    ) -> Result<Self> {
        let channels = channels.min(2).max(1) as usize;
        let opus_rate = opus_rate_for(device_rate);
        let sample_rate = SampleRate::try_from(opus_rate as i32)
            .map_err(|e| VantageError::Setup(format!("opus rate: {e:?}")))?;
        let opus_channels = if channels == 1 {
            Channels::Mono
        } else {
            Channels::Stereo
        };
        let encoder = Encoder::new(sample_rate, opus_channels, Application::LowDelay)
            .map_err(|e| VantageError::Setup(format!("opus encoder: {e:?}")))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(128_000))
            .map_err(|e| VantageError::Setup(format!("opus bitrate: {e:?}")))?;
        encoder
            .set_complexity(5)
            .map_err(|e| VantageError::Setup(format!("opus complexity: {e:?}")))?;
        encoder
            .set_signal(Signal::Music)
            .map_err(|e| VantageError::Setup(format!("opus signal: {e:?}")))?;

        tracing::info!("audio: {device_rate}Hz {channels}ch -> opus {opus_rate}Hz");
        Ok(Self {
            encoder: Mutex::new(encoder),
            pending: Mutex::new(Vec::new()),
            queue,
            device_rate,
            opus_rate,
            channels,
            device_frame_samples: (device_rate * FRAME_MS / 1000) as usize,
            opus_frame_samples: (opus_rate * FRAME_MS / 1000) as usize,
        })
    }

    /// Opus output rate.
    pub fn sample_rate(&self) -> u32 {
        self.opus_rate
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Feed interleaved f32 samples captured at the device rate.
    /// Complete 20 ms frames are encoded and queued immediately.
    pub fn submit_pcm(&self, pcm: &[f32], ts: i64) {
        let mut pending = self.pending.lock().unwrap();
        pending.extend_from_slice(pcm);

        let block = self.device_frame_samples * self.channels;
        let mut consumed = 0;
        while pending.len() - consumed >= block {
            let frame = &pending[consumed..consumed + block];
            let samples = resample_to_i16(
                frame,
                self.channels,
                self.device_frame_samples,
                self.opus_frame_samples,
            );
            consumed += block;

            let mut out = vec![0u8; MAX_OPUS_PACKET];
            let encoded = {
                let encoder = self.encoder.lock().unwrap();
                encoder.encode(&samples, &mut out)
            };
            match encoded {
                Ok(len) if len > 0 => {
                    out.truncate(len);
                    self.queue.push(AudioPacket {
                        data: out,
                        ts,
                        samples: self.opus_frame_samples as u16,
                    });
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("opus encode failed: {e:?}"),
            }
        }
        if consumed > 0 {
            pending.drain(..consumed);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
