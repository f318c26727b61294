//! # vantage-core — one-to-one remote desktop streaming pipeline
//!
//! Captures a desktop surface, encodes AV1 video and Opus audio, and
//! streams both plus bidirectional control messages to a single
//! authenticated browser client over a WebRTC data channel.
//!
//! ## Architecture
//!
//! ```text
//! HOST                                              CLIENT (browser)
//! ┌──────────────────────────────┐
//! │ CaptureEngine (texture pool) │
//! │   ↓ FrameSlot (triple buffer)│
//! │ Av1Encoder                   │      "screen"    ┌─────────────┐
//! │   ↓                          │   data channel   │ reassembly  │
//! │ TransportServer ── chunks ──────────────────────► decode/draw │
//! │   ▲      ▲                   │                  └─────────────┘
//! │ OpusPipeline  (audio)        │
//! │ ClipboardSync ◄──────────────────── clipboard / input / control
//! │ InputInjector ◄──────────────│
//! └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module      | Purpose                                            |
//! |-------------|----------------------------------------------------|
//! | `clock`     | Microsecond timestamps, session identity           |
//! | `pipeline`  | Frame slot, GPU fences, texture access             |
//! | `capture`   | Capture engine + backend seam, synthetic backend   |
//! | `encoder`   | AV1 front-end + backend seam, passthrough backend  |
//! | `audio`     | PCM → Opus pipeline and bounded packet queue       |
//! | `input`     | Key mapping and gated input injection              |
//! | `clipboard` | Echo-suppressed clipboard sync, PNG codec          |
//! | `protocol`  | Wire magics and message layouts                    |
//! | `transport` | WebRTC server, session phases, backpressure        |
//! | `monitor`   | Monitor descriptors and shared registry            |
//! | `config`    | `auth.json` / `turn_config.json`                   |
//! | `stats`     | Throughput tracking and the 1 Hz status line       |
//! | `service`   | Orchestrator: threads, wiring, lifecycle           |

pub mod audio;
pub mod capture;
pub mod clipboard;
pub mod clock;
pub mod config;
pub mod encoder;
pub mod error;
pub mod input;
pub mod monitor;
pub mod pipeline;
pub mod protocol;
pub mod service;
pub mod stats;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────

pub use audio::{AudioPacket, AudioQueue, AudioSource, OpusPipeline};
pub use capture::{CaptureBackend, CaptureEngine, CaptureMode, TEXTURE_POOL_SIZE};
pub use clipboard::{ClipboardBackend, ClipboardSync, MemoryClipboard};
pub use clock::{timestamp_us, SessionId};
pub use config::{AuthConfig, TurnConfig};
pub use encoder::{Av1Encoder, EncodedFrame, EncoderBackend, EncoderConfig};
pub use error::{Result, VantageError};
pub use input::{InputBackend, InputInjector, MonitorBounds, NullInputBackend};
pub use monitor::{MonitorInfo, MonitorRegistry};
pub use pipeline::{FenceTicket, Frame, FrameSlot, GpuFence, TexturePixels};
pub use service::{EncoderFactory, StreamService};
pub use transport::{
    Credentials, TransportCallbacks, TransportConfig, TransportServer, CHANNEL_LABEL,
};
