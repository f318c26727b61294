//! Domain-specific error types for the Vantage host.
//!
//! All fallible operations return `Result<T, VantageError>`.
//! Platform and transport failures are caught at component boundaries
//! and converted to counters plus warn-level log lines; only
//! constructor-time failures propagate to the orchestrator as fatal.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, VantageError>;

/// The canonical error type for the Vantage streaming pipeline.
#[derive(Debug, Error)]
pub enum VantageError {
    // ── Configuration Errors ─────────────────────────────────────
    /// Credentials or configuration failed validation at startup.
    #[error("configuration error: {0}")]
    Config(String),

    // ── Setup Errors ─────────────────────────────────────────────
    /// A capture device, encoder, or audio client could not be created.
    #[error("setup failed: {0}")]
    Setup(String),

    /// A monitor index outside the current enumeration was requested.
    #[error("invalid monitor index: {0}")]
    InvalidMonitor(usize),

    // ── Protocol Errors ──────────────────────────────────────────
    /// A control message was shorter than its fixed layout requires.
    #[error("short message: expected at least {expected} bytes, got {actual}")]
    ShortMessage { expected: usize, actual: usize },

    /// A message arrived with a magic value no handler recognises.
    #[error("unknown message magic: {0:#010x}")]
    UnknownMagic(u32),

    /// A message violated protocol rules beyond simple truncation.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// An encoded frame would not fit the 16-bit chunk counter.
    #[error("frame too large: {chunks} chunks (max 65535)")]
    FrameTooLarge { chunks: usize },

    /// A clipboard or audio payload exceeds its configured cap.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    // ── Pipeline Errors ──────────────────────────────────────────
    /// The encoder backend rejected or failed to produce a frame.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A GPU fence or query wait did not finish within its deadline.
    #[error("fence wait timed out after {0:?}")]
    FenceTimeout(Duration),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Transport Errors ─────────────────────────────────────────
    /// The data channel is absent or not open.
    #[error("channel not open")]
    ChannelClosed,

    /// No peer is connected or the session is not authenticated.
    #[error("no active session")]
    NotConnected,

    /// The peer-connection library reported an error.
    #[error("webrtc error: {0}")]
    WebRtc(String),

    /// A send on the data channel failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    // ── Serialization / IO ───────────────────────────────────────
    /// UTF-8 conversion of a wire string failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The filesystem or socket layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl From<webrtc::Error> for VantageError {
    fn from(e: webrtc::Error) -> Self {
        VantageError::WebRtc(e.to_string())
    }
}

impl From<String> for VantageError {
    fn from(s: String) -> Self {
        VantageError::Other(s)
    }
}

impl From<&str> for VantageError {
    fn from(s: &str) -> Self {
        VantageError::Other(s.to_string())
    }
}
