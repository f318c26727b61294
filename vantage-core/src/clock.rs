//! Timestamp source and session identity.
//!
//! All wire timestamps are microseconds since the Unix epoch as `i64`,
//! matching what the browser client reconstructs on its side. Encode
//! latency measurements use `Instant` internally and never leave the
//! host except as already-computed durations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
pub fn timestamp_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch. Used by the ping liveness check.
pub fn timestamp_ms() -> i64 {
    timestamp_us() / 1000
}

// ── SessionId ────────────────────────────────────────────────────

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Identifier of a single peer session, one per offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next session id (process-wide monotonic).
    pub fn next() -> Self {
        Self(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}
