//! Session lifecycle state machine.
//!
//! One peer session runs from `Idle` through `Closed`:
//!
//! ```text
//!  Idle ──► Offered ──► GatheringDone ──► Negotiated ──► Connected ──► Authenticated
//!   ▲          │               │               │              │              │
//!   └──────────┴───────────────┴───────── Closed ◄────────────┴──────────────┘
//! ```
//!
//! Streaming is not a separate state: once authenticated, the
//! `fps_received` flag gates outgoing video. Transitions are
//! validated and return `Result` instead of panicking; `close` is
//! accepted from any state and reports whether the session was live
//! so the disconnect callback fires exactly once.

use crate::error::VantageError;

/// The current phase of a peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No offer in flight. Initial state, and the state after `reset`.
    #[default]
    Idle,

    /// A remote offer was applied; the answer is being prepared.
    Offered,

    /// ICE gathering finished (or the LAN short-cut fired).
    GatheringDone,

    /// The answer was handed to the HTTP layer.
    Negotiated,

    /// Peer connection connected and data channel open.
    Connected,

    /// Credentials verified on the channel.
    Authenticated,

    /// Torn down. Terminal until `reset`.
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Offered => "Offered",
            Self::GatheringDone => "GatheringDone",
            Self::Negotiated => "Negotiated",
            Self::Connected => "Connected",
            Self::Authenticated => "Authenticated",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl SessionPhase {
    /// Peer connection and channel are live (authenticated or not).
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// A remote offer arrived. Valid from `Idle` (a closed session
    /// must be `reset` first — each offer gets a fresh session).
    pub fn offer_received(&mut self) -> Result<(), VantageError> {
        match self {
            Self::Idle => {
                *self = Self::Offered;
                Ok(())
            }
            _ => Err(VantageError::ProtocolViolation(
                "offer outside Idle; reset the session first",
            )),
        }
    }

    /// ICE gathering reached Complete (or the LAN short-cut fired).
    pub fn gathering_done(&mut self) -> Result<(), VantageError> {
        match self {
            Self::Offered => {
                *self = Self::GatheringDone;
                Ok(())
            }
            _ => Err(VantageError::ProtocolViolation(
                "gathering-done outside Offered",
            )),
        }
    }

    /// The local answer was returned to the HTTP layer. The LAN
    /// variant may hand the answer out before gathering completes.
    pub fn negotiated(&mut self) -> Result<(), VantageError> {
        match self {
            Self::Offered | Self::GatheringDone => {
                *self = Self::Negotiated;
                Ok(())
            }
            _ => Err(VantageError::ProtocolViolation(
                "negotiated outside Offered/GatheringDone",
            )),
        }
    }

    /// Peer connection state reached Connected and the channel opened.
    pub fn connected(&mut self) -> Result<(), VantageError> {
        match self {
            Self::Negotiated => {
                *self = Self::Connected;
                Ok(())
            }
            _ => Err(VantageError::ProtocolViolation(
                "connected outside Negotiated",
            )),
        }
    }

    /// A matching `AuthRequest` was verified.
    pub fn authenticated(&mut self) -> Result<(), VantageError> {
        match self {
            Self::Connected => {
                *self = Self::Authenticated;
                Ok(())
            }
            _ => Err(VantageError::ProtocolViolation(
                "authenticated outside Connected",
            )),
        }
    }

    /// Tear down from any state. Returns `true` when the session was
    /// live, i.e. the disconnect callback should fire.
    pub fn close(&mut self) -> bool {
        let was_live = self.is_live();
        *self = Self::Closed;
        was_live
    }

    /// Back to `Idle` for the next offer. Valid from `Closed` and
    /// `Idle`.
    pub fn reset(&mut self) -> Result<(), VantageError> {
        match self {
            Self::Closed | Self::Idle => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(VantageError::ProtocolViolation(
                "reset while session in flight",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
