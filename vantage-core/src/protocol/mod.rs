//! Wire protocol for the "screen" data channel.
//!
//! Every message starts with a 4-byte magic selecting the type. All
//! multi-byte fields are little-endian and structs are packed without
//! padding. Unknown magics are ignored by the receiver.
//!
//! ## Video fragmentation
//!
//! An encoded frame unit is split into chunks of at most
//! [`DATA_CHUNK_SIZE`] bytes, each prefixed with a [`PacketHeader`]
//! (21 bytes):
//!
//! ```text
//! ts:           i64  (8)   capture timestamp, µs
//! encode_us:    u32  (4)   encoder latency for this frame
//! frame_id:     u32  (4)   monotonic sender counter
//! chunk_index:  u16  (2)
//! total_chunks: u16  (2)
//! frame_type:   u8   (1)   1 = keyframe
//! ```
//!
//! The client reassembles by `(frame_id, total_chunks)` and discards
//! any partial set when a new frame starts.

use crate::error::{Result, VantageError};
use crate::monitor::MonitorInfo;

// ── Magic constants ──────────────────────────────────────────────

const fn magic(b: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*b)
}

pub const MSG_PING: u32 = magic(b"PNGP");
pub const MSG_FPS_SET: u32 = magic(b"FPSC");
pub const MSG_FPS_ACK: u32 = magic(b"FPSA");
pub const MSG_HOST_INFO: u32 = magic(b"HOST");
pub const MSG_REQUEST_KEY: u32 = magic(b"KEYR");
pub const MSG_MONITOR_LIST: u32 = magic(b"MONL");
pub const MSG_MONITOR_SET: u32 = magic(b"MONS");
pub const MSG_AUDIO_DATA: u32 = magic(b"AUDI");
pub const MSG_MOUSE_MOVE: u32 = magic(b"MOVE");
pub const MSG_MOUSE_BTN: u32 = magic(b"MBTN");
pub const MSG_MOUSE_WHEEL: u32 = magic(b"MWHL");
pub const MSG_KEY: u32 = magic(b"KEY ");
pub const MSG_AUTH_REQUEST: u32 = magic(b"AUTH");
pub const MSG_AUTH_RESPONSE: u32 = magic(b"AUTR");
pub const MSG_CLIPBOARD_TEXT: u32 = magic(b"CLPT");
pub const MSG_CLIPBOARD_IMAGE: u32 = magic(b"CLPI");
pub const MSG_CLIPBOARD_REQUEST: u32 = magic(b"CLPR");
pub const MSG_CLIPBOARD_ACK: u32 = magic(b"CLPA");

/// Read the leading magic of a raw channel message, if present.
pub fn peek_magic(data: &[u8]) -> Option<u32> {
    if data.len() < 4 {
        return None;
    }
    Some(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
}

// ── PacketHeader ─────────────────────────────────────────────────

/// Per-chunk metadata prepended to each video fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub ts: i64,
    pub encode_us: u32,
    pub frame_id: u32,
    pub chunk_index: u16,
    pub total_chunks: u16,
    pub frame_type: u8,
}

impl PacketHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 21;

    /// Serialize into `buf[..SIZE]` (little-endian).
    pub fn write_to(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.ts.to_le_bytes());
        buf[8..12].copy_from_slice(&self.encode_us.to_le_bytes());
        buf[12..16].copy_from_slice(&self.frame_id.to_le_bytes());
        buf[16..18].copy_from_slice(&self.chunk_index.to_le_bytes());
        buf[18..20].copy_from_slice(&self.total_chunks.to_le_bytes());
        buf[20] = self.frame_type;
    }

    /// Deserialize from bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            ts: i64::from_le_bytes(data[0..8].try_into().unwrap()),
            encode_us: u32::from_le_bytes(data[8..12].try_into().unwrap()),
            frame_id: u32::from_le_bytes(data[12..16].try_into().unwrap()),
            chunk_index: u16::from_le_bytes(data[16..18].try_into().unwrap()),
            total_chunks: u16::from_le_bytes(data[18..20].try_into().unwrap()),
            frame_type: data[20],
        })
    }
}

// ── Audio ────────────────────────────────────────────────────────

/// Header for one Opus packet: magic, timestamp, sample count, length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioHeader {
    pub ts: i64,
    pub samples: u16,
    pub data_len: u16,
}

/// Maximum Opus payload carried in one audio message.
pub const MAX_AUDIO_PAYLOAD: usize = 4000;

impl AudioHeader {
    pub const SIZE: usize = 16;

    /// Build the full wire message: header followed by the Opus payload.
    pub fn encode_message(ts: i64, samples: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE + payload.len());
        buf.extend_from_slice(&MSG_AUDIO_DATA.to_le_bytes());
        buf.extend_from_slice(&ts.to_le_bytes());
        buf.extend_from_slice(&samples.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            ts: i64::from_le_bytes(data[4..12].try_into().unwrap()),
            samples: u16::from_le_bytes(data[12..14].try_into().unwrap()),
            data_len: u16::from_le_bytes(data[14..16].try_into().unwrap()),
        })
    }
}

// ── Authentication ───────────────────────────────────────────────

/// Client credential presentation: `u_len` bytes of username followed
/// by `p_len` bytes of PIN after the fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub username: String,
    pub pin: String,
}

impl AuthRequest {
    pub const HEADER_SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + self.username.len() + self.pin.len());
        buf.extend_from_slice(&MSG_AUTH_REQUEST.to_le_bytes());
        buf.push(self.username.len() as u8);
        buf.push(self.pin.len() as u8);
        buf.extend_from_slice(self.username.as_bytes());
        buf.extend_from_slice(self.pin.as_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::HEADER_SIZE,
                actual: data.len(),
            });
        }
        let u_len = data[4] as usize;
        let p_len = data[5] as usize;
        if data.len() < Self::HEADER_SIZE + u_len + p_len {
            return Err(VantageError::ShortMessage {
                expected: Self::HEADER_SIZE + u_len + p_len,
                actual: data.len(),
            });
        }
        let username = String::from_utf8(data[6..6 + u_len].to_vec())?;
        let pin = String::from_utf8(data[6 + u_len..6 + u_len + p_len].to_vec())?;
        Ok(Self { username, pin })
    }
}

/// Server verdict: `success` flag plus a human-readable reason on
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub success: bool,
    pub error: String,
}

impl AuthResponse {
    pub const HEADER_SIZE: usize = 6;

    pub fn encode(&self) -> Vec<u8> {
        let err = if self.success { "" } else { self.error.as_str() };
        let err_bytes = &err.as_bytes()[..err.len().min(255)];
        let mut buf = Vec::with_capacity(Self::HEADER_SIZE + err_bytes.len());
        buf.extend_from_slice(&MSG_AUTH_RESPONSE.to_le_bytes());
        buf.push(self.success as u8);
        buf.push(err_bytes.len() as u8);
        buf.extend_from_slice(err_bytes);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::HEADER_SIZE,
                actual: data.len(),
            });
        }
        let err_len = data[5] as usize;
        if data.len() < Self::HEADER_SIZE + err_len {
            return Err(VantageError::ShortMessage {
                expected: Self::HEADER_SIZE + err_len,
                actual: data.len(),
            });
        }
        Ok(Self {
            success: data[4] != 0,
            error: String::from_utf8(data[6..6 + err_len].to_vec())?,
        })
    }
}

// ── Control messages ─────────────────────────────────────────────

/// `MSG_PING` is exactly 16 bytes: magic + 12 opaque bytes. The reply
/// echoes all 16 and appends the server timestamp (24 bytes total).
pub const PING_SIZE: usize = 16;
pub const PING_REPLY_SIZE: usize = 24;

pub fn encode_ping_reply(ping: &[u8], server_ts_us: i64) -> Option<Vec<u8>> {
    if ping.len() != PING_SIZE {
        return None;
    }
    let mut buf = Vec::with_capacity(PING_REPLY_SIZE);
    buf.extend_from_slice(ping);
    buf.extend_from_slice(&(server_ts_us as u64).to_le_bytes());
    Some(buf)
}

/// Client FPS request: u16 fps plus a mode byte.
///
/// Mode 0 = explicit, 1 = match host refresh, 2 = fixed. Only mode 1
/// changes behavior host-side; 0 and 2 are equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpsSet {
    pub fps: u16,
    pub mode: u8,
}

impl FpsSet {
    pub const SIZE: usize = 7;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&MSG_FPS_SET.to_le_bytes());
        buf[4..6].copy_from_slice(&self.fps.to_le_bytes());
        buf[6] = self.mode;
        buf
    }

    /// Strict decode: the message is exactly 7 bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            fps: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            mode: data[6],
        })
    }

    /// Whether the values are inside the accepted envelope.
    pub fn is_valid(&self) -> bool {
        (1..=240).contains(&self.fps) && self.mode <= 2
    }
}

/// Server FPS acknowledgement: same layout as [`FpsSet`] under
/// `MSG_FPS_ACK`, carrying the effective values.
pub fn encode_fps_ack(fps: u16, mode: u8) -> [u8; FpsSet::SIZE] {
    let mut buf = [0u8; FpsSet::SIZE];
    buf[0..4].copy_from_slice(&MSG_FPS_ACK.to_le_bytes());
    buf[4..6].copy_from_slice(&fps.to_le_bytes());
    buf[6] = mode;
    buf
}

/// Host refresh rate, sent post-auth and on monitor switch.
pub fn encode_host_info(fps: u16) -> [u8; 6] {
    let mut buf = [0u8; 6];
    buf[0..4].copy_from_slice(&MSG_HOST_INFO.to_le_bytes());
    buf[4..6].copy_from_slice(&fps.to_le_bytes());
    buf
}

pub fn decode_host_info(data: &[u8]) -> Result<u16> {
    if data.len() < 6 {
        return Err(VantageError::ShortMessage {
            expected: 6,
            actual: data.len(),
        });
    }
    Ok(u16::from_le_bytes(data[4..6].try_into().unwrap()))
}

/// Monitor switch request: magic + u8 index, exactly 5 bytes.
pub fn encode_monitor_set(index: u8) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0..4].copy_from_slice(&MSG_MONITOR_SET.to_le_bytes());
    buf[4] = index;
    buf
}

pub fn decode_monitor_set(data: &[u8]) -> Result<u8> {
    if data.len() != 5 {
        return Err(VantageError::ShortMessage {
            expected: 5,
            actual: data.len(),
        });
    }
    Ok(data[4])
}

// ── Monitor list ─────────────────────────────────────────────────

/// Maximum device-name bytes carried per monitor entry.
pub const MONITOR_NAME_MAX: usize = 63;

/// Encode the monitor list message: magic, count, current index, then
/// per monitor `{idx, w, h, refresh, primary, name_len, name}`.
pub fn encode_monitor_list(monitors: &[MonitorInfo], current: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + monitors.len() * 74);
    buf.extend_from_slice(&MSG_MONITOR_LIST.to_le_bytes());
    buf.push(monitors.len() as u8);
    buf.push(current);
    for m in monitors {
        buf.push(m.index);
        buf.extend_from_slice(&m.width.to_le_bytes());
        buf.extend_from_slice(&m.height.to_le_bytes());
        buf.extend_from_slice(&m.refresh_hz.to_le_bytes());
        buf.push(m.primary as u8);
        let name = &m.name.as_bytes()[..m.name.len().min(MONITOR_NAME_MAX)];
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);
    }
    buf
}

/// Decode a monitor list message; the inverse of [`encode_monitor_list`].
pub fn decode_monitor_list(data: &[u8]) -> Result<(Vec<MonitorInfo>, u8)> {
    if data.len() < 6 {
        return Err(VantageError::ShortMessage {
            expected: 6,
            actual: data.len(),
        });
    }
    let count = data[4] as usize;
    let current = data[5];
    let mut monitors = Vec::with_capacity(count);
    let mut o = 6usize;
    for _ in 0..count {
        if data.len() < o + 9 {
            return Err(VantageError::ProtocolViolation("truncated monitor entry"));
        }
        let index = data[o];
        let width = u16::from_le_bytes(data[o + 1..o + 3].try_into().unwrap());
        let height = u16::from_le_bytes(data[o + 3..o + 5].try_into().unwrap());
        let refresh_hz = u16::from_le_bytes(data[o + 5..o + 7].try_into().unwrap());
        let primary = data[o + 7] != 0;
        let name_len = data[o + 8] as usize;
        o += 9;
        if data.len() < o + name_len {
            return Err(VantageError::ProtocolViolation("truncated monitor name"));
        }
        let name = String::from_utf8(data[o..o + name_len].to_vec())?;
        o += name_len;
        monitors.push(MonitorInfo {
            index,
            x: 0,
            y: 0,
            width,
            height,
            refresh_hz,
            primary,
            name,
        });
    }
    Ok((monitors, current))
}

// ── Input messages ───────────────────────────────────────────────

/// Normalized cursor move, `x`/`y` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseMoveMsg {
    pub x: f32,
    pub y: f32,
}

impl MouseMoveMsg {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&MSG_MOUSE_MOVE.to_le_bytes());
        buf[4..8].copy_from_slice(&self.x.to_le_bytes());
        buf[8..12].copy_from_slice(&self.y.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            x: f32::from_le_bytes(data[4..8].try_into().unwrap()),
            y: f32::from_le_bytes(data[8..12].try_into().unwrap()),
        })
    }
}

/// Button edge: `button` 0..=4 (left, right, middle, x1, x2),
/// `action` 0 = up, 1 = down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseButtonMsg {
    pub button: u8,
    pub action: u8,
}

impl MouseButtonMsg {
    pub const SIZE: usize = 6;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&MSG_MOUSE_BTN.to_le_bytes());
        buf[4] = self.button;
        buf[5] = self.action;
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            button: data[4],
            action: data[5],
        })
    }
}

/// Wheel ticks. The cursor position floats are part of the wire
/// layout but the host only consults the deltas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseWheelMsg {
    pub delta_x: i16,
    pub delta_y: i16,
    pub x: f32,
    pub y: f32,
}

impl MouseWheelMsg {
    pub const SIZE: usize = 16;
    /// Deltas alone suffice; clients may omit the trailing floats.
    pub const MIN_SIZE: usize = 8;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&MSG_MOUSE_WHEEL.to_le_bytes());
        buf[4..6].copy_from_slice(&self.delta_x.to_le_bytes());
        buf[6..8].copy_from_slice(&self.delta_y.to_le_bytes());
        buf[8..12].copy_from_slice(&self.x.to_le_bytes());
        buf[12..16].copy_from_slice(&self.y.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::MIN_SIZE,
                actual: data.len(),
            });
        }
        let (x, y) = if data.len() >= Self::SIZE {
            (
                f32::from_le_bytes(data[8..12].try_into().unwrap()),
                f32::from_le_bytes(data[12..16].try_into().unwrap()),
            )
        } else {
            (0.0, 0.0)
        };
        Ok(Self {
            delta_x: i16::from_le_bytes(data[4..6].try_into().unwrap()),
            delta_y: i16::from_le_bytes(data[6..8].try_into().unwrap()),
            x,
            y,
        })
    }
}

/// Keyboard edge carrying a JavaScript-style key code. `modifiers` is
/// part of the wire format but not consulted host-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyMsg {
    pub key_code: u16,
    pub scan_code: u16,
    pub action: u8,
    pub modifiers: u8,
}

impl KeyMsg {
    pub const SIZE: usize = 10;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&MSG_KEY.to_le_bytes());
        buf[4..6].copy_from_slice(&self.key_code.to_le_bytes());
        buf[6..8].copy_from_slice(&self.scan_code.to_le_bytes());
        buf[8] = self.action;
        buf[9] = self.modifiers;
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(VantageError::ShortMessage {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        Ok(Self {
            key_code: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            scan_code: u16::from_le_bytes(data[6..8].try_into().unwrap()),
            action: data[8],
            modifiers: data[9],
        })
    }
}

// ── Clipboard messages ───────────────────────────────────────────

/// Build a clipboard text message: `{magic, len: u32, utf8 bytes}`.
pub fn encode_clipboard_text(text: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + text.len());
    buf.extend_from_slice(&MSG_CLIPBOARD_TEXT.to_le_bytes());
    buf.extend_from_slice(&(text.len() as u32).to_le_bytes());
    buf.extend_from_slice(text);
    buf
}

/// Parse a clipboard text message, returning the UTF-8 payload.
pub fn decode_clipboard_text(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 8 {
        return Err(VantageError::ShortMessage {
            expected: 8,
            actual: data.len(),
        });
    }
    let len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    if data.len() < 8 + len {
        return Err(VantageError::ProtocolViolation("truncated clipboard text"));
    }
    Ok(&data[8..8 + len])
}

/// Build a clipboard image message:
/// `{magic, w: u32, h: u32, data_len: u32, PNG bytes}`.
pub fn encode_clipboard_image(width: u32, height: u32, png: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + png.len());
    buf.extend_from_slice(&MSG_CLIPBOARD_IMAGE.to_le_bytes());
    buf.extend_from_slice(&width.to_le_bytes());
    buf.extend_from_slice(&height.to_le_bytes());
    buf.extend_from_slice(&(png.len() as u32).to_le_bytes());
    buf.extend_from_slice(png);
    buf
}

/// Parse a clipboard image message into `(width, height, png bytes)`.
pub fn decode_clipboard_image(data: &[u8]) -> Result<(u32, u32, &[u8])> {
    if data.len() < 16 {
        return Err(VantageError::ShortMessage {
            expected: 16,
            actual: data.len(),
        });
    }
    let width = u32::from_le_bytes(data[4..8].try_into().unwrap());
    let height = u32::from_le_bytes(data[8..12].try_into().unwrap());
    let len = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
    if data.len() < 16 + len {
        return Err(VantageError::ProtocolViolation("truncated clipboard image"));
    }
    Ok((width, height, &data[16..16 + len]))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magics_spell_their_ascii() {
        assert_eq!(&MSG_PING.to_le_bytes(), b"PNGP");
        assert_eq!(&MSG_FPS_SET.to_le_bytes(), b"FPSC");
        assert_eq!(&MSG_AUTH_REQUEST.to_le_bytes(), b"AUTH");
        assert_eq!(&MSG_AUTH_RESPONSE.to_le_bytes(), b"AUTR");
        assert_eq!(&MSG_KEY.to_le_bytes(), b"KEY ");
        assert_eq!(&MSG_CLIPBOARD_ACK.to_le_bytes(), b"CLPA");
    }

    #[test]
    fn packet_header_roundtrip() {
        let hdr = PacketHeader {
            ts: 1_700_000_000_000_000,
            encode_us: 2500,
            frame_id: 42,
            chunk_index: 3,
            total_chunks: 8,
            frame_type: 1,
        };
        let mut buf = [0u8; PacketHeader::SIZE];
        hdr.write_to(&mut buf);
        let decoded = PacketHeader::decode(&buf).unwrap();
        assert_eq!(decoded, hdr);
    }

    #[test]
    fn packet_header_too_short() {
        assert!(PacketHeader::decode(&[0u8; 10]).is_err());
    }

    #[test]
    fn audio_message_roundtrip() {
        let msg = AudioHeader::encode_message(123_456, 960, &[0xAB; 100]);
        assert_eq!(peek_magic(&msg), Some(MSG_AUDIO_DATA));
        let hdr = AudioHeader::decode(&msg).unwrap();
        assert_eq!(hdr.ts, 123_456);
        assert_eq!(hdr.samples, 960);
        assert_eq!(hdr.data_len, 100);
        assert_eq!(msg.len(), AudioHeader::SIZE + 100);
    }

    #[test]
    fn auth_request_roundtrip() {
        let req = AuthRequest {
            username: "alice".into(),
            pin: "123456".into(),
        };
        let decoded = AuthRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn auth_request_truncated_body() {
        let mut bytes = AuthRequest {
            username: "alice".into(),
            pin: "123456".into(),
        }
        .encode();
        bytes.truncate(8);
        assert!(AuthRequest::decode(&bytes).is_err());
    }

    #[test]
    fn auth_response_failure_carries_reason() {
        let resp = AuthResponse {
            success: false,
            error: "Invalid credentials".into(),
        };
        let decoded = AuthResponse::decode(&resp.encode()).unwrap();
        assert!(!decoded.success);
        assert_eq!(decoded.error, "Invalid credentials");
    }

    #[test]
    fn auth_response_success_omits_reason() {
        let resp = AuthResponse {
            success: true,
            error: "ignored".into(),
        };
        let bytes = resp.encode();
        assert_eq!(bytes.len(), AuthResponse::HEADER_SIZE);
        assert!(AuthResponse::decode(&bytes).unwrap().success);
    }

    #[test]
    fn ping_reply_appends_timestamp() {
        let ping = [7u8; PING_SIZE];
        let reply = encode_ping_reply(&ping, 99).unwrap();
        assert_eq!(reply.len(), PING_REPLY_SIZE);
        assert_eq!(&reply[..16], &ping);
        assert_eq!(u64::from_le_bytes(reply[16..24].try_into().unwrap()), 99);
        assert!(encode_ping_reply(&[0u8; 15], 0).is_none());
    }

    #[test]
    fn fps_set_roundtrip_and_validation() {
        let msg = FpsSet { fps: 60, mode: 1 };
        let decoded = FpsSet::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert!(decoded.is_valid());

        assert!(!FpsSet { fps: 0, mode: 0 }.is_valid());
        assert!(!FpsSet { fps: 241, mode: 0 }.is_valid());
        assert!(!FpsSet { fps: 60, mode: 3 }.is_valid());
        // Strict length: a 6-byte message is rejected.
        assert!(FpsSet::decode(&msg.encode()[..6]).is_err());
    }

    #[test]
    fn monitor_list_roundtrip() {
        let monitors = vec![
            MonitorInfo {
                index: 0,
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
                refresh_hz: 60,
                primary: true,
                name: r"\\.\DISPLAY1".into(),
            },
            MonitorInfo {
                index: 1,
                x: 0,
                y: 0,
                width: 2560,
                height: 1440,
                refresh_hz: 144,
                primary: false,
                name: r"\\.\DISPLAY2".into(),
            },
        ];
        let bytes = encode_monitor_list(&monitors, 1);
        let (decoded, current) = decode_monitor_list(&bytes).unwrap();
        assert_eq!(current, 1);
        assert_eq!(decoded, monitors);
    }

    #[test]
    fn monitor_name_clamped_to_63_bytes() {
        let monitors = vec![MonitorInfo {
            index: 0,
            x: 0,
            y: 0,
            width: 800,
            height: 600,
            refresh_hz: 60,
            primary: true,
            name: "x".repeat(100),
        }];
        let bytes = encode_monitor_list(&monitors, 0);
        let (decoded, _) = decode_monitor_list(&bytes).unwrap();
        assert_eq!(decoded[0].name.len(), MONITOR_NAME_MAX);
    }

    #[test]
    fn input_message_roundtrips() {
        let mv = MouseMoveMsg { x: 0.25, y: 0.75 };
        assert_eq!(MouseMoveMsg::decode(&mv.encode()).unwrap(), mv);

        let btn = MouseButtonMsg {
            button: 1,
            action: 1,
        };
        assert_eq!(MouseButtonMsg::decode(&btn.encode()).unwrap(), btn);

        let whl = MouseWheelMsg {
            delta_x: -3,
            delta_y: 12,
            x: 0.5,
            y: 0.5,
        };
        assert_eq!(MouseWheelMsg::decode(&whl.encode()).unwrap(), whl);

        let key = KeyMsg {
            key_code: 65,
            scan_code: 30,
            action: 1,
            modifiers: 2,
        };
        assert_eq!(KeyMsg::decode(&key.encode()).unwrap(), key);
    }

    #[test]
    fn wheel_decodes_without_position() {
        let whl = MouseWheelMsg {
            delta_x: 1,
            delta_y: -2,
            x: 0.1,
            y: 0.9,
        };
        let decoded = MouseWheelMsg::decode(&whl.encode()[..8]).unwrap();
        assert_eq!(decoded.delta_x, 1);
        assert_eq!(decoded.delta_y, -2);
        assert_eq!(decoded.x, 0.0);
    }

    #[test]
    fn clipboard_text_roundtrip() {
        let bytes = encode_clipboard_text(b"hello clipboard");
        assert_eq!(decode_clipboard_text(&bytes).unwrap(), b"hello clipboard");
    }

    #[test]
    fn clipboard_image_roundtrip() {
        let png = vec![0x89u8, b'P', b'N', b'G', 1, 2, 3];
        let bytes = encode_clipboard_image(640, 480, &png);
        let (w, h, data) = decode_clipboard_image(&bytes).unwrap();
        assert_eq!((w, h), (640, 480));
        assert_eq!(data, &png[..]);
    }

    #[test]
    fn short_input_is_rejected_not_panicking() {
        assert!(peek_magic(&[1, 2, 3]).is_none());
        assert!(MouseMoveMsg::decode(&[0u8; 4]).is_err());
        assert!(decode_clipboard_text(&[0u8; 5]).is_err());
        assert!(decode_monitor_set(&[0u8; 4]).is_err());
    }
}
