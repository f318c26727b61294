//! Bidirectional clipboard synchronization with echo suppression.
//!
//! Local changes are observed by the host's clipboard monitor, turned
//! into wire payloads and handed to the transport; incoming payloads
//! are written back to the local clipboard. Two mechanisms stop the
//! loop from feeding itself: a 64-bit FNV-1a hash of the last payload
//! in either direction, and an ignore-next flag armed around local
//! writes so the monitor skips the ensuing change notification.

pub mod png;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::error::Result;
use crate::protocol::{
    decode_clipboard_image, decode_clipboard_text, encode_clipboard_image, encode_clipboard_text,
    peek_magic, MSG_CLIPBOARD_IMAGE, MSG_CLIPBOARD_REQUEST, MSG_CLIPBOARD_TEXT,
};

/// Text payload cap: anything longer is not transmitted.
pub const MAX_TEXT_SIZE: usize = 1024 * 1024;

/// Image payload cap (PNG bytes).
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// FNV-1a 64-bit, the echo-suppression hash.
pub fn fnv1a64(data: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// A decoded clipboard image: top-down RGBA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Host clipboard access. Reads return `None` when the format is not
/// present; writes replace the clipboard content.
pub trait ClipboardBackend: Send {
    fn read_text(&mut self) -> Option<String>;
    fn read_image(&mut self) -> Option<RgbaImage>;
    fn write_text(&mut self, text: &str) -> Result<()>;
    fn write_image(&mut self, image: &RgbaImage) -> Result<()>;
}

/// In-memory backend used by tests and the loopback mode.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: Option<String>,
    image: Option<RgbaImage>,
}

impl ClipboardBackend for MemoryClipboard {
    fn read_text(&mut self) -> Option<String> {
        self.text.clone()
    }
    fn read_image(&mut self) -> Option<RgbaImage> {
        self.image.clone()
    }
    fn write_text(&mut self, text: &str) -> Result<()> {
        self.text = Some(text.to_string());
        self.image = None;
        Ok(())
    }
    fn write_image(&mut self, image: &RgbaImage) -> Result<()> {
        self.image = Some(image.clone());
        self.text = None;
        Ok(())
    }
}

/// The bridge. The host's monitor thread calls
/// [`local_change_payload`](Self::local_change_payload) on every OS
/// change notification; the transport routes `CLPT`/`CLPI`/`CLPR`
/// messages into [`handle_message`](Self::handle_message).
pub struct ClipboardSync {
    backend: Mutex<Box<dyn ClipboardBackend>>,
    last_hash: Mutex<u64>,
    ignore_next: AtomicBool,
    enabled: AtomicBool,
}

impl ClipboardSync {
    pub fn new(backend: Box<dyn ClipboardBackend>) -> Self {
        Self {
            backend: Mutex::new(backend),
            last_hash: Mutex::new(0),
            ignore_next: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// React to a local clipboard-change notification: read the
    /// clipboard and build the outbound payload, unless the change is
    /// our own write or a repeat of the last synced content.
    pub fn local_change_payload(&self) -> Option<Vec<u8>> {
        if !self.is_enabled() {
            return None;
        }
        if self.ignore_next.swap(false, Ordering::AcqRel) {
            return None;
        }
        self.read_current()
    }

    /// Build a payload from the current clipboard content regardless
    /// of the ignore flag. Used for the session-start re-push.
    pub fn current_payload(&self) -> Option<Vec<u8>> {
        self.ignore_next.store(false, Ordering::Release);
        self.read_current()
    }

    fn read_current(&self) -> Option<Vec<u8>> {
        let mut backend = self.backend.lock().unwrap();

        if let Some(text) = backend.read_text() {
            if text.len() > MAX_TEXT_SIZE {
                return None;
            }
            let mut last = self.last_hash.lock().unwrap();
            let hash = fnv1a64(text.as_bytes());
            if *last == hash {
                return None;
            }
            *last = hash;
            info!("clipboard: sending {} bytes text", text.len());
            return Some(encode_clipboard_text(text.as_bytes()));
        }

        if let Some(image) = backend.read_image() {
            let png = png::encode_png(&image.data, image.width, image.height);
            if png.len() > MAX_IMAGE_SIZE {
                return None;
            }
            let mut last = self.last_hash.lock().unwrap();
            let hash = fnv1a64(&png);
            if *last == hash {
                return None;
            }
            *last = hash;
            info!(
                "clipboard: sending {}x{} image ({} bytes)",
                image.width,
                image.height,
                png.len()
            );
            return Some(encode_clipboard_image(image.width, image.height, &png));
        }
        None
    }

    /// Route an incoming clipboard message. Returns whether the magic
    /// belonged to the bridge. On a `CLPR` request the current
    /// content payload is produced for sending back.
    pub fn handle_message(&self, data: &[u8]) -> Option<Vec<u8>> {
        match peek_magic(data) {
            Some(MSG_CLIPBOARD_TEXT) => {
                let Ok(bytes) = decode_clipboard_text(data) else {
                    return None;
                };
                if bytes.len() > MAX_TEXT_SIZE {
                    warn!("clipboard text over cap ({} bytes), ignored", bytes.len());
                    return None;
                }
                let Ok(text) = std::str::from_utf8(bytes) else {
                    return None;
                };
                let hash = fnv1a64(bytes);
                {
                    let mut last = self.last_hash.lock().unwrap();
                    if *last == hash {
                        return None; // echo of our own send
                    }
                    *last = hash;
                }
                self.ignore_next.store(true, Ordering::Release);
                if let Err(e) = self.backend.lock().unwrap().write_text(text) {
                    warn!("clipboard write failed: {e}");
                }
                info!("clipboard: received {} bytes text", bytes.len());
                None
            }
            Some(MSG_CLIPBOARD_IMAGE) => {
                let Ok((width, height, png_bytes)) = decode_clipboard_image(data) else {
                    return None;
                };
                if png_bytes.len() > MAX_IMAGE_SIZE {
                    warn!("clipboard image over cap, ignored");
                    return None;
                }
                let hash = fnv1a64(png_bytes);
                {
                    let mut last = self.last_hash.lock().unwrap();
                    if *last == hash {
                        return None;
                    }
                    *last = hash;
                }
                let Some(rgba) = png::decode_png(png_bytes, width, height) else {
                    warn!("clipboard image decode failed");
                    return None;
                };
                self.ignore_next.store(true, Ordering::Release);
                let image = RgbaImage {
                    width,
                    height,
                    data: rgba,
                };
                if let Err(e) = self.backend.lock().unwrap().write_image(&image) {
                    warn!("clipboard write failed: {e}");
                }
                info!("clipboard: received {width}x{height} image");
                None
            }
            Some(MSG_CLIPBOARD_REQUEST) => self.current_payload(),
            _ => None,
        }
    }

    /// Whether `magic` is routed to this bridge.
    pub fn owns_magic(magic: u32) -> bool {
        matches!(
            magic,
            MSG_CLIPBOARD_TEXT | MSG_CLIPBOARD_IMAGE | MSG_CLIPBOARD_REQUEST
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
