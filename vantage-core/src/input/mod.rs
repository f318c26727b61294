//! Input injection: normalized client events → host input primitives.
//!
//! Cursor coordinates arrive normalized to `[0, 1]` over the streamed
//! monitor. They are mapped to pixel coordinates on that monitor's
//! bounds, then to the absolute 0..65535 virtual-screen space the
//! host's injection primitive expects. Keyboard events carry a
//! JavaScript key code translated through [`keymap`].
//!
//! The injector is gated: while disabled every event is dropped
//! silently.

pub mod keymap;

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use tracing::warn;

use crate::error::Result;
use crate::protocol::{
    peek_magic, KeyMsg, MouseButtonMsg, MouseMoveMsg, MouseWheelMsg, MSG_KEY, MSG_MOUSE_BTN,
    MSG_MOUSE_MOVE, MSG_MOUSE_WHEEL,
};

/// One wheel detent in the host convention.
const WHEEL_DELTA: i32 = 120;

/// Pixel rectangle of a monitor within the virtual screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorBounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// The virtual screen spanning all monitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualScreen {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// Host-side injection primitives; absolute coordinates are in the
/// 0..65535 virtual-screen space.
pub trait InputBackend: Send + Sync {
    fn mouse_move_abs(&self, ax: i32, ay: i32) -> Result<()>;
    fn mouse_button(&self, button: u8, down: bool) -> Result<()>;
    /// `horizontal == false` is the vertical wheel.
    fn mouse_wheel(&self, horizontal: bool, delta: i32) -> Result<()>;
    fn key(&self, vk: u16, scan: u16, down: bool, extended: bool) -> Result<()>;
    fn virtual_screen(&self) -> VirtualScreen;
}

/// Backend that accepts and discards everything. Used when no
/// platform injector is wired in.
pub struct NullInputBackend;

impl InputBackend for NullInputBackend {
    fn mouse_move_abs(&self, _ax: i32, _ay: i32) -> Result<()> {
        Ok(())
    }
    fn mouse_button(&self, _button: u8, _down: bool) -> Result<()> {
        Ok(())
    }
    fn mouse_wheel(&self, _horizontal: bool, _delta: i32) -> Result<()> {
        Ok(())
    }
    fn key(&self, _vk: u16, _scan: u16, _down: bool, _extended: bool) -> Result<()> {
        Ok(())
    }
    fn virtual_screen(&self) -> VirtualScreen {
        VirtualScreen {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        }
    }
}

/// Per-category event counters, drained by the stats thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub moves: u64,
    pub clicks: u64,
    pub keys: u64,
}

/// Translates and injects client input events. Re-bindable to the
/// active monitor via [`set_monitor_bounds`](Self::set_monitor_bounds).
pub struct InputInjector {
    backend: Box<dyn InputBackend>,
    enabled: AtomicBool,
    mon_x: AtomicI32,
    mon_y: AtomicI32,
    mon_w: AtomicI32,
    mon_h: AtomicI32,
    moves: AtomicU64,
    clicks: AtomicU64,
    keys: AtomicU64,
}

impl InputInjector {
    pub fn new(backend: Box<dyn InputBackend>) -> Self {
        Self {
            backend,
            enabled: AtomicBool::new(false),
            mon_x: AtomicI32::new(0),
            mon_y: AtomicI32::new(0),
            mon_w: AtomicI32::new(1920),
            mon_h: AtomicI32::new(1080),
            moves: AtomicU64::new(0),
            clicks: AtomicU64::new(0),
            keys: AtomicU64::new(0),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        tracing::info!("input enabled");
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Bind normalized coordinates to the streamed monitor's pixel
    /// rectangle.
    pub fn set_monitor_bounds(&self, bounds: MonitorBounds) {
        self.mon_x.store(bounds.x, Ordering::Relaxed);
        self.mon_y.store(bounds.y, Ordering::Relaxed);
        self.mon_w.store(bounds.width.max(1), Ordering::Relaxed);
        self.mon_h.store(bounds.height.max(1), Ordering::Relaxed);
    }

    /// Normalized `[0,1]` position → absolute 0..65535 virtual-screen
    /// coordinates.
    pub fn to_absolute(&self, nx: f32, ny: f32) -> (i32, i32) {
        let px = self.mon_x.load(Ordering::Relaxed) as i64
            + (nx.clamp(0.0, 1.0) * self.mon_w.load(Ordering::Relaxed) as f32) as i64;
        let py = self.mon_y.load(Ordering::Relaxed) as i64
            + (ny.clamp(0.0, 1.0) * self.mon_h.load(Ordering::Relaxed) as f32) as i64;
        let vs = self.backend.virtual_screen();
        let ax = (px - vs.x as i64) * 65535 / vs.width.max(1) as i64;
        let ay = (py - vs.y as i64) * 65535 / vs.height.max(1) as i64;
        (ax as i32, ay as i32)
    }

    // ── Event entry points ───────────────────────────────────────

    pub fn mouse_move(&self, nx: f32, ny: f32) {
        if !self.is_enabled() {
            return;
        }
        let (ax, ay) = self.to_absolute(nx, ny);
        if self.backend.mouse_move_abs(ax, ay).is_ok() {
            self.moves.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn mouse_button(&self, button: u8, down: bool) {
        if !self.is_enabled() || button > 4 {
            return;
        }
        if self.backend.mouse_button(button, down).is_ok() {
            self.clicks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Wheel deltas arrive in percent-of-detent units; vertical is
    /// negated between the client and host conventions.
    pub fn mouse_wheel(&self, delta_x: i16, delta_y: i16) {
        if !self.is_enabled() {
            return;
        }
        if delta_y != 0 {
            let _ = self
                .backend
                .mouse_wheel(false, -(delta_y as i32) * WHEEL_DELTA / 100);
        }
        if delta_x != 0 {
            let _ = self
                .backend
                .mouse_wheel(true, delta_x as i32 * WHEEL_DELTA / 100);
        }
    }

    pub fn key(&self, key_code: u16, scan_code: u16, down: bool, _modifiers: u8) {
        if !self.is_enabled() {
            return;
        }
        let Some(vk) = keymap::js_key_to_vk(key_code) else {
            warn!("unknown keyCode: {key_code}");
            return;
        };
        let extended = keymap::is_extended_key(vk);
        if self.backend.key(vk, scan_code, down, extended).is_ok() {
            self.keys.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Diagnostic wiggle: three consecutive moves (center, +1 pixel,
    /// back) to elicit a fresh keyframe after authentication or a
    /// monitor switch.
    pub fn wiggle_center(&self) {
        if !self.is_enabled() {
            return;
        }
        let (ax, ay) = self.to_absolute(0.5, 0.5);
        let _ = self.backend.mouse_move_abs(ax, ay);
        let _ = self.backend.mouse_move_abs(ax + 1, ay);
        let _ = self.backend.mouse_move_abs(ax, ay);
    }

    /// Route a raw channel message by magic. Returns whether the
    /// message was an input message.
    pub fn handle_message(&self, data: &[u8]) -> bool {
        match peek_magic(data) {
            Some(MSG_MOUSE_MOVE) => {
                if let Ok(m) = MouseMoveMsg::decode(data) {
                    self.mouse_move(m.x, m.y);
                }
                true
            }
            Some(MSG_MOUSE_BTN) => {
                if let Ok(m) = MouseButtonMsg::decode(data) {
                    self.mouse_button(m.button, m.action != 0);
                }
                true
            }
            Some(MSG_MOUSE_WHEEL) => {
                if let Ok(m) = MouseWheelMsg::decode(data) {
                    self.mouse_wheel(m.delta_x, m.delta_y);
                }
                true
            }
            Some(MSG_KEY) => {
                if let Ok(m) = KeyMsg::decode(data) {
                    self.key(m.key_code, m.scan_code, m.action != 0, m.modifiers);
                }
                true
            }
            _ => false,
        }
    }

    /// Drain the event counters.
    pub fn take_stats(&self) -> InputStats {
        InputStats {
            moves: self.moves.swap(0, Ordering::Relaxed),
            clicks: self.clicks.swap(0, Ordering::Relaxed),
            keys: self.keys.swap(0, Ordering::Relaxed),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
