//! Monitor descriptors and the shared registry.
//!
//! The registry is dependency-injected into the capture engine, the
//! transport server and the input injector instead of living in a
//! process global. Lock order: callers that also hold the capture
//! engine's state lock always take that lock first.

use std::sync::Mutex;

/// One entry of the current monitor enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    /// Stable index within the current enumeration.
    pub index: u8,
    /// Origin within the virtual screen (not on the wire).
    pub x: i32,
    /// Origin within the virtual screen (not on the wire).
    pub y: i32,
    /// Pixel width.
    pub width: u16,
    /// Pixel height.
    pub height: u16,
    /// Current refresh rate in Hz.
    pub refresh_hz: u16,
    /// Whether this is the primary display.
    pub primary: bool,
    /// Device name, at most 63 bytes on the wire.
    pub name: String,
}

/// Shared, refreshable list of monitors.
///
/// A refresh replaces the whole list: entries are sorted primary-first
/// (then by prior index) and re-indexed, matching what enumeration
/// produces on the host.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    list: Mutex<Vec<MonitorInfo>>,
}

impl MonitorRegistry {
    pub fn new(initial: Vec<MonitorInfo>) -> Self {
        let reg = Self {
            list: Mutex::new(Vec::new()),
        };
        reg.refresh(initial);
        reg
    }

    /// Replace the enumeration. Sorts primary-first and re-indexes.
    pub fn refresh(&self, mut monitors: Vec<MonitorInfo>) {
        monitors.sort_by(|a, b| b.primary.cmp(&a.primary).then(a.index.cmp(&b.index)));
        for (i, m) in monitors.iter_mut().enumerate() {
            m.index = i as u8;
        }
        *self.list.lock().unwrap() = monitors;
    }

    /// Copy of the current list.
    pub fn snapshot(&self) -> Vec<MonitorInfo> {
        self.list.lock().unwrap().clone()
    }

    /// Copy of one entry, or `None` when the index is out of range.
    pub fn get(&self, index: usize) -> Option<MonitorInfo> {
        self.list.lock().unwrap().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.list.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` with the list lock held. Used by the capture engine
    /// across monitor switches so the enumeration cannot change
    /// mid-switch.
    pub fn with_list<R>(&self, f: impl FnOnce(&[MonitorInfo]) -> R) -> R {
        f(&self.list.lock().unwrap())
    }
}
