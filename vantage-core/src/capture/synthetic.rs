//! Synthetic capture backend.
//!
//! Generates flat-shaded BGRA frames entirely in memory. Used by the
//! test suite and by the host's loopback/demo mode when no platform
//! capture implementation is wired in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::capture::{CaptureBackend, CaptureEngine, CaptureMode};
use crate::error::{Result, VantageError};
use crate::monitor::MonitorInfo;
use crate::pipeline::{FenceTicket, GpuFence, TexturePixels, TimelineFence};

/// One reusable in-memory "texture" of the pool.
#[derive(Clone)]
pub struct SyntheticTexture {
    inner: Arc<TextureInner>,
}

struct TextureInner {
    width: u32,
    height: u32,
    data: Mutex<Vec<u8>>,
}

impl TexturePixels for SyntheticTexture {
    fn dimensions(&self) -> (u32, u32) {
        (self.inner.width, self.inner.height)
    }

    fn pixels(&self) -> Vec<u8> {
        self.inner.data.lock().unwrap().clone()
    }
}

/// A "surface" as the OS would deliver it: here just a shade the
/// whole frame is filled with.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticSurface {
    pub shade: u8,
}

/// In-memory [`CaptureBackend`]. Copies complete synchronously, so
/// every fence ticket is already signalled when handed out.
pub struct SyntheticBackend {
    mode: Option<CaptureMode>,
    fence: Arc<TimelineFence>,
    fail_next_bind: Arc<AtomicBool>,
    copies: AtomicU64,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self {
            mode: None,
            fence: Arc::new(TimelineFence::new()),
            fail_next_bind: Arc::new(AtomicBool::new(false)),
            copies: AtomicU64::new(0),
        }
    }

    /// Handle that makes the next `bind` fail (session-create failure
    /// injection for tests).
    pub fn fail_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_next_bind)
    }

    pub fn copies(&self) -> u64 {
        self.copies.load(Ordering::Relaxed)
    }
}

impl CaptureBackend for SyntheticBackend {
    type Texture = SyntheticTexture;
    type Surface = SyntheticSurface;

    fn bind(&mut self, monitor: &MonitorInfo) -> Result<CaptureMode> {
        if self.fail_next_bind.swap(false, Ordering::AcqRel) {
            return Err(VantageError::Setup("synthetic bind failure".into()));
        }
        let mode = CaptureMode {
            width: monitor.width as u32,
            height: monitor.height as u32,
            refresh_hz: monitor.refresh_hz,
        };
        self.mode = Some(mode);
        Ok(mode)
    }

    fn unbind(&mut self) {
        self.mode = None;
    }

    fn create_pool(&mut self, mode: &CaptureMode, size: usize) -> Result<Vec<SyntheticTexture>> {
        Ok((0..size)
            .map(|_| SyntheticTexture {
                inner: Arc::new(TextureInner {
                    width: mode.width,
                    height: mode.height,
                    data: Mutex::new(vec![0; (mode.width * mode.height * 4) as usize]),
                }),
            })
            .collect())
    }

    fn copy_to(&mut self, src: &SyntheticSurface, dst: &SyntheticTexture) -> Result<FenceTicket> {
        if self.mode.is_none() {
            return Err(VantageError::Setup("no bound session".into()));
        }
        dst.inner.data.lock().unwrap().fill(src.shade);
        self.copies.fetch_add(1, Ordering::Relaxed);
        let ticket = self.fence.signal();
        self.fence.complete_to(ticket);
        Ok(ticket)
    }

    fn fence(&self) -> Arc<dyn GpuFence> {
        Arc::clone(&self.fence) as Arc<dyn GpuFence>
    }

    fn query_refresh(&mut self) -> Option<u16> {
        self.mode.map(|m| m.refresh_hz)
    }
}

/// Drive an engine with synthetic surfaces at roughly the host
/// refresh rate until `running` clears. Stands in for the OS capture
/// callback thread.
pub fn spawn_surface_pump(
    engine: Arc<CaptureEngine<SyntheticBackend>>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("surface-pump".into())
        .spawn(move || {
            let mut shade: u8 = 0;
            while running.load(Ordering::Acquire) {
                let hz = engine.host_fps().max(1) as u64;
                engine.submit_surface(SyntheticSurface { shade });
                shade = shade.wrapping_add(1);
                std::thread::sleep(Duration::from_micros(1_000_000 / hz));
            }
        })
        .expect("spawn surface pump")
}
