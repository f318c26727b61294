//! Triple-buffer frame mailbox between capture and encoder.
//!
//! A lossy single-producer/single-consumer handoff holding at most one
//! unread frame: pushing while the previous frame is unread overwrites
//! it and counts a drop. The slot also tracks which texture-pool
//! entries are in flight (owned by a cell or by the encoder) so the
//! capture side never overwrites a borrowed texture.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::pipeline::fence::FenceTicket;

/// A captured frame as handed to the encoder.
#[derive(Debug, Clone)]
pub struct Frame<T> {
    /// Reference to one of the pool textures.
    pub texture: T,
    /// Capture timestamp, µs.
    pub ts: i64,
    /// GPU-completion ticket for the capture-side copy.
    pub fence: FenceTicket,
    /// Pool index that produced the texture; `-1` when not pooled.
    pub pool_index: i32,
}

struct Cell<T> {
    frame: Option<Frame<T>>,
}

struct Inner<T> {
    cells: [Cell<T>; 3],
    /// Next write position.
    write_index: usize,
    /// Read-ready cell, or `-1` when nothing is pending.
    read_index: isize,
    /// Frames overwritten before the consumer claimed them.
    dropped: u64,
    /// Manual-reset signal consumed by `pop`.
    signaled: bool,
}

/// The mailbox. See module docs.
pub struct FrameSlot<T> {
    inner: Mutex<Inner<T>>,
    cond: Condvar,
    in_flight: AtomicU32,
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                cells: [Cell { frame: None }, Cell { frame: None }, Cell { frame: None }],
                write_index: 0,
                read_index: -1,
                dropped: 0,
                signaled: false,
            }),
            cond: Condvar::new(),
            in_flight: AtomicU32::new(0),
        }
    }

    /// Hand a frame to the consumer. Never blocks beyond the internal
    /// critical section.
    ///
    /// Releases whatever occupied the chosen cell (clearing its pool
    /// bit), and counts a drop if a previous frame was still unread.
    pub fn push(&self, frame: Frame<T>) {
        let mut inner = self.inner.lock().unwrap();

        // The write cell is always distinct from the read cell: the
        // rotation below skips over `read_index` when advancing.
        let wi = inner.write_index;
        let mut next = (wi + 1) % 3;
        if next as isize == inner.read_index {
            next = (next + 1) % 3;
        }
        inner.write_index = next;

        // Release the cell being overwritten.
        if let Some(old) = inner.cells[wi].frame.take() {
            self.clear_bit(old.pool_index);
        }

        if frame.pool_index >= 0 {
            self.in_flight
                .fetch_or(1u32 << frame.pool_index as u32, Ordering::Release);
        }
        inner.cells[wi].frame = Some(frame);

        if inner.read_index >= 0 {
            // A ready frame existed and is now superseded.
            let ri = inner.read_index as usize;
            if ri != wi {
                if let Some(stale) = inner.cells[ri].frame.take() {
                    self.clear_bit(stale.pool_index);
                }
            }
            inner.dropped += 1;
        }
        inner.read_index = wi as isize;
        inner.signaled = true;
        self.cond.notify_one();
    }

    /// Wait up to `timeout` for a frame. Returns `None` on timeout or
    /// when woken with nothing pending (shutdown wakeup).
    pub fn pop(&self, timeout: Duration) -> Option<Frame<T>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.signaled {
            let (guard, result) = self
                .cond
                .wait_timeout_while(inner, timeout, |i| !i.signaled)
                .unwrap();
            inner = guard;
            if result.timed_out() && !inner.signaled {
                return None;
            }
        }
        inner.signaled = false;
        if inner.read_index < 0 {
            return None;
        }
        let ri = inner.read_index as usize;
        inner.read_index = -1;
        // The pool bit stays set: the consumer owns the texture until
        // it calls `mark_released`.
        inner.cells[ri].frame.take()
    }

    /// Clear the pool bit for `pool_index`; idempotent, ignores `-1`.
    pub fn mark_released(&self, pool_index: i32) {
        self.clear_bit(pool_index);
    }

    /// Whether pool entry `pool_index` is currently owned by a cell or
    /// the consumer.
    pub fn is_in_flight(&self, pool_index: i32) -> bool {
        pool_index >= 0
            && self.in_flight.load(Ordering::Acquire) & (1u32 << pool_index as u32) != 0
    }

    /// Number of frames overwritten since the last call.
    pub fn take_dropped(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.dropped)
    }

    /// Clear all cells, pool bits and indices. Used on capture restart.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        for cell in &mut inner.cells {
            cell.frame = None;
        }
        inner.write_index = 0;
        inner.read_index = -1;
        inner.signaled = false;
        self.in_flight.store(0, Ordering::Release);
    }

    /// Wake a blocked `pop` without delivering a frame. Used for
    /// shutdown; the woken consumer observes `None`.
    pub fn wake(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.signaled = true;
        self.cond.notify_all();
    }

    fn clear_bit(&self, pool_index: i32) {
        if pool_index >= 0 {
            self.in_flight
                .fetch_and(!(1u32 << pool_index as u32), Ordering::Release);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
