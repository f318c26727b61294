//! GPU completion signaling.
//!
//! Lets the encoder wait until a capture-side copy has finished on the
//! GPU without blocking the capture callback. Two back-end shapes,
//! preferred in this order at init:
//!
//! - **Timeline**: a monotonic-value fence signalable by the device
//!   context, with event-based completion waits ([`TimelineFence`]).
//! - **Query**: a boolean event query polled via a short spin, then
//!   failure ([`QueryFence`]).
//!
//! A wait failure means the caller must drop the frame, never abort
//! capture.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Monotonic value returned by [`GpuFence::signal`]; `0` means "no
/// fence" and always tests complete.
pub type FenceTicket = u64;

/// Completion signaling contract shared by all back-ends.
pub trait GpuFence: Send + Sync {
    /// Record a signal point after the work submitted so far; returns
    /// the ticket to test against.
    fn signal(&self) -> FenceTicket;

    /// Non-blocking completion test. Safe to poll.
    fn is_complete(&self, ticket: FenceTicket) -> bool;

    /// Block until `ticket` completes or `timeout` elapses. Returns
    /// `false` on a wait failure.
    fn wait(&self, ticket: FenceTicket, timeout: Duration) -> bool;
}

// ── TimelineFence ────────────────────────────────────────────────

/// Monotonic-value fence with event-based waits.
///
/// The device side calls [`complete_to`](Self::complete_to) as copies
/// retire; waiters block on a condition variable.
#[derive(Debug, Default)]
pub struct TimelineFence {
    next: AtomicU64,
    completed: Mutex<u64>,
    cond: Condvar,
}

impl TimelineFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every ticket up to and including `value` complete.
    pub fn complete_to(&self, value: u64) {
        let mut completed = self.completed.lock().unwrap();
        if value > *completed {
            *completed = value;
            self.cond.notify_all();
        }
    }

    /// Highest completed ticket.
    pub fn completed(&self) -> u64 {
        *self.completed.lock().unwrap()
    }
}

impl GpuFence for TimelineFence {
    fn signal(&self) -> FenceTicket {
        self.next.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn is_complete(&self, ticket: FenceTicket) -> bool {
        ticket == 0 || *self.completed.lock().unwrap() >= ticket
    }

    fn wait(&self, ticket: FenceTicket, timeout: Duration) -> bool {
        if ticket == 0 {
            return true;
        }
        let completed = self.completed.lock().unwrap();
        let (guard, _) = self
            .cond
            .wait_timeout_while(completed, timeout, |c| *c < ticket)
            .unwrap();
        *guard >= ticket
    }
}

// ── QueryFence ───────────────────────────────────────────────────

/// Spin iterations before a poll-based wait gives up.
const QUERY_SPIN_LIMIT: u32 = 200;

/// Event-query fallback: a single boolean "done" flag re-armed by
/// every signal. Tickets are always `0` — completion is positional,
/// matching query semantics.
#[derive(Debug, Default)]
pub struct QueryFence {
    pending: AtomicBool,
}

impl QueryFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device side: the work recorded by the last signal has retired.
    pub fn mark_done(&self) {
        self.pending.store(false, Ordering::Release);
    }
}

impl GpuFence for QueryFence {
    fn signal(&self) -> FenceTicket {
        self.pending.store(true, Ordering::Release);
        0
    }

    fn is_complete(&self, _ticket: FenceTicket) -> bool {
        !self.pending.load(Ordering::Acquire)
    }

    fn wait(&self, ticket: FenceTicket, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        for _ in 0..QUERY_SPIN_LIMIT {
            if self.is_complete(ticket) {
                return true;
            }
            std::hint::spin_loop();
        }
        while Instant::now() < deadline {
            if self.is_complete(ticket) {
                return true;
            }
            std::thread::yield_now();
        }
        self.is_complete(ticket)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn zero_ticket_is_always_complete() {
        let fence = TimelineFence::new();
        assert!(fence.is_complete(0));
        assert!(fence.wait(0, Duration::from_millis(1)));
    }

    #[test]
    fn timeline_signal_then_complete() {
        let fence = TimelineFence::new();
        let t1 = fence.signal();
        let t2 = fence.signal();
        assert!(t2 > t1);
        assert!(!fence.is_complete(t1));

        fence.complete_to(t1);
        assert!(fence.is_complete(t1));
        assert!(!fence.is_complete(t2));

        fence.complete_to(t2);
        assert!(fence.is_complete(t2));
    }

    #[test]
    fn timeline_wait_times_out() {
        let fence = TimelineFence::new();
        let t = fence.signal();
        assert!(!fence.wait(t, Duration::from_millis(10)));
    }

    #[test]
    fn timeline_wait_wakes_on_completion() {
        let fence = Arc::new(TimelineFence::new());
        let t = fence.signal();
        let waiter = {
            let fence = Arc::clone(&fence);
            std::thread::spawn(move || fence.wait(t, Duration::from_secs(2)))
        };
        std::thread::sleep(Duration::from_millis(10));
        fence.complete_to(t);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn query_fence_rearm_cycle() {
        let fence = QueryFence::new();
        assert!(fence.is_complete(0));
        let t = fence.signal();
        assert!(!fence.is_complete(t));
        fence.mark_done();
        assert!(fence.is_complete(t));
        assert!(fence.wait(t, Duration::from_millis(1)));
    }

    #[test]
    fn query_fence_wait_gives_up() {
        let fence = QueryFence::new();
        let t = fence.signal();
        assert!(!fence.wait(t, Duration::from_millis(5)));
    }
}
