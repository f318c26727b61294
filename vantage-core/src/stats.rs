//! Session statistics: rolling throughput and the 1 Hz status line.
//!
//! The stats thread samples every counter once per second and prints a
//! single stdout line showing the session state, encode rate,
//! bitrate, and drop taxonomy.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::input::InputStats;
use crate::transport::sink::TransportSnapshot;

// ── Throughput ───────────────────────────────────────────────────

/// Rolling-window byte-rate estimator.
#[derive(Debug)]
pub struct Throughput {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    total_bytes: u64,
}

impl Throughput {
    /// One-second rolling window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            total_bytes: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.total_bytes += bytes;
        while let Some(&(ts, old)) = self.samples.front() {
            if when.duration_since(ts) > self.window {
                self.samples.pop_front();
                self.total_bytes = self.total_bytes.saturating_sub(old);
            } else {
                break;
            }
        }
    }

    /// Estimated throughput in bytes/second over the window.
    pub fn bytes_per_second(&self) -> u64 {
        let (first, last) = match (self.samples.front(), self.samples.back()) {
            (Some(&(first, _)), Some(&(last, _))) => (first, last),
            _ => return 0,
        };
        let elapsed = last.duration_since(first).max(Duration::from_millis(1));
        (self.total_bytes as f64 / elapsed.as_secs_f64()) as u64
    }

    pub fn megabits_per_second(&self) -> f64 {
        self.bytes_per_second() as f64 * 8.0 / 1_048_576.0
    }
}

impl Default for Throughput {
    fn default() -> Self {
        Self::new()
    }
}

// ── FpsAverage ───────────────────────────────────────────────────

/// Average of the last ten one-second encode counts.
#[derive(Debug, Default)]
pub struct FpsAverage {
    samples: VecDeque<u64>,
}

impl FpsAverage {
    pub fn push(&mut self, encoded: u64) {
        if self.samples.len() == 10 {
            self.samples.pop_front();
        }
        self.samples.push_back(encoded);
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
    }
}

// ── Status line ──────────────────────────────────────────────────

/// Everything the 1 Hz sampler gathered for one line.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusSample {
    pub connected: bool,
    pub authenticated: bool,
    pub fps_received: bool,
    pub target_fps: u32,
    pub encoded_frames: u64,
    pub encode_failed: u64,
    pub slot_dropped: u64,
    pub tex_conflicts: u64,
    pub transport: TransportSnapshot,
    pub input: InputStats,
    pub avg_fps: f64,
    pub mbps: f64,
}

/// Session state tag shown at the head of the line.
fn state_tag(sample: &StatusSample) -> &'static str {
    if !sample.connected {
        "[WAIT]"
    } else if !sample.authenticated {
        "[AUTH]"
    } else if !sample.fps_received {
        "[WAIT FPS]"
    } else {
        "[LIVE]"
    }
}

/// Render the stdout status line.
pub fn format_status_line(sample: &StatusSample) -> String {
    let mut line = format!(
        "{} FPS: {:3} @ {} | {:5.2} Mbps | V:{:4} A:{:3}",
        state_tag(sample),
        sample.encoded_frames,
        sample.target_fps,
        sample.mbps,
        sample.transport.sent_frames,
        sample.transport.audio_packets,
    );
    let input = sample.input;
    if input.moves + input.clicks + input.keys > 0 {
        line.push_str(&format!(
            " | Input: m={} c={} k={}",
            input.moves, input.clicks, input.keys
        ));
    }
    let drops = sample.slot_dropped
        + sample.transport.dropped_frames
        + sample.encode_failed
        + sample.tex_conflicts;
    if drops > 0 {
        line.push_str(&format!(
            " | Drop: c={} n={} e={} t={}",
            sample.slot_dropped,
            sample.transport.dropped_frames,
            sample.encode_failed,
            sample.tex_conflicts
        ));
    }
    if sample.transport.send_fails > 0 {
        line.push_str(&format!(" | SendFail: {}", sample.transport.send_fails));
    }
    line.push_str(&format!(" | Avg: {:.1}", sample.avg_fps));
    line
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_throughput_is_zero() {
        let t = Throughput::new();
        assert_eq!(t.bytes_per_second(), 0);
    }

    #[test]
    fn throughput_over_one_second() {
        let mut t = Throughput::with_window(Duration::from_secs(5));
        let t0 = Instant::now();
        t.record_at(t0, 1_000_000);
        t.record_at(t0 + Duration::from_secs(1), 1_000_000);
        let bps = t.bytes_per_second();
        assert!((1_900_000..=2_100_000).contains(&bps), "bps = {bps}");
    }

    #[test]
    fn throughput_evicts_old_samples() {
        let mut t = Throughput::with_window(Duration::from_millis(500));
        let t0 = Instant::now();
        t.record_at(t0, 1000);
        t.record_at(t0 + Duration::from_secs(1), 500);
        assert_eq!(t.samples.len(), 1);
    }

    #[test]
    fn fps_average_rolls_ten_samples() {
        let mut avg = FpsAverage::default();
        for _ in 0..10 {
            avg.push(30);
        }
        assert_eq!(avg.average(), 30.0);
        // Pushing 60s displaces the oldest 30s one by one.
        for _ in 0..10 {
            avg.push(60);
        }
        assert_eq!(avg.average(), 60.0);
    }

    #[test]
    fn state_tags_follow_session_flags() {
        let mut sample = StatusSample::default();
        assert!(format_status_line(&sample).starts_with("[WAIT]"));
        sample.connected = true;
        assert!(format_status_line(&sample).starts_with("[AUTH]"));
        sample.authenticated = true;
        assert!(format_status_line(&sample).starts_with("[WAIT FPS]"));
        sample.fps_received = true;
        assert!(format_status_line(&sample).starts_with("[LIVE]"));
    }

    #[test]
    fn drops_section_appears_only_when_nonzero() {
        let mut sample = StatusSample {
            connected: true,
            authenticated: true,
            fps_received: true,
            target_fps: 60,
            ..Default::default()
        };
        assert!(!format_status_line(&sample).contains("Drop:"));
        sample.slot_dropped = 3;
        let line = format_status_line(&sample);
        assert!(line.contains("Drop: c=3 n=0 e=0 t=0"));
    }

    #[test]
    fn input_section_appears_only_when_active() {
        let mut sample = StatusSample::default();
        assert!(!format_status_line(&sample).contains("Input:"));
        sample.input = InputStats {
            moves: 5,
            clicks: 1,
            keys: 2,
        };
        assert!(format_status_line(&sample).contains("Input: m=5 c=1 k=2"));
    }
}
