//! Channel send path: fragmentation, backpressure and liveness
//! accounting.
//!
//! The send logic is written against [`ChannelSink`] so it can be
//! exercised with a mock sink; the WebRTC data channel implements the
//! trait in the transport server. Video rides lossy-over-reliable:
//! when the channel's send buffer backs up, whole frames are dropped
//! and a keyframe is requested instead of letting latency build.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::audio::AudioPacket;
use crate::encoder::EncodedFrame;
use crate::error::Result;
use crate::protocol::{AudioHeader, PacketHeader, MAX_AUDIO_PAYLOAD};

/// Bytes of buffered outbound data above which a frame is dropped.
pub const BUFFER_THRESHOLD: usize = 32 * 1024;

/// MTU-safe chunk size including the packet header. 1200 keeps clear
/// of tunneled paths (VPN, PPPoE) that shrink the usual 1500.
pub const CHUNK_SIZE: usize = 1200;

/// Payload bytes per chunk.
pub const DATA_CHUNK_SIZE: usize = CHUNK_SIZE - PacketHeader::SIZE;

/// Consecutive overflow observations that force a disconnect.
pub const OVERFLOW_DISCONNECT: u32 = 10;

/// Chunks between mid-frame buffer re-checks.
const MID_FRAME_CHECK_EVERY: usize = 16;

/// Outbound byte sink with a buffered-amount observation.
#[async_trait]
pub trait ChannelSink: Send + Sync {
    async fn send(&self, data: &[u8]) -> Result<()>;
    async fn buffered(&self) -> usize;
    fn is_open(&self) -> bool;
}

/// Outcome of pushing one frame at the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Dropped,
    /// Too many consecutive overflows; the session must close.
    Disconnect(&'static str),
}

/// Counters the stats thread drains once per second.
#[derive(Debug, Default)]
pub struct TransportCounters {
    pub sent_frames: AtomicU64,
    pub sent_bytes: AtomicU64,
    pub dropped_frames: AtomicU64,
    pub audio_packets: AtomicU64,
    pub send_fails: AtomicU64,
    pub buffer_overflows: AtomicU64,
    pub mid_frame_drops: AtomicU64,
}

/// One-second snapshot, taken with exchange semantics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportSnapshot {
    pub sent_frames: u64,
    pub sent_bytes: u64,
    pub dropped_frames: u64,
    pub audio_packets: u64,
    pub send_fails: u64,
    pub buffer_overflows: u64,
    pub mid_frame_drops: u64,
}

impl TransportCounters {
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            sent_frames: self.sent_frames.swap(0, Ordering::Relaxed),
            sent_bytes: self.sent_bytes.swap(0, Ordering::Relaxed),
            dropped_frames: self.dropped_frames.swap(0, Ordering::Relaxed),
            audio_packets: self.audio_packets.swap(0, Ordering::Relaxed),
            send_fails: self.send_fails.swap(0, Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.swap(0, Ordering::Relaxed),
            mid_frame_drops: self.mid_frame_drops.swap(0, Ordering::Relaxed),
        }
    }
}

/// Fragmentation + backpressure engine. One per transport server.
pub struct Outbound {
    frame_id: AtomicU32,
    /// Consecutive overflow observations; reset by a clean send.
    overflows: AtomicU32,
    /// Set whenever a frame is lost so the next encode forces a key.
    needs_key: AtomicBool,
    pub counters: Arc<TransportCounters>,
}

impl Default for Outbound {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbound {
    pub fn new() -> Self {
        Self {
            frame_id: AtomicU32::new(0),
            overflows: AtomicU32::new(0),
            needs_key: AtomicBool::new(true),
            counters: Arc::new(TransportCounters::default()),
        }
    }

    /// Consume the keyframe-needed flag.
    pub fn take_needs_key(&self) -> bool {
        self.needs_key.swap(false, Ordering::AcqRel)
    }

    /// Raise the keyframe-needed flag (explicit request, reconnect,
    /// monitor switch).
    pub fn request_key(&self) {
        self.needs_key.store(true, Ordering::Release);
    }

    pub fn overflow_count(&self) -> u32 {
        self.overflows.load(Ordering::Acquire)
    }

    /// End an overflow run (incoming ping, session teardown).
    pub fn clear_overflows(&self) {
        self.overflows.store(0, Ordering::Release);
    }

    /// Reset per-session send state: counters keep accumulating, but
    /// frame ids, overflow count and the key flag start over.
    pub fn reset_session(&self) {
        self.frame_id.store(0, Ordering::Release);
        self.overflows.store(0, Ordering::Release);
        self.needs_key.store(true, Ordering::Release);
    }

    /// Fragment and send one encoded frame.
    pub async fn send_frame(&self, sink: &dyn ChannelSink, frame: &EncodedFrame) -> SendOutcome {
        if !sink.is_open() {
            return SendOutcome::Disconnect("channel closed");
        }

        let buffered = sink.buffered().await;
        if buffered > BUFFER_THRESHOLD {
            self.counters.buffer_overflows.fetch_add(1, Ordering::Relaxed);
            self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
            self.needs_key.store(true, Ordering::Release);
            let overflows = self.overflows.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::warn!(
                "buffer overflow: {buffered} bytes buffered (threshold {BUFFER_THRESHOLD}), #{overflows}"
            );
            if overflows >= OVERFLOW_DISCONNECT {
                return SendOutcome::Disconnect("buffer overflow");
            }
            return SendOutcome::Dropped;
        }
        self.overflows.store(0, Ordering::Release);

        let size = frame.data.len();
        let total_chunks = size.div_ceil(DATA_CHUNK_SIZE);
        if size == 0 || total_chunks > u16::MAX as usize {
            self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
            return SendOutcome::Dropped;
        }

        let mut header = PacketHeader {
            ts: frame.ts,
            encode_us: frame.encode_us,
            frame_id: self.frame_id.fetch_add(1, Ordering::AcqRel),
            chunk_index: 0,
            total_chunks: total_chunks as u16,
            frame_type: frame.is_key as u8,
        };

        let mut chunk = [0u8; CHUNK_SIZE];
        let mut sent_bytes = 0usize;
        for index in 0..total_chunks {
            // Re-check buffer pressure every 16 chunks; a frame that
            // doubles the threshold mid-flight is abandoned.
            if index > 0 && index % MID_FRAME_CHECK_EVERY == 0 {
                let mid = sink.buffered().await;
                if mid > BUFFER_THRESHOLD * 2 {
                    self.overflows.fetch_add(1, Ordering::AcqRel);
                    self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    self.counters.mid_frame_drops.fetch_add(1, Ordering::Relaxed);
                    self.needs_key.store(true, Ordering::Release);
                    tracing::warn!(
                        "mid-frame overflow at chunk {index}/{total_chunks}: {mid} bytes buffered"
                    );
                    return SendOutcome::Dropped;
                }
            }

            header.chunk_index = index as u16;
            header.write_to(&mut chunk);
            let offset = index * DATA_CHUNK_SIZE;
            let len = DATA_CHUNK_SIZE.min(size - offset);
            chunk[PacketHeader::SIZE..PacketHeader::SIZE + len]
                .copy_from_slice(&frame.data[offset..offset + len]);

            if let Err(e) = sink.send(&chunk[..PacketHeader::SIZE + len]).await {
                self.overflows.fetch_add(1, Ordering::AcqRel);
                self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                self.counters.send_fails.fetch_add(1, Ordering::Relaxed);
                self.needs_key.store(true, Ordering::Release);
                tracing::warn!("send failed at chunk {index}/{total_chunks}: {e}");
                return SendOutcome::Dropped;
            }
            sent_bytes += PacketHeader::SIZE + len;
        }

        self.counters
            .sent_bytes
            .fetch_add(sent_bytes as u64, Ordering::Relaxed);
        self.counters.sent_frames.fetch_add(1, Ordering::Relaxed);
        SendOutcome::Sent
    }

    /// Send one audio packet, or silently drop it when the channel is
    /// pressured — audio is latency-biased, not reliability-biased.
    pub async fn send_audio(&self, sink: &dyn ChannelSink, packet: &AudioPacket) -> bool {
        if packet.data.is_empty()
            || packet.data.len() > MAX_AUDIO_PAYLOAD
            || self.overflows.load(Ordering::Acquire) >= 5
            || !sink.is_open()
        {
            return false;
        }
        if sink.buffered().await > BUFFER_THRESHOLD / 2 {
            return false;
        }
        let message = AudioHeader::encode_message(packet.ts, packet.samples, &packet.data);
        match sink.send(&message).await {
            Ok(()) => {
                self.counters
                    .sent_bytes
                    .fetch_add(message.len() as u64, Ordering::Relaxed);
                self.counters.audio_packets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.send_fails.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Send a pre-encoded control/clipboard payload when the channel
    /// is not pressured.
    pub async fn send_raw(&self, sink: &dyn ChannelSink, payload: &[u8]) -> bool {
        if payload.is_empty() || !sink.is_open() {
            return false;
        }
        if sink.buffered().await > BUFFER_THRESHOLD / 2 {
            return false;
        }
        match sink.send(payload).await {
            Ok(()) => true,
            Err(_) => {
                self.counters.send_fails.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scripted sink: records sends, serves `buffered` readings from
    /// a queue (last value repeats).
    struct MockSink {
        sent: Mutex<Vec<Vec<u8>>>,
        buffered: Mutex<Vec<usize>>,
        buffered_reads: AtomicUsize,
        open: AtomicBool,
        fail_after: AtomicUsize,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                buffered: Mutex::new(vec![0]),
                buffered_reads: AtomicUsize::new(0),
                open: AtomicBool::new(true),
                fail_after: AtomicUsize::new(usize::MAX),
            }
        }

        fn with_buffered(levels: &[usize]) -> Self {
            let sink = Self::new();
            *sink.buffered.lock().unwrap() = levels.to_vec();
            sink
        }
    }

    #[async_trait]
    impl ChannelSink for MockSink {
        async fn send(&self, data: &[u8]) -> Result<()> {
            let mut sent = self.sent.lock().unwrap();
            if sent.len() >= self.fail_after.load(Ordering::Relaxed) {
                return Err(crate::error::VantageError::SendFailed("scripted".into()));
            }
            sent.push(data.to_vec());
            Ok(())
        }

        async fn buffered(&self) -> usize {
            let reads = self.buffered_reads.fetch_add(1, Ordering::Relaxed);
            let levels = self.buffered.lock().unwrap();
            *levels.get(reads).unwrap_or_else(|| levels.last().unwrap())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::Relaxed)
        }
    }

    fn frame(len: usize, key: bool) -> EncodedFrame {
        EncodedFrame {
            data: vec![0x5A; len],
            ts: 777,
            encode_us: 1500,
            is_key: key,
        }
    }

    fn audio(len: usize) -> AudioPacket {
        AudioPacket {
            data: vec![0xA0; len],
            ts: 55,
            samples: 960,
        }
    }

    #[tokio::test]
    async fn chunk_indices_cover_frame_in_order() {
        let sink = MockSink::new();
        let out = Outbound::new();
        let payload = DATA_CHUNK_SIZE * 3 + 100; // 4 chunks
        assert_eq!(out.send_frame(&sink, &frame(payload, true)).await, SendOutcome::Sent);

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);
        for (i, chunk) in sent.iter().enumerate() {
            let header = PacketHeader::decode(chunk).unwrap();
            assert_eq!(header.chunk_index as usize, i);
            assert_eq!(header.total_chunks, 4);
            assert_eq!(header.frame_id, 0);
            assert_eq!(header.frame_type, 1);
            assert_eq!(header.ts, 777);
            assert!(chunk.len() <= CHUNK_SIZE);
        }
        // Reassembled payload matches.
        let total: usize = sent.iter().map(|c| c.len() - PacketHeader::SIZE).sum();
        assert_eq!(total, payload);
    }

    #[tokio::test]
    async fn frame_ids_strictly_increase() {
        let sink = MockSink::new();
        let out = Outbound::new();
        for expected in 0..5u32 {
            out.send_frame(&sink, &frame(100, false)).await;
            let sent = sink.sent.lock().unwrap();
            let header = PacketHeader::decode(sent.last().unwrap()).unwrap();
            assert_eq!(header.frame_id, expected);
        }
    }

    #[tokio::test]
    async fn overflow_drops_and_requests_key() {
        let sink = MockSink::with_buffered(&[BUFFER_THRESHOLD + 1]);
        let out = Outbound::new();
        out.take_needs_key(); // clear the initial flag

        assert_eq!(
            out.send_frame(&sink, &frame(100, false)).await,
            SendOutcome::Dropped
        );
        assert!(out.take_needs_key(), "overflow marks keyframe-needed");
        assert!(sink.sent.lock().unwrap().is_empty());
        assert_eq!(out.counters.snapshot().dropped_frames, 1);
        assert_eq!(out.overflow_count(), 1);
    }

    #[tokio::test]
    async fn ten_consecutive_overflows_disconnect() {
        let sink = MockSink::with_buffered(&[BUFFER_THRESHOLD + 1]);
        let out = Outbound::new();
        for _ in 0..OVERFLOW_DISCONNECT - 1 {
            assert_eq!(
                out.send_frame(&sink, &frame(10, false)).await,
                SendOutcome::Dropped
            );
        }
        assert_eq!(
            out.send_frame(&sink, &frame(10, false)).await,
            SendOutcome::Disconnect("buffer overflow")
        );
    }

    #[tokio::test]
    async fn clean_send_resets_overflow_run() {
        let sink = MockSink::with_buffered(&[BUFFER_THRESHOLD + 1, 0]);
        let out = Outbound::new();
        assert_eq!(
            out.send_frame(&sink, &frame(10, false)).await,
            SendOutcome::Dropped
        );
        assert_eq!(out.overflow_count(), 1);
        assert_eq!(
            out.send_frame(&sink, &frame(10, false)).await,
            SendOutcome::Sent
        );
        assert_eq!(out.overflow_count(), 0);
    }

    #[tokio::test]
    async fn mid_frame_pressure_aborts_remaining_chunks() {
        // First reading passes the entry check; the reading at chunk
        // 16 doubles the threshold.
        let sink = MockSink::with_buffered(&[0, BUFFER_THRESHOLD * 2 + 1]);
        let out = Outbound::new();
        out.take_needs_key();

        let payload = DATA_CHUNK_SIZE * 32; // 32 chunks
        assert_eq!(
            out.send_frame(&sink, &frame(payload, false)).await,
            SendOutcome::Dropped
        );
        assert_eq!(sink.sent.lock().unwrap().len(), 16, "aborted at the re-check");
        assert!(out.take_needs_key());
        assert_eq!(out.counters.snapshot().mid_frame_drops, 1);
    }

    #[tokio::test]
    async fn chunk_count_boundary() {
        let sink = MockSink::new();
        let out = Outbound::new();

        // Exactly 65535 chunks is allowed.
        let max_ok = DATA_CHUNK_SIZE * u16::MAX as usize;
        assert_eq!(
            out.send_frame(&sink, &frame(max_ok, false)).await,
            SendOutcome::Sent
        );

        // One chunk more is dropped.
        let too_big = max_ok + 1;
        assert_eq!(
            out.send_frame(&sink, &frame(too_big, false)).await,
            SendOutcome::Dropped
        );

        // Empty frames are dropped too.
        assert_eq!(
            out.send_frame(&sink, &frame(0, false)).await,
            SendOutcome::Dropped
        );
    }

    #[tokio::test]
    async fn send_failure_marks_key_and_counts() {
        let sink = MockSink::new();
        sink.fail_after.store(2, Ordering::Relaxed);
        let out = Outbound::new();
        out.take_needs_key();

        let payload = DATA_CHUNK_SIZE * 4;
        assert_eq!(
            out.send_frame(&sink, &frame(payload, false)).await,
            SendOutcome::Dropped
        );
        assert!(out.take_needs_key());
        let snap = out.counters.snapshot();
        assert_eq!(snap.send_fails, 1);
        assert_eq!(snap.sent_frames, 0);
    }

    #[tokio::test]
    async fn audio_gated_by_half_threshold() {
        let sink = MockSink::with_buffered(&[BUFFER_THRESHOLD / 2 + 1]);
        let out = Outbound::new();
        assert!(!out.send_audio(&sink, &audio(100)).await);

        let sink = MockSink::with_buffered(&[BUFFER_THRESHOLD / 2 - 1]);
        assert!(out.send_audio(&sink, &audio(100)).await);
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let header = AudioHeader::decode(&sent[0]).unwrap();
        assert_eq!(header.samples, 960);
        assert_eq!(header.data_len, 100);
    }

    #[tokio::test]
    async fn audio_suppressed_during_overflow_run() {
        let pressured = MockSink::with_buffered(&[BUFFER_THRESHOLD + 1]);
        let out = Outbound::new();
        for _ in 0..5 {
            out.send_frame(&pressured, &frame(10, false)).await;
        }
        let clear = MockSink::new();
        assert!(!out.send_audio(&clear, &audio(100)).await, "overflows >= 5");
    }

    #[tokio::test]
    async fn audio_size_limits() {
        let sink = MockSink::new();
        let out = Outbound::new();
        assert!(!out.send_audio(&sink, &audio(0)).await);
        assert!(!out.send_audio(&sink, &audio(MAX_AUDIO_PAYLOAD + 1)).await);
        assert!(out.send_audio(&sink, &audio(MAX_AUDIO_PAYLOAD)).await);
    }

    #[tokio::test]
    async fn closed_sink_disconnects() {
        let sink = MockSink::new();
        sink.open.store(false, Ordering::Relaxed);
        let out = Outbound::new();
        assert_eq!(
            out.send_frame(&sink, &frame(10, false)).await,
            SendOutcome::Disconnect("channel closed")
        );
        assert!(!out.send_audio(&sink, &audio(10)).await);
        assert!(!out.send_raw(&sink, b"data").await);
    }

    #[tokio::test]
    async fn session_reset_restarts_frame_ids() {
        let sink = MockSink::new();
        let out = Outbound::new();
        out.send_frame(&sink, &frame(10, false)).await;
        out.send_frame(&sink, &frame(10, false)).await;
        out.reset_session();
        out.send_frame(&sink, &frame(10, false)).await;
        let sent = sink.sent.lock().unwrap();
        let header = PacketHeader::decode(sent.last().unwrap()).unwrap();
        assert_eq!(header.frame_id, 0);
        assert!(out.take_needs_key(), "reset re-arms the key flag");
    }
}
