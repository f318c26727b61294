//! Integration tests — full offer/answer handshake, channel
//! authentication, fps negotiation and frame delivery over a real
//! in-process WebRTC pair on localhost.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use vantage_core::capture::synthetic::{spawn_surface_pump, SyntheticBackend, SyntheticTexture};
use vantage_core::encoder::passthrough::PassthroughBackend;
use vantage_core::protocol::{
    decode_host_info, decode_monitor_list, encode_monitor_set, peek_magic, AuthRequest,
    AuthResponse, FpsSet, PacketHeader, MSG_AUDIO_DATA, MSG_AUTH_RESPONSE, MSG_CLIPBOARD_IMAGE,
    MSG_CLIPBOARD_TEXT, MSG_FPS_ACK, MSG_HOST_INFO, MSG_MONITOR_LIST, MSG_PING, MSG_REQUEST_KEY,
};
use vantage_core::{
    ClipboardSync, EncoderFactory, InputInjector, MemoryClipboard, MonitorInfo, MonitorRegistry,
    NullInputBackend, StreamService, TransportConfig, TransportServer,
};

type TestService = StreamService<SyntheticBackend, PassthroughBackend<SyntheticTexture>>;

// ── Helpers ──────────────────────────────────────────────────────

fn registry() -> Arc<MonitorRegistry> {
    Arc::new(MonitorRegistry::new(vec![
        MonitorInfo {
            index: 0,
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            refresh_hz: 60,
            primary: true,
            name: "LOOP-0".into(),
        },
        MonitorInfo {
            index: 1,
            x: 1920,
            y: 0,
            width: 2560,
            height: 1440,
            refresh_hz: 60,
            primary: false,
            name: "LOOP-1".into(),
        },
    ]))
}

/// Build and start the full pipeline on synthetic backends, with a
/// surface pump standing in for the OS capture thread.
fn start_service() -> (Arc<TestService>, std::thread::JoinHandle<()>) {
    let injector = Arc::new(InputInjector::new(Box::new(NullInputBackend)));
    injector.enable();
    let clipboard = Arc::new(ClipboardSync::new(Box::<MemoryClipboard>::default()));
    let factory: EncoderFactory<PassthroughBackend<SyntheticTexture>> =
        Arc::new(|config| Ok(PassthroughBackend::new(config)));

    let service = TestService::new(
        SyntheticBackend::new(),
        factory,
        registry(),
        injector,
        clipboard,
        TransportConfig {
            stun_servers: Vec::new(), // same machine: no STUN needed
            lan_optimized: false,
            include_loopback: true,
        },
        tokio::runtime::Handle::current(),
    )
    .unwrap();
    service.transport().set_credentials("alice", "123456");
    service.start();

    let pump = spawn_surface_pump(Arc::clone(service.capture()), service.running_flag());
    (service, pump)
}

/// Magics the server originates; everything else on the wire is a
/// video chunk.
fn control_magic(data: &[u8]) -> Option<u32> {
    match peek_magic(data) {
        Some(m)
            if m == MSG_AUTH_RESPONSE
                || m == MSG_HOST_INFO
                || m == MSG_MONITOR_LIST
                || m == MSG_FPS_ACK
                || m == MSG_PING
                || m == MSG_AUDIO_DATA
                || m == MSG_CLIPBOARD_TEXT
                || m == MSG_CLIPBOARD_IMAGE =>
        {
            Some(m)
        }
        _ => None,
    }
}

/// Reassembles fragmented frames by `(frame_id, total_chunks)`.
#[derive(Default)]
struct FrameCollector {
    partial: HashMap<u32, (PacketHeader, Vec<Option<Vec<u8>>>)>,
}

impl FrameCollector {
    fn push(&mut self, chunk: &[u8]) -> Option<(PacketHeader, Vec<u8>)> {
        let header = PacketHeader::decode(chunk).ok()?;
        let payload = chunk[PacketHeader::SIZE..].to_vec();
        let complete = {
            let entry = self
                .partial
                .entry(header.frame_id)
                .or_insert_with(|| (header, vec![None; header.total_chunks as usize]));
            entry.1[header.chunk_index as usize] = Some(payload);
            entry.1.iter().all(Option::is_some)
        };
        if complete {
            let (header, chunks) = self.partial.remove(&header.frame_id).unwrap();
            let data = chunks.into_iter().flatten().flatten().collect();
            return Some((header, data));
        }
        None
    }
}

struct TestClient {
    _pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
    frames: FrameCollector,
}

impl TestClient {
    /// Offer → answer → open "screen". Panics on timeout.
    async fn connect(server: &Arc<TransportServer>) -> Self {
        let mut media = MediaEngine::default();
        media.register_default_codecs().unwrap();
        let mut setting = SettingEngine::default();
        setting.set_include_loopback_candidate(true);
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_setting_engine(setting)
            .build();
        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        let dc = pc.create_data_channel("screen", None).await.unwrap();

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        dc.on_message(Box::new(move |message: DataChannelMessage| {
            let msg_tx = msg_tx.clone();
            Box::pin(async move {
                let _ = msg_tx.send(message.data.to_vec());
            })
        }));
        let (open_tx, mut open_rx) = mpsc::channel(1);
        dc.on_open(Box::new(move || {
            let open_tx = open_tx.clone();
            Box::pin(async move {
                let _ = open_tx.send(()).await;
            })
        }));

        let offer = pc.create_offer(None).await.unwrap();
        let mut gathered = pc.gathering_complete_promise().await;
        pc.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let offer_sdp = pc.local_description().await.unwrap().sdp;

        server.set_remote_offer(&offer_sdp).await.unwrap();
        let answer_sdp = server.local_description().await.unwrap();
        pc.set_remote_description(RTCSessionDescription::answer(answer_sdp).unwrap())
            .await
            .unwrap();

        timeout(Duration::from_secs(10), open_rx.recv())
            .await
            .expect("data channel open timeout");

        Self {
            _pc: pc,
            dc,
            incoming: msg_rx,
            frames: FrameCollector::default(),
        }
    }

    async fn send(&self, data: &[u8]) {
        self.dc.send(&Bytes::copy_from_slice(data)).await.unwrap();
    }

    async fn recv(&mut self, deadline: Duration) -> Option<Vec<u8>> {
        timeout(deadline, self.incoming.recv()).await.ok().flatten()
    }

    /// Next control message with `magic`, skipping everything else.
    async fn recv_magic(&mut self, magic: u32, deadline: Duration) -> Vec<u8> {
        let end = Instant::now() + deadline;
        loop {
            let remaining = end.saturating_duration_since(Instant::now());
            let message = self
                .recv(remaining)
                .await
                .unwrap_or_else(|| panic!("timed out waiting for {magic:#x}"));
            if peek_magic(&message) == Some(magic) {
                return message;
            }
        }
    }

    /// Next fully reassembled video frame.
    async fn recv_frame(&mut self, deadline: Duration) -> (PacketHeader, Vec<u8>) {
        let end = Instant::now() + deadline;
        loop {
            let remaining = end.saturating_duration_since(Instant::now());
            let message = self
                .recv(remaining)
                .await
                .expect("timed out waiting for a video frame");
            if control_magic(&message).is_some() {
                continue;
            }
            if let Some(frame) = self.frames.push(&message) {
                return frame;
            }
        }
    }

    /// Authenticate and assert the post-auth message order:
    /// AuthResponse{success}, host info, monitor list.
    async fn authenticate(&mut self) -> (u16, Vec<MonitorInfo>, u8) {
        self.send(
            &AuthRequest {
                username: "alice".into(),
                pin: "123456".into(),
            }
            .encode(),
        )
        .await;

        let response = self
            .recv_magic(MSG_AUTH_RESPONSE, Duration::from_secs(5))
            .await;
        assert!(AuthResponse::decode(&response).unwrap().success);

        let host = self.recv_magic(MSG_HOST_INFO, Duration::from_secs(5)).await;
        let host_fps = decode_host_info(&host).unwrap();

        let list = self
            .recv_magic(MSG_MONITOR_LIST, Duration::from_secs(5))
            .await;
        let (monitors, current) = decode_monitor_list(&list).unwrap();
        (host_fps, monitors, current)
    }

    /// Keep liveness alive for the duration of a test.
    fn spawn_pinger(&self) -> tokio::task::JoinHandle<()> {
        let dc = Arc::clone(&self.dc);
        tokio::spawn(async move {
            let mut sequence = 0u32;
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let mut ping = [0u8; 16];
                ping[0..4].copy_from_slice(&MSG_PING.to_le_bytes());
                ping[4..8].copy_from_slice(&sequence.to_le_bytes());
                sequence += 1;
                if dc.send(&Bytes::copy_from_slice(&ping)).await.is_err() {
                    break;
                }
            }
        })
    }
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handshake_auth_fps_and_first_keyframe() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    let (host_fps, monitors, current) = client.authenticate().await;
    assert_eq!(host_fps, 60);
    assert_eq!(current, 0);
    assert_eq!(monitors.len(), 2);
    assert_eq!(monitors[0].width, 1920);
    assert!(monitors[0].primary);

    // Negotiate fps; the ack echoes the effective value.
    client.send(&FpsSet { fps: 60, mode: 0 }.encode()).await;
    let ack = client.recv_magic(MSG_FPS_ACK, Duration::from_secs(5)).await;
    let ack = FpsSet::decode(&ack).unwrap();
    assert_eq!(ack.fps, 60);

    // The first delivered frame is a keyframe with frame_id 0.
    let (header, payload) = client.recv_frame(Duration::from_secs(5)).await;
    assert_eq!(header.frame_id, 0);
    assert_eq!(header.frame_type, 1);
    assert!(header.total_chunks >= 1);

    // The passthrough unit decodes to the streamed dimensions.
    let (_, key, width, height, _) =
        PassthroughBackend::<SyntheticTexture>::decode_unit(&payload).unwrap();
    assert!(key);
    assert_eq!((width, height), (1920, 1080));

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn frame_ids_increase_across_frames() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    client.authenticate().await;
    client.send(&FpsSet { fps: 60, mode: 0 }.encode()).await;

    let mut last = None;
    for _ in 0..5 {
        let (header, _) = client.recv_frame(Duration::from_secs(5)).await;
        if let Some(last) = last {
            assert!(header.frame_id > last, "frame ids strictly increase");
        }
        last = Some(header.frame_id);
    }

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auth_failure_closes_without_video() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;

    client
        .send(
            &AuthRequest {
                username: "alice".into(),
                pin: "000000".into(),
            }
            .encode(),
        )
        .await;

    let response = client
        .recv_magic(MSG_AUTH_RESPONSE, Duration::from_secs(5))
        .await;
    let response = AuthResponse::decode(&response).unwrap();
    assert!(!response.success);
    assert_eq!(response.error, "Invalid credentials");

    // The server force-closes shortly after; no video ever flows.
    let deadline = Instant::now() + Duration::from_secs(3);
    while service.transport().is_connected() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!service.transport().is_connected());
    assert!(!service.transport().is_authenticated());

    while let Some(message) = client.recv(Duration::from_millis(200)).await {
        assert!(
            control_magic(&message).is_some(),
            "no video frames before authentication"
        );
    }

    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn video_gated_until_fps_set() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    client.authenticate().await;

    // Authenticated but no MSG_FPS_SET yet: only control traffic.
    let end = Instant::now() + Duration::from_millis(600);
    while Instant::now() < end {
        if let Some(message) = client.recv(Duration::from_millis(100)).await {
            assert!(control_magic(&message).is_some(), "video before fps set");
        }
    }

    client.send(&FpsSet { fps: 30, mode: 0 }.encode()).await;
    client.recv_frame(Duration::from_secs(5)).await;

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn request_key_forces_keyframe() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    client.authenticate().await;
    client.send(&FpsSet { fps: 60, mode: 0 }.encode()).await;

    // Consume the opening keyframe, then find a delta frame.
    let (first, _) = client.recv_frame(Duration::from_secs(5)).await;
    assert_eq!(first.frame_type, 1);
    let mut current = first.frame_id;
    loop {
        let (header, _) = client.recv_frame(Duration::from_secs(5)).await;
        current = header.frame_id;
        if header.frame_type == 0 {
            break;
        }
    }

    client.send(&MSG_REQUEST_KEY.to_le_bytes()).await;

    // A later frame arrives as a keyframe.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        assert!(Instant::now() < deadline, "no keyframe after request");
        let (header, _) = client.recv_frame(Duration::from_secs(5)).await;
        if header.frame_id > current && header.frame_type == 1 {
            break;
        }
    }

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn monitor_switch_reannounces_and_rekeys() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    client.authenticate().await;
    client.send(&FpsSet { fps: 60, mode: 0 }.encode()).await;
    client.recv_frame(Duration::from_secs(5)).await;

    client.send(&encode_monitor_set(1)).await;

    // A fresh monitor list arrives with the new current index…
    let list = client
        .recv_magic(MSG_MONITOR_LIST, Duration::from_secs(5))
        .await;
    let (_, current) = decode_monitor_list(&list).unwrap();
    assert_eq!(current, 1);
    client.recv_magic(MSG_HOST_INFO, Duration::from_secs(5)).await;
    assert_eq!(service.capture().current_monitor_index(), 1);

    // …and streaming resumes with a keyframe at the new resolution.
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        assert!(Instant::now() < deadline, "no post-switch keyframe");
        let (header, payload) = client.recv_frame(Duration::from_secs(10)).await;
        let Ok((_, _, width, height, _)) =
            PassthroughBackend::<SyntheticTexture>::decode_unit(&payload)
        else {
            continue;
        };
        if (width, height) == (2560, 1440) {
            assert_eq!(header.frame_type, 1, "first frame at new mode is a key");
            break;
        }
    }

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ping_reply_echoes_payload_with_timestamp() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;

    client.authenticate().await;

    let mut ping = [0u8; 16];
    ping[0..4].copy_from_slice(&MSG_PING.to_le_bytes());
    ping[4..16].copy_from_slice(b"opaque-12345");
    client.send(&ping).await;

    let reply = client.recv_magic(MSG_PING, Duration::from_secs(5)).await;
    assert_eq!(reply.len(), 24);
    assert_eq!(&reply[..16], &ping);
    let server_ts = u64::from_le_bytes(reply[16..24].try_into().unwrap());
    assert!(server_ts > 0);

    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_fps_values_are_ignored() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    client.authenticate().await;

    // Out-of-range fps and mode: no ack, no state change.
    client.send(&FpsSet { fps: 0, mode: 0 }.encode()).await;
    client.send(&FpsSet { fps: 241, mode: 0 }.encode()).await;
    client.send(&FpsSet { fps: 60, mode: 3 }.encode()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!service.transport().is_fps_received());

    client.send(&FpsSet { fps: 240, mode: 0 }.encode()).await;
    let ack = client.recv_magic(MSG_FPS_ACK, Duration::from_secs(5)).await;
    assert_eq!(FpsSet::decode(&ack).unwrap().fps, 240);
    assert_eq!(service.capture().current_fps(), 240);

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn match_host_mode_substitutes_refresh_rate() {
    let (service, pump) = start_service();
    let mut client = TestClient::connect(service.transport()).await;
    let pinger = client.spawn_pinger();

    client.authenticate().await;

    // mode 1 requests the host refresh rate regardless of the fps
    // field.
    client.send(&FpsSet { fps: 144, mode: 1 }.encode()).await;
    let ack = client.recv_magic(MSG_FPS_ACK, Duration::from_secs(5)).await;
    let ack = FpsSet::decode(&ack).unwrap();
    assert_eq!(ack.fps, 60, "host refresh rate wins in match-host mode");
    assert_eq!(ack.mode, 1);

    pinger.abort();
    service.stop();
    pump.join().unwrap();
}
