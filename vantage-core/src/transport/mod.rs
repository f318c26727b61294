//! WebRTC transport server.
//!
//! Accepts a single peer's offer, produces an answer, opens one
//! reliable ordered binary sub-channel named `"screen"`, authenticates
//! the peer on that channel, and from then on multiplexes video
//! frames, audio packets, clipboard blobs and control messages over
//! the same channel with backpressure and ping liveness.
//!
//! | Module    | Purpose                                        |
//! |-----------|------------------------------------------------|
//! | `session` | Validated session-phase state machine          |
//! | `sink`    | Fragmentation, backpressure, send accounting   |

pub mod session;
pub mod sink;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::audio::AudioPacket;
use crate::clipboard::ClipboardSync;
use crate::clock::{timestamp_ms, timestamp_us, SessionId};
use crate::encoder::EncodedFrame;
use crate::error::{Result, VantageError};
use crate::input::InputInjector;
use crate::monitor::MonitorRegistry;
use crate::protocol::{
    encode_fps_ack, encode_host_info, encode_monitor_list, encode_ping_reply, peek_magic,
    AuthRequest, AuthResponse, FpsSet, MSG_AUTH_REQUEST, MSG_FPS_SET, MSG_KEY, MSG_MONITOR_SET,
    MSG_MOUSE_BTN, MSG_MOUSE_MOVE, MSG_MOUSE_WHEEL, MSG_PING, MSG_REQUEST_KEY, PING_SIZE,
};
use crate::transport::session::SessionPhase;
use crate::transport::sink::{ChannelSink, Outbound, SendOutcome, TransportSnapshot};

/// Label of the single multiplexed data channel.
pub const CHANNEL_LABEL: &str = "screen";

/// No incoming ping for this long while connected closes the session.
pub const PING_TIMEOUT_MS: i64 = 3000;

/// Consecutive auth failures that escalate to an immediate close.
const AUTH_FAILURE_LIMIT: u32 = 3;

/// Transport-level settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub stun_servers: Vec<String>,
    /// Hand the answer out as soon as a couple of host candidates
    /// exist instead of waiting for full gathering.
    pub lan_optimized: bool,
    /// Gather loopback host candidates too. Needed for same-machine
    /// peers (and the test suite); off for real deployments.
    pub include_loopback: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            lan_optimized: false,
            include_loopback: false,
        }
    }
}

/// Credentials compared verbatim against the client's `AuthRequest`.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub pin: String,
}

/// Orchestrator-provided reactions to control events. Per the
/// callback rule, these only read/write atomics or enqueue work —
/// none may take a lock the transport holds while invoking them.
pub struct TransportCallbacks {
    /// Effective fps and mode were negotiated.
    pub on_fps: Box<dyn Fn(u32, u8) + Send + Sync>,
    /// Re-query the host refresh rate (match-host mode).
    pub host_fps: Box<dyn Fn() -> u16 + Send + Sync>,
    /// Currently streamed monitor index.
    pub current_monitor: Box<dyn Fn() -> u8 + Send + Sync>,
    /// Attempt a monitor switch; `true` on success.
    pub on_monitor_set: Box<dyn Fn(u8) -> bool + Send + Sync>,
    /// The session left Connected. Must be idempotent.
    pub on_disconnect: Box<dyn Fn() + Send + Sync>,
    /// The peer authenticated.
    pub on_authenticated: Box<dyn Fn() + Send + Sync>,
}

struct DataChannelSink {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl ChannelSink for DataChannelSink {
    async fn send(&self, data: &[u8]) -> Result<()> {
        self.channel
            .send(&Bytes::copy_from_slice(data))
            .await
            .map(|_| ())
            .map_err(|e| VantageError::SendFailed(e.to_string()))
    }

    async fn buffered(&self) -> usize {
        self.channel.buffered_amount().await
    }

    fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }
}

/// The server. Shared (`Arc`) between the HTTP layer, the encode and
/// audio threads, and the webrtc callback workers.
pub struct TransportServer {
    api: API,
    rtc_config: RTCConfiguration,
    lan_optimized: bool,

    pc: tokio::sync::Mutex<Option<Arc<RTCPeerConnection>>>,
    channel: Mutex<Option<Arc<RTCDataChannel>>>,
    outbound: Outbound,
    phase: Mutex<SessionPhase>,
    session_id: Mutex<SessionId>,

    peer_connected: AtomicBool,
    channel_open: AtomicBool,
    connected: AtomicBool,
    authenticated: AtomicBool,
    fps_received: AtomicBool,
    gathering_complete: AtomicBool,
    candidate_count: AtomicU32,

    current_fps: AtomicU32,
    fps_mode: AtomicU32,
    last_ping_ms: AtomicI64,
    ping_timeout_logged: AtomicBool,

    credentials: Mutex<Credentials>,
    auth_failures: AtomicU32,

    sdp_notify: Notify,
    callbacks: TransportCallbacks,
    injector: Arc<InputInjector>,
    clipboard: Arc<ClipboardSync>,
    monitors: Arc<MonitorRegistry>,
}

impl TransportServer {
    pub fn new(
        config: TransportConfig,
        callbacks: TransportCallbacks,
        injector: Arc<InputInjector>,
        clipboard: Arc<ClipboardSync>,
        monitors: Arc<MonitorRegistry>,
    ) -> Result<Arc<Self>> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let mut setting = SettingEngine::default();
        if config.include_loopback {
            setting.set_include_loopback_candidate(true);
        }
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_setting_engine(setting)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: config.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        info!("transport initialized ({} stun servers)", config.stun_servers.len());
        Ok(Arc::new(Self {
            api,
            rtc_config,
            lan_optimized: config.lan_optimized,
            pc: tokio::sync::Mutex::new(None),
            channel: Mutex::new(None),
            outbound: Outbound::new(),
            phase: Mutex::new(SessionPhase::Idle),
            session_id: Mutex::new(SessionId::next()),
            peer_connected: AtomicBool::new(false),
            channel_open: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            authenticated: AtomicBool::new(false),
            fps_received: AtomicBool::new(false),
            gathering_complete: AtomicBool::new(false),
            candidate_count: AtomicU32::new(0),
            current_fps: AtomicU32::new(60),
            fps_mode: AtomicU32::new(0),
            last_ping_ms: AtomicI64::new(0),
            ping_timeout_logged: AtomicBool::new(false),
            credentials: Mutex::new(Credentials::default()),
            auth_failures: AtomicU32::new(0),
            sdp_notify: Notify::new(),
            callbacks,
            injector,
            clipboard,
            monitors,
        }))
    }

    pub fn set_credentials(&self, username: &str, pin: &str) {
        let mut creds = self.credentials.lock().unwrap();
        creds.username = username.to_string();
        creds.pin = pin.to_string();
    }

    // ── Offer / answer ───────────────────────────────────────────

    /// Apply a remote offer: tear down any previous session, create a
    /// fresh peer connection and prepare the local answer.
    pub async fn set_remote_offer(self: &Arc<Self>, sdp: &str) -> Result<()> {
        self.teardown_session().await;
        let session = SessionId::next();
        *self.session_id.lock().unwrap() = session;
        info!("{session}: remote offer received");

        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config.clone()).await?);
        self.register_handlers(&pc);
        *self.pc.lock().await = Some(Arc::clone(&pc));

        {
            let mut phase = self.phase.lock().unwrap();
            let _ = phase.reset();
            phase.offer_received()?;
        }

        pc.set_remote_description(RTCSessionDescription::offer(sdp.to_string())?)
            .await?;
        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer).await?;
        debug!("local answer prepared");
        Ok(())
    }

    /// Wait for ICE gathering and return the final local SDP.
    ///
    /// The LAN-optimized variant returns once the local description is
    /// available and either gathering completed, two candidates were
    /// emitted, or 150 ms elapsed — whichever comes first after a
    /// 200 ms local-description budget.
    pub async fn local_description(&self) -> Result<String> {
        let pc = self
            .pc
            .lock()
            .await
            .clone()
            .ok_or(VantageError::NotConnected)?;

        if self.lan_optimized {
            let desc_deadline = Instant::now() + Duration::from_millis(200);
            while pc.local_description().await.is_none() && Instant::now() < desc_deadline {
                let _ = tokio::time::timeout(
                    Duration::from_millis(20),
                    self.sdp_notify.notified(),
                )
                .await;
            }
            let deadline = Instant::now() + Duration::from_millis(150);
            while !self.gathering_complete.load(Ordering::Acquire)
                && self.candidate_count.load(Ordering::Acquire) < 2
                && Instant::now() < deadline
            {
                let _ = tokio::time::timeout(
                    Duration::from_millis(20),
                    self.sdp_notify.notified(),
                )
                .await;
            }
        } else {
            // STUN can take a while; wait up to 10 s for gathering.
            let deadline = Instant::now() + Duration::from_secs(10);
            while !self.gathering_complete.load(Ordering::Acquire)
                && Instant::now() < deadline
            {
                let _ = tokio::time::timeout(
                    Duration::from_millis(100),
                    self.sdp_notify.notified(),
                )
                .await;
            }
            if !self.gathering_complete.load(Ordering::Acquire) {
                warn!("ice gathering timeout after 10s");
            }
        }

        // The current local description carries all gathered
        // candidates, unlike the one cached at answer time.
        let desc = pc
            .local_description()
            .await
            .ok_or_else(|| VantageError::Other("local description empty".into()))?;

        {
            let mut phase = self.phase.lock().unwrap();
            if self.gathering_complete.load(Ordering::Acquire) {
                let _ = phase.gathering_done();
            }
            let _ = phase.negotiated();
        }
        let candidates = desc.sdp.matches("a=candidate:").count();
        info!("final sdp: {candidates} candidates");
        Ok(desc.sdp)
    }

    // ── Handlers ─────────────────────────────────────────────────

    fn register_handlers(self: &Arc<Self>, pc: &Arc<RTCPeerConnection>) {
        let weak = Arc::downgrade(self);
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(server) = weak.upgrade() else { return };
                info!("connection state: {state}");
                match state {
                    RTCPeerConnectionState::Connected => {
                        server.peer_connected.store(true, Ordering::Release);
                        server.update_connected();
                    }
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed => {
                        server.peer_connected.store(false, Ordering::Release);
                        server.force_disconnect("transport state change").await;
                    }
                    _ => {}
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_ice_candidate(Box::new(move |candidate| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(server) = weak.upgrade() else { return };
                match candidate {
                    Some(c) => {
                        server.candidate_count.fetch_add(1, Ordering::AcqRel);
                        debug!("ice candidate: {}", c.address);
                    }
                    None => debug!("ice candidate gathering finished"),
                }
                server.sdp_notify.notify_waiters();
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(server) = weak.upgrade() else { return };
                info!("ice gathering: {state}");
                if state == RTCIceGathererState::Complete {
                    server.gathering_complete.store(true, Ordering::Release);
                    server.sdp_notify.notify_waiters();
                }
            })
        }));

        let weak = Arc::downgrade(self);
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let weak = weak.clone();
            Box::pin(async move {
                let Some(server) = weak.upgrade() else { return };
                info!("data channel received: {}", dc.label());
                if dc.label() != CHANNEL_LABEL {
                    return;
                }
                *server.channel.lock().unwrap() = Some(Arc::clone(&dc));

                let weak_open = Arc::downgrade(&server);
                dc.on_open(Box::new(move || {
                    let weak_open = weak_open.clone();
                    Box::pin(async move {
                        let Some(server) = weak_open.upgrade() else { return };
                        info!("data channel opened");
                        server.authenticated.store(false, Ordering::Release);
                        server.outbound.request_key();
                        server.last_ping_ms.store(timestamp_ms(), Ordering::Release);
                        server.channel_open.store(true, Ordering::Release);
                        server.update_connected();
                    })
                }));

                let weak_close = Arc::downgrade(&server);
                dc.on_close(Box::new(move || {
                    let weak_close = weak_close.clone();
                    Box::pin(async move {
                        let Some(server) = weak_close.upgrade() else { return };
                        info!("data channel closed");
                        server.channel_open.store(false, Ordering::Release);
                        server.force_disconnect("channel closed").await;
                    })
                }));

                let weak_msg = Arc::downgrade(&server);
                dc.on_message(Box::new(move |msg| {
                    let weak_msg = weak_msg.clone();
                    Box::pin(async move {
                        if let Some(server) = weak_msg.upgrade() {
                            server.handle_message(&msg.data).await;
                        }
                    })
                }));
            })
        }));
    }

    /// Both the peer connection and the channel are up → Connected.
    fn update_connected(&self) {
        if !self.peer_connected.load(Ordering::Acquire)
            || !self.channel_open.load(Ordering::Acquire)
        {
            return;
        }
        if self.connected.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outbound.request_key();
        self.last_ping_ms.store(timestamp_ms(), Ordering::Release);
        self.ping_timeout_logged.store(false, Ordering::Release);
        {
            let mut phase = self.phase.lock().unwrap();
            // The HTTP layer may still be inside local_description();
            // drive the phase forward through any missed step.
            let _ = phase.negotiated();
            let _ = phase.connected();
        }
        info!("peer connected");
    }

    // ── Message dispatch ─────────────────────────────────────────

    async fn handle_message(self: &Arc<Self>, data: &[u8]) {
        let Some(magic) = peek_magic(data) else {
            return; // short or empty — ignored
        };

        if magic == MSG_AUTH_REQUEST {
            self.handle_auth(data).await;
            return;
        }
        if !self.authenticated.load(Ordering::Acquire) {
            return; // nothing but auth flows before the gate
        }

        match magic {
            MSG_MOUSE_MOVE | MSG_MOUSE_BTN | MSG_MOUSE_WHEEL | MSG_KEY => {
                self.injector.handle_message(data);
            }
            m if ClipboardSync::owns_magic(m) => {
                if let Some(reply) = self.clipboard.handle_message(data) {
                    self.send_clipboard(&reply).await;
                }
            }
            MSG_PING if data.len() == PING_SIZE => {
                self.last_ping_ms.store(timestamp_ms(), Ordering::Release);
                self.outbound.clear_overflows();
                self.ping_timeout_logged.store(false, Ordering::Release);
                if let Some(reply) = encode_ping_reply(data, timestamp_us()) {
                    self.send_control(&reply).await;
                }
            }
            MSG_FPS_SET => {
                let Ok(msg) = FpsSet::decode(data) else { return };
                if !msg.is_valid() {
                    return;
                }
                let effective = if msg.mode == 1 {
                    (self.callbacks.host_fps)() as u32
                } else {
                    msg.fps as u32
                };
                self.current_fps.store(effective, Ordering::Release);
                self.fps_mode.store(msg.mode as u32, Ordering::Release);
                self.fps_received.store(true, Ordering::Release);
                (self.callbacks.on_fps)(effective, msg.mode);
                self.send_control(&encode_fps_ack(effective as u16, msg.mode))
                    .await;
            }
            MSG_REQUEST_KEY => {
                self.outbound.request_key();
            }
            MSG_MONITOR_SET => {
                let Ok(index) = crate::protocol::decode_monitor_set(data) else {
                    return;
                };
                if (self.callbacks.on_monitor_set)(index) {
                    self.outbound.request_key();
                    self.send_monitor_list().await;
                    self.send_host_info().await;
                }
            }
            _ => {} // unknown magics are ignored
        }
    }

    async fn handle_auth(self: &Arc<Self>, data: &[u8]) {
        let Ok(request) = AuthRequest::decode(data) else {
            return;
        };
        let matches = {
            let creds = self.credentials.lock().unwrap();
            request.username == creds.username && request.pin == creds.pin
        };

        if matches {
            self.auth_failures.store(0, Ordering::Release);
            self.authenticated.store(true, Ordering::Release);
            {
                let mut phase = self.phase.lock().unwrap();
                let _ = phase.authenticated();
            }
            info!("client authenticated");
            self.send_control(
                &AuthResponse {
                    success: true,
                    error: String::new(),
                }
                .encode(),
            )
            .await;
            self.send_host_info().await;
            self.send_monitor_list().await;
            (self.callbacks.on_authenticated)();
        } else {
            let failures = self.auth_failures.fetch_add(1, Ordering::AcqRel) + 1;
            warn!("auth failed for '{}' ({failures} consecutive)", request.username);
            self.send_control(
                &AuthResponse {
                    success: false,
                    error: "Invalid credentials".into(),
                }
                .encode(),
            )
            .await;

            if failures >= AUTH_FAILURE_LIMIT {
                self.auth_failures.store(0, Ordering::Release);
                self.force_disconnect("auth failures").await;
            } else {
                // Give the response time to flush, then drop the peer.
                let weak = Arc::downgrade(self);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if let Some(server) = weak.upgrade() {
                        server.force_disconnect("auth failed").await;
                    }
                });
            }
        }
    }

    // ── Outbound ─────────────────────────────────────────────────

    fn sink(&self) -> Option<DataChannelSink> {
        let channel = self.channel.lock().unwrap().clone()?;
        Some(DataChannelSink { channel })
    }

    /// Fragment and send one encoded frame; applies backpressure and
    /// liveness policy.
    pub async fn send_frame(&self, frame: &EncodedFrame) {
        if !self.is_connected() || !self.is_authenticated() {
            return;
        }
        let Some(sink) = self.sink() else {
            self.force_disconnect("channel closed").await;
            return;
        };
        if self.is_ping_stale() {
            self.force_disconnect("ping timeout").await;
            return;
        }
        if let SendOutcome::Disconnect(reason) = self.outbound.send_frame(&sink, frame).await {
            self.force_disconnect(reason).await;
        }
    }

    /// Send one Opus packet, silently dropped under pressure.
    pub async fn send_audio(&self, packet: &AudioPacket) {
        if !self.is_connected() || !self.is_authenticated() {
            return;
        }
        let Some(sink) = self.sink() else { return };
        self.outbound.send_audio(&sink, packet).await;
    }

    /// Send a clipboard payload when the channel is clear.
    pub async fn send_clipboard(&self, payload: &[u8]) {
        if !self.is_connected() || !self.is_authenticated() {
            return;
        }
        let Some(sink) = self.sink() else { return };
        self.outbound.send_raw(&sink, payload).await;
    }

    /// Send a small control reply without pressure gating.
    async fn send_control(&self, payload: &[u8]) {
        let Some(sink) = self.sink() else { return };
        if let Err(e) = sink.send(payload).await {
            debug!("control send failed: {e}");
        }
    }

    async fn send_host_info(&self) {
        let fps = (self.callbacks.host_fps)();
        self.send_control(&encode_host_info(fps)).await;
    }

    async fn send_monitor_list(&self) {
        let monitors = self.monitors.snapshot();
        let current = (self.callbacks.current_monitor)();
        self.send_control(&encode_monitor_list(&monitors, current))
            .await;
    }

    // ── Liveness / teardown ──────────────────────────────────────

    fn is_ping_stale(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let last = self.last_ping_ms.load(Ordering::Acquire);
        if last > 0 && timestamp_ms() - last > PING_TIMEOUT_MS {
            if !self.ping_timeout_logged.swap(true, Ordering::AcqRel) {
                warn!("ping timeout");
            }
            return true;
        }
        false
    }

    /// Periodic liveness check, driven by the stats thread so the
    /// timeout fires even when no frames are flowing.
    pub async fn check_liveness(&self) {
        if self.is_ping_stale() {
            self.force_disconnect("ping timeout").await;
        }
    }

    /// Close the session. The disconnect callback fires exactly once
    /// per transition out of Connected.
    pub async fn force_disconnect(&self, reason: &str) {
        let was_connected = self.connected.swap(false, Ordering::AcqRel);
        let was_live = {
            let mut phase = self.phase.lock().unwrap();
            phase.close()
        };
        self.authenticated.store(false, Ordering::Release);
        self.fps_received.store(false, Ordering::Release);
        self.channel_open.store(false, Ordering::Release);
        self.peer_connected.store(false, Ordering::Release);
        self.outbound.clear_overflows();
        self.ping_timeout_logged.store(false, Ordering::Release);

        if !was_connected && !was_live {
            return;
        }
        warn!("disconnect: {reason}");

        let channel = self.channel.lock().unwrap().take();
        if let Some(channel) = channel {
            let _ = channel.close().await;
        }
        let pc = self.pc.lock().await.take();
        if let Some(pc) = pc {
            let _ = pc.close().await;
        }
        (self.callbacks.on_disconnect)();
    }

    /// Quietly drop any previous peer before applying a new offer.
    async fn teardown_session(&self) {
        self.connected.store(false, Ordering::Release);
        self.authenticated.store(false, Ordering::Release);
        self.fps_received.store(false, Ordering::Release);
        self.channel_open.store(false, Ordering::Release);
        self.peer_connected.store(false, Ordering::Release);
        self.gathering_complete.store(false, Ordering::Release);
        self.candidate_count.store(0, Ordering::Release);
        self.last_ping_ms.store(0, Ordering::Release);
        self.auth_failures.store(0, Ordering::Release);
        self.outbound.reset_session();
        {
            let mut phase = self.phase.lock().unwrap();
            phase.close();
            let _ = phase.reset();
        }
        let channel = self.channel.lock().unwrap().take();
        if let Some(channel) = channel {
            let _ = channel.close().await;
        }
        let pc = self.pc.lock().await.take();
        if let Some(pc) = pc {
            let _ = pc.close().await;
        }
    }

    // ── Observers ────────────────────────────────────────────────

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn is_fps_received(&self) -> bool {
        self.fps_received.load(Ordering::Acquire)
    }

    pub fn current_fps(&self) -> u32 {
        self.current_fps.load(Ordering::Acquire)
    }

    /// Consume the keyframe-needed flag for the next encode.
    pub fn take_needs_key(&self) -> bool {
        self.outbound.take_needs_key()
    }

    /// Raise the keyframe-needed flag.
    pub fn request_key(&self) {
        self.outbound.request_key();
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap()
    }

    /// Identifier of the current (or most recent) session.
    pub fn session_id(&self) -> SessionId {
        *self.session_id.lock().unwrap()
    }

    /// Drain the one-second transport counters.
    pub fn take_stats(&self) -> TransportSnapshot {
        self.outbound.counters.snapshot()
    }
}
