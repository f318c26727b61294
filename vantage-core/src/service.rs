//! The orchestrator: owns the pipeline components, wires the control
//! callbacks, and runs the encode, audio-dispatch and stats threads.
//!
//! Callback rule: closures handed to the transport or the capture
//! engine only read/write atomics, call into lock-free setters, or
//! enqueue onto the bounded service-event channel — reactions that
//! need real work (encoder rebuild, clipboard push) run on the encode
//! thread. Shutdown is cooperative: clearing `running` is observed at
//! every loop's next suspension point, plus an explicit frame-slot
//! wakeup for the encoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::audio::AudioQueue;
use crate::capture::{CaptureBackend, CaptureEngine};
use crate::clipboard::ClipboardSync;
use crate::encoder::{Av1Encoder, EncoderBackend, EncoderConfig};
use crate::error::Result;
use crate::input::{InputInjector, MonitorBounds};
use crate::monitor::MonitorRegistry;
use crate::pipeline::FrameSlot;
use crate::stats::{format_status_line, FpsAverage, StatusSample, Throughput};
use crate::transport::{TransportCallbacks, TransportConfig, TransportServer};

/// Bound on the frame-slot wait in the encode loop.
const SLOT_POP_TIMEOUT: Duration = Duration::from_millis(8);

/// Bound on the capture-fence wait before a frame is dropped.
const FENCE_WAIT_TIMEOUT: Duration = Duration::from_millis(5);

/// Bound on the audio-queue wait in the dispatch loop.
const AUDIO_POP_TIMEOUT: Duration = Duration::from_millis(10);

/// Builds a fresh encoder backend for a given mode; invoked at
/// startup and after every resolution change.
pub type EncoderFactory<E> =
    Arc<dyn Fn(&EncoderConfig) -> Result<E> + Send + Sync>;

/// Work the transport/capture callbacks defer to the encode thread.
enum ServiceEvent {
    /// Monitor switch happened: rebuild the encoder for `(w, h, fps)`.
    Resolution(u32, u32, u32),
    /// The peer authenticated: wiggle the cursor and push the
    /// clipboard.
    Authenticated,
}

/// Owns the whole streaming pipeline for one host process.
pub struct StreamService<B, E>
where
    B: CaptureBackend,
    E: EncoderBackend<Texture = B::Texture> + 'static,
{
    slot: Arc<FrameSlot<B::Texture>>,
    capture: Arc<CaptureEngine<B>>,
    transport: Arc<TransportServer>,
    injector: Arc<InputInjector>,
    clipboard: Arc<ClipboardSync>,
    audio_queue: Arc<AudioQueue>,
    monitors: Arc<MonitorRegistry>,
    encoder: Arc<Mutex<Option<Av1Encoder<E>>>>,
    encoder_factory: EncoderFactory<E>,
    events: Mutex<Option<Receiver<ServiceEvent>>>,
    running: Arc<AtomicBool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    runtime: tokio::runtime::Handle,
}

impl<B, E> StreamService<B, E>
where
    B: CaptureBackend,
    E: EncoderBackend<Texture = B::Texture> + 'static,
{
    /// Construct the pipeline and wire every callback. Fatal on
    /// capture or initial-encoder construction failure.
    pub fn new(
        backend: B,
        encoder_factory: EncoderFactory<E>,
        monitors: Arc<MonitorRegistry>,
        injector: Arc<InputInjector>,
        clipboard: Arc<ClipboardSync>,
        transport_config: TransportConfig,
        runtime: tokio::runtime::Handle,
    ) -> Result<Arc<Self>> {
        let slot = Arc::new(FrameSlot::new());
        let capture = Arc::new(CaptureEngine::new(
            backend,
            Arc::clone(&monitors),
            Arc::clone(&slot),
        )?);

        let (event_tx, event_rx) = std::sync::mpsc::sync_channel::<ServiceEvent>(8);

        // Initial encoder for the bound mode.
        let (width, height) = capture.dimensions();
        let initial_config = EncoderConfig::new(width, height, capture.host_fps() as u32);
        let encoder = Arc::new(Mutex::new(Some(Av1Encoder::new(
            (*encoder_factory)(&initial_config)?,
            initial_config,
        ))));
        info!(
            "encoder: {}x{} @ {} fps",
            initial_config.width, initial_config.height, initial_config.fps
        );

        // Resolution changes are enqueued, never handled on the
        // capture callback thread.
        {
            let event_tx = event_tx.clone();
            capture.set_resolution_callback(move |w, h, hz| {
                info!("resolution changed: {w}x{h} @ {hz}Hz");
                if let Err(TrySendError::Full(_)) =
                    event_tx.try_send(ServiceEvent::Resolution(w, h, hz as u32))
                {
                    warn!("resolution event queue full");
                }
            });
        }

        let callbacks = TransportCallbacks {
            on_fps: {
                let capture = Arc::clone(&capture);
                Box::new(move |fps, _mode| {
                    capture.set_fps(fps);
                    if !capture.is_capturing() {
                        capture.start_capture();
                    }
                })
            },
            host_fps: {
                let capture = Arc::clone(&capture);
                Box::new(move || capture.refresh_host_fps())
            },
            current_monitor: {
                let capture = Arc::clone(&capture);
                Box::new(move || capture.current_monitor_index() as u8)
            },
            on_monitor_set: {
                let capture = Arc::clone(&capture);
                let injector = Arc::clone(&injector);
                let monitors = Arc::clone(&monitors);
                Box::new(move |index| {
                    if capture.switch_monitor(index as usize).is_err() {
                        return false;
                    }
                    if let Some(monitor) = monitors.get(index as usize) {
                        injector.set_monitor_bounds(MonitorBounds {
                            x: monitor.x,
                            y: monitor.y,
                            width: monitor.width as i32,
                            height: monitor.height as i32,
                        });
                    }
                    true
                })
            },
            on_disconnect: {
                let capture = Arc::clone(&capture);
                Box::new(move || capture.pause_capture())
            },
            on_authenticated: {
                let event_tx = event_tx.clone();
                Box::new(move || {
                    let _ = event_tx.try_send(ServiceEvent::Authenticated);
                })
            },
        };

        let transport = TransportServer::new(
            transport_config,
            callbacks,
            Arc::clone(&injector),
            Arc::clone(&clipboard),
            Arc::clone(&monitors),
        )?;

        Ok(Arc::new(Self {
            slot,
            capture,
            transport,
            injector,
            clipboard,
            audio_queue: Arc::new(AudioQueue::new()),
            monitors,
            encoder,
            encoder_factory,
            events: Mutex::new(Some(event_rx)),
            running: Arc::new(AtomicBool::new(true)),
            handles: Mutex::new(Vec::new()),
            runtime,
        }))
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn transport(&self) -> &Arc<TransportServer> {
        &self.transport
    }

    pub fn capture(&self) -> &Arc<CaptureEngine<B>> {
        &self.capture
    }

    pub fn audio_queue(&self) -> &Arc<AudioQueue> {
        &self.audio_queue
    }

    pub fn injector(&self) -> &Arc<InputInjector> {
        &self.injector
    }

    pub fn clipboard(&self) -> &Arc<ClipboardSync> {
        &self.clipboard
    }

    pub fn monitors(&self) -> &Arc<MonitorRegistry> {
        &self.monitors
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    // ── Threads ──────────────────────────────────────────────────

    /// Spawn the encode, audio-dispatch and stats threads.
    pub fn start(self: &Arc<Self>) {
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .expect("service already started");
        let mut handles = self.handles.lock().unwrap();
        handles.push(self.spawn_encode_thread(events));
        handles.push(self.spawn_audio_thread());
        handles.push(self.spawn_stats_thread());
    }

    /// Cooperative shutdown: flag, wake the blocked loops, join.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.slot.wake();
        self.audio_queue.close();
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
        self.capture.shutdown();
        self.runtime
            .block_on(self.transport.force_disconnect("shutdown"));
        info!("shutdown complete");
    }

    fn spawn_encode_thread(self: &Arc<Self>, events: Receiver<ServiceEvent>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        std::thread::Builder::new()
            .name("encode".into())
            .spawn(move || service.encode_loop(events))
            .expect("spawn encode thread")
    }

    fn encode_loop(&self, events: Receiver<ServiceEvent>) {
        let mut was_streaming = false;
        while self.running.load(Ordering::Acquire) {
            // Deferred callback work happens here, never on the
            // capture or transport threads.
            while let Ok(event) = events.try_recv() {
                match event {
                    ServiceEvent::Resolution(width, height, fps) => {
                        self.rebuild_encoder(width, height, fps);
                    }
                    ServiceEvent::Authenticated => {
                        self.injector.wiggle_center();
                        if let Some(payload) = self.clipboard.current_payload() {
                            self.runtime
                                .block_on(self.transport.send_clipboard(&payload));
                        }
                    }
                }
            }

            let ready = self.transport.is_connected()
                && self.transport.is_authenticated()
                && self.transport.is_fps_received();
            if !ready {
                was_streaming = false;
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }

            let Some(frame) = self.slot.pop(SLOT_POP_TIMEOUT) else {
                continue;
            };

            if !was_streaming {
                info!(
                    "client authenticated and streaming at {} fps",
                    self.transport.current_fps()
                );
                if let Some(encoder) = self.encoder.lock().unwrap().as_mut() {
                    encoder.flush();
                }
                was_streaming = true;
            }

            // Never touch a texture the GPU is still copying into.
            if frame.fence > 0
                && !self.capture.is_ready(frame.fence)
                && !self.capture.wait_ready(frame.fence, FENCE_WAIT_TIMEOUT)
            {
                warn!("gpu fence wait timeout, skipping frame");
                self.slot.mark_released(frame.pool_index);
                continue;
            }

            let encoded = {
                let mut encoder = self.encoder.lock().unwrap();
                encoder.as_mut().and_then(|enc| {
                    enc.encode(&frame.texture, frame.ts, self.transport.take_needs_key())
                })
            };
            self.slot.mark_released(frame.pool_index);

            if let Some(encoded) = encoded {
                self.runtime.block_on(self.transport.send_frame(&encoded));
            }
        }
    }

    /// Swap the encoder for a new mode. Runs on the encode thread, so
    /// no encode call is in flight while the slot is empty.
    fn rebuild_encoder(&self, width: u32, height: u32, fps: u32) {
        let config = EncoderConfig::new(width, height, fps);
        let mut guard = self.encoder.lock().unwrap();
        *guard = None; // discard before constructing the replacement
        match (*self.encoder_factory)(&config) {
            Ok(backend) => {
                *guard = Some(Av1Encoder::new(backend, config));
                self.transport.request_key();
                info!("encoder: {width}x{height} @ {fps} fps");
            }
            Err(e) => error!("encoder rebuild failed: {e}"),
        }
    }

    fn spawn_audio_thread(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        std::thread::Builder::new()
            .name("audio-dispatch".into())
            .spawn(move || {
                while service.running.load(Ordering::Acquire) {
                    if !service.transport.is_connected()
                        || !service.transport.is_authenticated()
                        || !service.transport.is_fps_received()
                    {
                        std::thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                    if let Some(packet) = service.audio_queue.pop(AUDIO_POP_TIMEOUT) {
                        service
                            .runtime
                            .block_on(service.transport.send_audio(&packet));
                    }
                }
            })
            .expect("spawn audio thread")
    }

    fn spawn_stats_thread(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        std::thread::Builder::new()
            .name("stats".into())
            .spawn(move || {
                let mut throughput = Throughput::new();
                let mut average = FpsAverage::default();
                while service.running.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_secs(1));
                    if !service.running.load(Ordering::Acquire) {
                        break;
                    }

                    let transport = service.transport.take_stats();
                    throughput.record(transport.sent_bytes);
                    let (encoded, failed) = {
                        let mut encoder = service.encoder.lock().unwrap();
                        encoder
                            .as_mut()
                            .map(|e| (e.take_encoded(), e.take_failed()))
                            .unwrap_or((0, 0))
                    };
                    average.push(encoded);

                    let sample = StatusSample {
                        connected: service.transport.is_connected(),
                        authenticated: service.transport.is_authenticated(),
                        fps_received: service.transport.is_fps_received(),
                        target_fps: service.capture.current_fps(),
                        encoded_frames: encoded,
                        encode_failed: failed,
                        slot_dropped: service.slot.take_dropped(),
                        tex_conflicts: service.capture.take_tex_conflicts(),
                        transport,
                        input: service.injector.take_stats(),
                        avg_fps: average.average(),
                        mbps: throughput.megabits_per_second(),
                    };
                    println!("{}", format_status_line(&sample));

                    // Liveness fires even when no frames are flowing.
                    service
                        .runtime
                        .block_on(service.transport.check_liveness());
                }
            })
            .expect("spawn stats thread")
    }
}
