//! Vantage host binary.
//!
//! Wires the streaming pipeline to the HTTP signaling surface and the
//! platform glue: input injection on Windows, optional FFmpeg AV1
//! encoding (`--features ffmpeg`) and cpal loopback audio
//! (`--features audio-cpal`). Without a platform capture backend the
//! host streams the built-in synthetic source, which keeps the whole
//! path exercisable end to end.

mod http;
mod setup;

#[cfg(feature = "audio-cpal")]
mod cpal_audio;
#[cfg(feature = "ffmpeg")]
mod ffmpeg_enc;
#[cfg(windows)]
mod win_input;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::FmtSubscriber;

use vantage_core::capture::synthetic::{spawn_surface_pump, SyntheticBackend, SyntheticTexture};
use vantage_core::encoder::passthrough::PassthroughBackend;
use vantage_core::{
    ClipboardSync, EncoderFactory, InputBackend, InputInjector, MemoryClipboard, MonitorBounds,
    MonitorInfo, MonitorRegistry, NullInputBackend, StreamService, TransportConfig, TurnConfig,
};

#[cfg(feature = "ffmpeg")]
type HostEncoder = ffmpeg_enc::FfmpegEncoder<SyntheticTexture>;
#[cfg(not(feature = "ffmpeg"))]
type HostEncoder = PassthroughBackend<SyntheticTexture>;

type HostService = StreamService<SyntheticBackend, HostEncoder>;

#[derive(Debug, Parser)]
#[command(name = "vantage-host", about = "One-to-one remote desktop host")]
struct Cli {
    /// HTTP signaling port (loopback + LAN).
    #[arg(long, default_value_t = 6060)]
    port: u16,

    /// Return the answer as soon as host candidates exist instead of
    /// waiting for full ICE gathering.
    #[arg(long)]
    lan: bool,

    /// Directory holding auth.json, turn_config.json and the client
    /// assets.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
}

fn encoder_factory() -> EncoderFactory<HostEncoder> {
    #[cfg(feature = "ffmpeg")]
    let factory: EncoderFactory<HostEncoder> =
        Arc::new(|config| ffmpeg_enc::FfmpegEncoder::open(config));
    #[cfg(not(feature = "ffmpeg"))]
    let factory: EncoderFactory<HostEncoder> =
        Arc::new(|config| Ok(PassthroughBackend::new(config)));
    factory
}

fn input_backend() -> Box<dyn InputBackend> {
    #[cfg(windows)]
    let backend: Box<dyn InputBackend> = Box::new(win_input::WinInputBackend::new());
    #[cfg(not(windows))]
    let backend: Box<dyn InputBackend> = Box::new(NullInputBackend);
    backend
}

/// Monitor enumeration is platform glue; the built-in list mirrors
/// the synthetic capture source.
fn default_monitors() -> Vec<MonitorInfo> {
    vec![MonitorInfo {
        index: 0,
        x: 0,
        y: 0,
        width: 1920,
        height: 1080,
        refresh_hz: 60,
        primary: true,
        name: "VANTAGE-1".into(),
    }]
}

fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let cli = Cli::parse();
    println!();
    println!("=== Vantage Remote Desktop Host ===");
    println!();

    let auth = setup::load_or_prompt(&cli.data_dir.join("auth.json"))?;
    let turn = TurnConfig::load(&cli.data_dir.join("turn_config.json"))
        .context("reading turn_config.json")?;
    if turn.is_some() {
        info!("TURN configuration loaded");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building runtime")?;

    let monitors = Arc::new(MonitorRegistry::new(default_monitors()));
    let injector = Arc::new(InputInjector::new(input_backend()));
    injector.enable();
    let clipboard = Arc::new(ClipboardSync::new(Box::<MemoryClipboard>::default()));

    let service: Arc<HostService> = StreamService::new(
        SyntheticBackend::new(),
        encoder_factory(),
        Arc::clone(&monitors),
        Arc::clone(&injector),
        clipboard,
        TransportConfig {
            lan_optimized: cli.lan,
            ..Default::default()
        },
        runtime.handle().clone(),
    )
    .map_err(|e| anyhow::anyhow!("pipeline setup failed: {e}"))?;
    service.transport().set_credentials(&auth.username, &auth.pin);

    if let Some(primary) = monitors.get(0) {
        injector.set_monitor_bounds(MonitorBounds {
            x: primary.x,
            y: primary.y,
            width: primary.width as i32,
            height: primary.height as i32,
        });
    }

    service.start();
    let pump = spawn_surface_pump(Arc::clone(service.capture()), service.running_flag());

    #[cfg(feature = "audio-cpal")]
    let _audio = match cpal_audio::CpalSource::start_default(Arc::clone(service.audio_queue())) {
        Ok(source) => Some(source),
        Err(e) => {
            warn!("audio unavailable: {e}");
            None
        }
    };
    #[cfg(not(feature = "audio-cpal"))]
    warn!("audio capture disabled (build with --features audio-cpal)");

    let state = Arc::new(http::HttpState {
        transport: Arc::clone(service.transport()),
        turn,
        asset_dir: cli.data_dir.clone(),
    });
    let app = http::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));

    println!("Server: http://localhost:{}", cli.port);
    info!(
        "display: {}Hz - waiting for client...",
        service.capture().host_fps()
    );

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .context("http server")
    })?;

    service.stop();
    let _ = pump.join();
    Ok(())
}
