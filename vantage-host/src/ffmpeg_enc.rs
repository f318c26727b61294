//! AV1 encoding via libavcodec.
//!
//! Backends are tried in order of preference — NVENC, QuickSync, AMF,
//! then the SVT and libaom software encoders — and the first that
//! opens wins. All share the low-latency profile: CBR-ish 20 Mbps
//! (peak 40), two-second GOP, no B-frames, zero lookahead.

use std::marker::PhantomData;
use std::sync::Once;

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use ffmpeg::{frame, Dictionary, Packet};
use tracing::{info, warn};

use vantage_core::encoder::{EncoderBackend, EncoderConfig};
use vantage_core::error::{Result, VantageError};
use vantage_core::pipeline::TexturePixels;

/// Preference order; hardware first.
const CODEC_PREFERENCE: &[&str] = &[
    "av1_nvenc",
    "av1_qsv",
    "av1_amf",
    "libsvtav1",
    "libaom-av1",
];

static FFMPEG_INIT: Once = Once::new();

pub struct FfmpegEncoder<T> {
    encoder: ffmpeg::encoder::Video,
    scaler: scaling::Context,
    width: u32,
    height: u32,
    _texture: PhantomData<T>,
}

// The scaler holds a raw context pointer; it is only ever used from
// the encode thread.
unsafe impl<T> Send for FfmpegEncoder<T> {}

impl<T: TexturePixels> FfmpegEncoder<T> {
    /// Open the first backend that accepts the configuration.
    pub fn open(config: &EncoderConfig) -> Result<Self> {
        FFMPEG_INIT.call_once(|| {
            let _ = ffmpeg::init();
        });

        for name in CODEC_PREFERENCE {
            let Some(codec) = ffmpeg::encoder::find_by_name(name) else {
                continue;
            };
            match Self::open_codec(codec, name, config) {
                Ok(encoder) => {
                    info!("encoder backend: {name}");
                    let scaler = scaling::Context::get(
                        Pixel::BGRA,
                        config.width,
                        config.height,
                        Pixel::YUV420P,
                        config.width,
                        config.height,
                        scaling::Flags::FAST_BILINEAR,
                    )
                    .map_err(|e| VantageError::Setup(format!("scaler: {e}")))?;
                    return Ok(Self {
                        encoder,
                        scaler,
                        width: config.width,
                        height: config.height,
                        _texture: PhantomData,
                    });
                }
                Err(e) => warn!("{name} unavailable: {e}"),
            }
        }
        Err(VantageError::Setup("no AV1 encoder available".into()))
    }

    fn open_codec(
        codec: ffmpeg::Codec,
        name: &str,
        config: &EncoderConfig,
    ) -> Result<ffmpeg::encoder::Video> {
        let mut ctx = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| VantageError::Setup(format!("encoder context: {e}")))?;

        ctx.set_width(config.width);
        ctx.set_height(config.height);
        ctx.set_format(Pixel::YUV420P);
        ctx.set_time_base((1, config.fps as i32));
        ctx.set_frame_rate(Some((config.fps as i32, 1)));
        ctx.set_bit_rate(config.bitrate as usize);
        ctx.set_max_bit_rate(config.peak_bitrate as usize);
        ctx.set_gop(config.gop());
        ctx.set_max_b_frames(0);

        let software_threads = EncoderConfig::software_threads().to_string();
        let options: Dictionary = match name {
            "av1_nvenc" => vec![
                ("preset", "p1"),
                ("tune", "ull"),
                ("rc", "cbr"),
                ("zerolatency", "1"),
                ("delay", "0"),
                ("lookahead", "0"),
                ("forced-idr", "1"),
                ("threads", "1"),
            ],
            "av1_qsv" => vec![
                ("preset", "veryfast"),
                ("async_depth", "1"),
                ("look_ahead", "0"),
                ("forced_idr", "1"),
                ("low_power", "1"),
                ("threads", "1"),
            ],
            "av1_amf" => vec![
                ("usage", "ultralowlatency"),
                ("quality", "speed"),
                ("rc", "vbr_latency"),
                ("header_insertion_mode", "idr"),
                ("threads", "1"),
            ],
            "libsvtav1" => vec![
                ("preset", "12"),
                ("crf", "28"),
                (
                    "svtav1-params",
                    "tune=0:fast-decode=1:scd=0:lookahead=0:lp=1",
                ),
                ("threads", software_threads.as_str()),
            ],
            _ => vec![
                ("cpu-used", "10"),
                ("usage", "realtime"),
                ("crf", "28"),
                ("lag-in-frames", "0"),
                ("row-mt", "1"),
                ("error-resilient", "1"),
                ("threads", software_threads.as_str()),
            ],
        }
        .into_iter()
        .collect();

        ctx.open_as_with(codec, options)
            .map_err(|e| VantageError::Setup(format!("open {name}: {e}")))
    }
}

impl<T: TexturePixels> EncoderBackend for FfmpegEncoder<T> {
    type Texture = T;

    fn submit(&mut self, texture: &T, pts: i64, force_key: bool) -> Result<()> {
        let (width, height) = texture.dimensions();
        if (width, height) != (self.width, self.height) {
            return Err(VantageError::Encode(format!(
                "texture {width}x{height} does not match encoder {}x{}",
                self.width, self.height
            )));
        }
        let pixels = texture.pixels();

        let mut bgra = frame::Video::new(Pixel::BGRA, width, height);
        let stride = bgra.stride(0);
        let row = width as usize * 4;
        {
            let plane = bgra.data_mut(0);
            for y in 0..height as usize {
                plane[y * stride..y * stride + row]
                    .copy_from_slice(&pixels[y * row..(y + 1) * row]);
            }
        }

        let mut yuv = frame::Video::new(Pixel::YUV420P, width, height);
        self.scaler
            .run(&bgra, &mut yuv)
            .map_err(|e| VantageError::Encode(format!("scale: {e}")))?;
        yuv.set_pts(Some(pts));
        yuv.set_kind(if force_key {
            ffmpeg::picture::Type::I
        } else {
            ffmpeg::picture::Type::None
        });

        self.encoder
            .send_frame(&yuv)
            .map_err(|e| VantageError::Encode(format!("send_frame: {e}")))
    }

    fn drain(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let mut saw_key = false;
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            saw_key |= packet.is_key();
            if let Some(data) = packet.data() {
                out.extend_from_slice(data);
            }
        }
        Ok(saw_key)
    }

    fn reset(&mut self) {
        // Discard whatever the codec is still holding.
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {}
    }
}
