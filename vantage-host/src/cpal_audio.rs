//! Loopback audio capture via cpal.
//!
//! On Windows (WASAPI) the default output device supports loopback
//! input streams, capturing what the system is playing; elsewhere the
//! default input device is used. Captured f32 PCM flows into the
//! [`OpusPipeline`], which frames, resamples and encodes into the
//! service's audio queue.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{info, warn};

use vantage_core::audio::{AudioQueue, AudioSource, OpusPipeline};
use vantage_core::clock::timestamp_us;
use vantage_core::error::{Result, VantageError};

/// Keeps the cpal stream and the Opus pipeline alive for the session.
pub struct CpalSource {
    pipeline: Arc<OpusPipeline>,
    stream: Option<cpal::Stream>,
    sample_rate: u32,
    channels: u16,
}

impl CpalSource {
    /// Open the default loopback-capable device and start capturing
    /// into `queue`.
    pub fn start_default(queue: Arc<AudioQueue>) -> Result<Self> {
        let host = cpal::default_host();
        // Prefer the output side for loopback; fall back to a plain
        // input device.
        let device = host
            .default_output_device()
            .or_else(|| host.default_input_device())
            .ok_or_else(|| VantageError::Setup("no audio device".into()))?;
        let config = device
            .default_output_config()
            .or_else(|_| device.default_input_config())
            .map_err(|e| VantageError::Setup(format!("audio config: {e}")))?;

        let sample_rate = config.sample_rate().0;
        let channels = config.channels().min(2);
        let pipeline = Arc::new(OpusPipeline::new(sample_rate, channels, queue)?);

        let stream_config = cpal::StreamConfig {
            channels: config.channels(),
            sample_rate: config.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let callback_pipeline = Arc::clone(&pipeline);
        let device_channels = config.channels() as usize;
        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if device_channels > 2 {
                        // Downmix anything beyond stereo by taking the
                        // first two channels.
                        let stereo: Vec<f32> = data
                            .chunks(device_channels)
                            .flat_map(|frame| [frame[0], *frame.get(1).unwrap_or(&frame[0])])
                            .collect();
                        callback_pipeline.submit_pcm(&stereo, timestamp_us());
                    } else {
                        callback_pipeline.submit_pcm(data, timestamp_us());
                    }
                },
                |e| warn!("audio stream error: {e}"),
                None,
            )
            .map_err(|e| VantageError::Setup(format!("audio stream: {e}")))?;
        stream
            .play()
            .map_err(|e| VantageError::Setup(format!("audio start: {e}")))?;

        info!("audio started: {sample_rate}Hz, {channels} ch");
        Ok(Self {
            pipeline,
            stream: Some(stream),
            sample_rate,
            channels,
        })
    }

    pub fn pipeline(&self) -> &Arc<OpusPipeline> {
        &self.pipeline
    }
}

impl AudioSource for CpalSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn start(&mut self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| VantageError::Setup(format!("audio start: {e}")))?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the stream stops capture.
        self.stream.take();
    }
}
