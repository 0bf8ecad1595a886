//! CPAL Audio Backend
//!
//! Builds real device streams for the engine. The render/capture closures
//! always see interleaved f32; integer devices get a saturating conversion
//! through a scratch buffer allocated when the stream is built.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig as CpalStreamConfig};
use crossbeam_channel::Sender;
use tracing::{info, warn};

use nativeaudio_dsp::to_i16;

use crate::backend::{AudioBackend, CaptureFn, NativeParams, RenderFn, StreamHandle};
use crate::config::StreamConfig;
use crate::error::{EngineError, EngineResult};
use crate::message::Event;

/// Largest device buffer the i16 scratch path is prepared for
const MAX_SCRATCH_FRAMES: usize = 16384;

/// Backend for the host's default audio API
pub struct CpalBackend {
    host: cpal::Host,
    output_device: Option<String>,
    input_device: Option<String>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
            output_device: None,
            input_device: None,
        }
    }

    /// Use named devices instead of the host defaults
    pub fn with_devices(output: Option<String>, input: Option<String>) -> Self {
        Self {
            host: cpal::default_host(),
            output_device: output,
            input_device: input,
        }
    }

    fn find_output(&self) -> EngineResult<Device> {
        match &self.output_device {
            Some(name) => self
                .host
                .output_devices()
                .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| EngineError::DeviceNotFound(name.clone())),
            None => self
                .host
                .default_output_device()
                .ok_or(EngineError::NoDevicesFound),
        }
    }

    fn find_input(&self) -> EngineResult<Device> {
        match &self.input_device {
            Some(name) => self
                .host
                .input_devices()
                .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| EngineError::DeviceNotFound(name.clone())),
            None => self
                .host
                .default_input_device()
                .ok_or(EngineError::NoDevicesFound),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        self.host.id().name()
    }

    fn native_output_params(&self) -> Option<NativeParams> {
        let device = self.find_output().ok()?;
        let config = device.default_output_config().ok()?;
        let frames_per_buffer = match config.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max } => {
                // Prefer a small power of two the device accepts
                Some(256u32.clamp(*min, *max))
            }
            cpal::SupportedBufferSize::Unknown => None,
        };
        Some(NativeParams {
            sample_rate: config.sample_rate().0,
            frames_per_buffer,
        })
    }

    fn open_output(
        &mut self,
        config: &StreamConfig,
        render: RenderFn,
        events: Sender<Event>,
    ) -> EngineResult<Box<dyn StreamHandle>> {
        config.validate().map_err(EngineError::ConfigError)?;
        let device = self.find_output()?;
        let supported = device
            .default_output_config()
            .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;
        let format = supported.sample_format();

        // A fixed size outside the device's range would fail to build
        let buffer_size = match supported.buffer_size() {
            cpal::SupportedBufferSize::Range { min, max }
                if (*min..=*max).contains(&config.buffer_size) =>
            {
                cpal::BufferSize::Fixed(config.buffer_size)
            }
            _ => {
                warn!(
                    "Buffer of {} frames not supported by device, using its default",
                    config.buffer_size
                );
                cpal::BufferSize::Default
            }
        };

        let cpal_config = CpalStreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size,
        };
        let stream = build_output(&device, &cpal_config, format, render, events)?;

        info!(
            "Output stream on {}: {}Hz, {} channels, {:?}",
            device.name().unwrap_or_default(),
            config.sample_rate,
            config.channels,
            format
        );

        Ok(Box::new(CpalStream {
            stream,
            config: config.clone(),
        }))
    }

    fn open_input(
        &mut self,
        config: &StreamConfig,
        capture: CaptureFn,
        events: Sender<Event>,
    ) -> EngineResult<Box<dyn StreamHandle>> {
        let device = self.find_input()?;
        let supported = device
            .default_input_config()
            .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;
        let format = supported.sample_format();

        // Capture at the device's own rate; the recorder converts afterwards
        let cpal_config: CpalStreamConfig = supported.into();
        let stream = build_input(&device, &cpal_config, format, capture, events)?;

        let actual = StreamConfig {
            sample_rate: cpal_config.sample_rate.0,
            channels: cpal_config.channels,
            buffer_size: config.buffer_size,
        };
        info!(
            "Input stream on {}: {}Hz, {} channels, {:?}",
            device.name().unwrap_or_default(),
            actual.sample_rate,
            actual.channels,
            format
        );

        Ok(Box::new(CpalStream {
            stream,
            config: actual,
        }))
    }
}

struct CpalStream {
    stream: Stream,
    config: StreamConfig,
}

impl StreamHandle for CpalStream {
    fn play(&self) -> EngineResult<()> {
        self.stream
            .play()
            .map_err(|e| EngineError::StreamPlayError(e.to_string()))
    }

    fn pause(&self) -> EngineResult<()> {
        self.stream
            .pause()
            .map_err(|e| EngineError::StreamPlayError(e.to_string()))
    }

    fn config(&self) -> &StreamConfig {
        &self.config
    }
}

fn build_output(
    device: &Device,
    config: &CpalStreamConfig,
    format: SampleFormat,
    mut render: RenderFn,
    events: Sender<Event>,
) -> EngineResult<Stream> {
    let channels = config.channels as usize;
    let err_sender = events;
    let on_error = move |err: cpal::StreamError| {
        let _ = err_sender.try_send(Event::error(err));
    };

    let stream = match format {
        SampleFormat::I16 => {
            let mut scratch = vec![0.0f32; MAX_SCRATCH_FRAMES * channels];
            device.build_output_stream(
                config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    // Real-time audio callback - NO allocations allowed here
                    if data.len() > scratch.len() {
                        data.fill(0);
                        return;
                    }
                    let buffer = &mut scratch[..data.len()];
                    render(buffer, channels);
                    for (out, sample) in data.iter_mut().zip(buffer.iter()) {
                        *out = to_i16(*sample);
                    }
                },
                on_error,
                None,
            )
        }
        _ => device.build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| render(data, channels),
            on_error,
            None,
        ),
    }
    .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}

fn build_input(
    device: &Device,
    config: &CpalStreamConfig,
    format: SampleFormat,
    mut capture: CaptureFn,
    events: Sender<Event>,
) -> EngineResult<Stream> {
    let channels = config.channels as usize;
    let err_sender = events;
    let on_error = move |err: cpal::StreamError| {
        let _ = err_sender.try_send(Event::error(err));
    };

    let stream = match format {
        SampleFormat::I16 => {
            let mut scratch = vec![0.0f32; MAX_SCRATCH_FRAMES * channels];
            device.build_input_stream(
                config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let n = data.len().min(scratch.len());
                    for (out, sample) in scratch[..n].iter_mut().zip(data.iter()) {
                        *out = *sample as f32 / 32768.0;
                    }
                    capture(&scratch[..n], channels);
                },
                on_error,
                None,
            )
        }
        _ => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| capture(data, channels),
            on_error,
            None,
        ),
    }
    .map_err(|e| EngineError::StreamBuildError(e.to_string()))?;

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hardware-dependent tests
    #[test]
    #[ignore = "requires audio hardware"]
    fn test_native_params() {
        let backend = CpalBackend::new();
        if let Some(params) = backend.native_output_params() {
            assert!(params.sample_rate >= 8000);
        }
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_output() {
        let mut backend = CpalBackend::new();
        let (sender, _receiver) = crossbeam_channel::unbounded();
        let result = backend.open_output(
            &StreamConfig::default(),
            Box::new(|data, _| data.fill(0.0)),
            sender,
        );
        // May fail if no audio hardware, which is fine for CI
        if let Ok(stream) = result {
            assert_eq!(stream.config().sample_rate, 48000);
            assert!(stream.play().is_ok());
        }
    }

    #[test]
    fn test_missing_named_device() {
        let backend = CpalBackend::with_devices(Some("no such device".to_string()), None);
        assert!(backend.find_output().is_err());
    }
}
