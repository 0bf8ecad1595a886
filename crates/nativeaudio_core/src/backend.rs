//! Audio Backends
//!
//! The engine talks to the device layer through `AudioBackend`. Two
//! implementations exist:
//!
//! - `CpalBackend` (see `stream.rs`) for real hardware
//! - `OfflineBackend` where the caller drives the callbacks by hand, used by
//!   tests and the CLI's offline render mode
//!
//! Both follow the same contract: the render/capture closure is only called
//! while the stream is playing, and dropping the returned `StreamHandle`
//! guarantees the closure is never called again.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::StreamConfig;
use crate::error::{EngineError, EngineResult};
use crate::message::Event;

/// Output callback: interleaved device buffer and its channel count
pub type RenderFn = Box<dyn FnMut(&mut [f32], usize) + Send + 'static>;

/// Input callback: interleaved captured samples and their channel count
pub type CaptureFn = Box<dyn FnMut(&[f32], usize) + Send + 'static>;

/// Preferred output parameters reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeParams {
    pub sample_rate: u32,
    pub frames_per_buffer: Option<u32>,
}

/// An open device stream
pub trait StreamHandle {
    fn play(&self) -> EngineResult<()>;

    fn pause(&self) -> EngineResult<()>;

    /// Configuration the stream was actually opened with
    fn config(&self) -> &StreamConfig;
}

/// Device layer used by the engine
pub trait AudioBackend {
    fn name(&self) -> &str;

    /// Host-preferred output rate and buffer size, if known
    fn native_output_params(&self) -> Option<NativeParams>;

    /// Open an output stream in the paused state
    fn open_output(
        &mut self,
        config: &StreamConfig,
        render: RenderFn,
        events: Sender<Event>,
    ) -> EngineResult<Box<dyn StreamHandle>>;

    /// Open an input stream in the paused state
    fn open_input(
        &mut self,
        config: &StreamConfig,
        capture: CaptureFn,
        events: Sender<Event>,
    ) -> EngineResult<Box<dyn StreamHandle>>;
}

struct OfflineSlot<F> {
    callback: F,
    channels: usize,
    playing: bool,
}

#[derive(Default)]
struct OfflineSlots {
    output: Option<OfflineSlot<RenderFn>>,
    input: Option<OfflineSlot<CaptureFn>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Output,
    Input,
}

/// Backend without a device; `OfflineDriver` runs the callbacks
#[derive(Default)]
pub struct OfflineBackend {
    native: Option<NativeParams>,
    slots: Arc<Mutex<OfflineSlots>>,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report these parameters as the host's native ones
    pub fn with_native_params(sample_rate: u32, frames_per_buffer: u32) -> Self {
        Self {
            native: Some(NativeParams {
                sample_rate,
                frames_per_buffer: Some(frames_per_buffer),
            }),
            slots: Arc::default(),
        }
    }

    /// Handle for driving the callbacks, usable from any thread
    pub fn driver(&self) -> OfflineDriver {
        OfflineDriver {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn native_output_params(&self) -> Option<NativeParams> {
        self.native
    }

    fn open_output(
        &mut self,
        config: &StreamConfig,
        render: RenderFn,
        _events: Sender<Event>,
    ) -> EngineResult<Box<dyn StreamHandle>> {
        config.validate().map_err(EngineError::ConfigError)?;
        let mut slots = self.slots.lock();
        if slots.output.is_some() {
            return Err(EngineError::StreamBuildError(
                "offline output already open".to_string(),
            ));
        }
        slots.output = Some(OfflineSlot {
            callback: render,
            channels: config.channels as usize,
            playing: false,
        });
        debug!("Offline output opened: {:?}", config);

        Ok(Box::new(OfflineStream {
            slots: Arc::clone(&self.slots),
            direction: Direction::Output,
            config: config.clone(),
        }))
    }

    fn open_input(
        &mut self,
        config: &StreamConfig,
        capture: CaptureFn,
        _events: Sender<Event>,
    ) -> EngineResult<Box<dyn StreamHandle>> {
        config.validate().map_err(EngineError::ConfigError)?;
        let mut slots = self.slots.lock();
        if slots.input.is_some() {
            return Err(EngineError::StreamBuildError(
                "offline input already open".to_string(),
            ));
        }
        slots.input = Some(OfflineSlot {
            callback: capture,
            channels: config.channels as usize,
            playing: false,
        });
        debug!("Offline input opened: {:?}", config);

        Ok(Box::new(OfflineStream {
            slots: Arc::clone(&self.slots),
            direction: Direction::Input,
            config: config.clone(),
        }))
    }
}

struct OfflineStream {
    slots: Arc<Mutex<OfflineSlots>>,
    direction: Direction,
    config: StreamConfig,
}

impl OfflineStream {
    fn set_playing(&self, playing: bool) {
        let mut slots = self.slots.lock();
        match self.direction {
            Direction::Output => {
                if let Some(slot) = slots.output.as_mut() {
                    slot.playing = playing;
                }
            }
            Direction::Input => {
                if let Some(slot) = slots.input.as_mut() {
                    slot.playing = playing;
                }
            }
        }
    }
}

impl StreamHandle for OfflineStream {
    fn play(&self) -> EngineResult<()> {
        self.set_playing(true);
        Ok(())
    }

    fn pause(&self) -> EngineResult<()> {
        self.set_playing(false);
        Ok(())
    }

    fn config(&self) -> &StreamConfig {
        &self.config
    }
}

impl Drop for OfflineStream {
    fn drop(&mut self) {
        // Waits for a callback in progress on another thread
        let mut slots = self.slots.lock();
        match self.direction {
            Direction::Output => slots.output = None,
            Direction::Input => slots.input = None,
        }
    }
}

/// Drives an `OfflineBackend`'s callbacks
#[derive(Clone)]
pub struct OfflineDriver {
    slots: Arc<Mutex<OfflineSlots>>,
}

impl OfflineDriver {
    /// Channel count of the open output stream
    pub fn output_channels(&self) -> Option<usize> {
        self.slots.lock().output.as_ref().map(|slot| slot.channels)
    }

    pub fn is_output_playing(&self) -> bool {
        self.slots
            .lock()
            .output
            .as_ref()
            .is_some_and(|slot| slot.playing)
    }

    pub fn is_input_playing(&self) -> bool {
        self.slots
            .lock()
            .input
            .as_ref()
            .is_some_and(|slot| slot.playing)
    }

    /// Run one output callback over `buffer`
    ///
    /// Returns false (and leaves silence) when no output is open or it is
    /// paused.
    pub fn render_into(&self, buffer: &mut [f32]) -> bool {
        let mut slots = self.slots.lock();
        match slots.output.as_mut() {
            Some(slot) if slot.playing => {
                (slot.callback)(buffer, slot.channels);
                true
            }
            _ => {
                buffer.fill(0.0);
                false
            }
        }
    }

    /// Run one output callback of `frames` frames
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let channels = self.output_channels().unwrap_or(2);
        let mut buffer = vec![0.0; frames * channels];
        self.render_into(&mut buffer);
        buffer
    }

    /// Feed interleaved samples to the input callback
    pub fn capture(&self, samples: &[f32]) -> bool {
        let mut slots = self.slots.lock();
        match slots.input.as_mut() {
            Some(slot) if slot.playing => {
                (slot.callback)(samples, slot.channels);
                true
            }
            _ => false,
        }
    }
}
