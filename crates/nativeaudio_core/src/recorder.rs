//! Recorder
//!
//! Captures a mono recording of at most `RecorderConfig::max_seconds`.
//!
//! ```text
//! input callback --(mono, rtrb)--> writer thread --> Recording slot
//!                                                \-> WAV file (optional)
//! ```
//!
//! The input callback only downmixes and pushes; a full ring drops samples
//! and reports `RecordingOverrun`. The writer thread stops capture at the
//! length limit (or on `stop()`), converts to the storage rate and
//! publishes the result as the latest recording.
//!
//! Only the writer thread turns capture on, after throwing away whatever a
//! previous capture left in the ring, so `capturing` implies `active`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use directories::ProjectDirs;
use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, warn};

use nativeaudio_dsp::{resample_interleaved, to_i16};

use crate::backend::{AudioBackend, StreamHandle};
use crate::config::{RecorderConfig, StreamConfig};
use crate::error::{EngineError, EngineResult};
use crate::message::Event;

/// How often the writer drains the capture ring
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// A finished recording at the storage rate
#[derive(Debug, Clone)]
pub struct Recording {
    pub samples: Arc<[f32]>,
    pub sample_rate: u32,
    pub path: Option<PathBuf>,
}

impl Recording {
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Flags shared with the input callback
#[derive(Debug, Default)]
struct CaptureState {
    capturing: AtomicBool,
    overrun_reported: AtomicBool,
    dropped: AtomicU64,
}

enum WriterCommand {
    /// Begin capturing; the writer answers once capture is live
    Start(Sender<()>),
    Stop,
    Shutdown,
}

pub struct Recorder {
    stream: Option<Box<dyn StreamHandle>>,
    control: Sender<WriterCommand>,
    writer: Option<JoinHandle<()>>,
    state: Arc<CaptureState>,
    busy: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Recording>>>,
    device_rate: u32,
}

impl Recorder {
    /// Open the input stream and spawn the writer thread
    pub fn create(
        backend: &mut dyn AudioBackend,
        config: &RecorderConfig,
        input: &StreamConfig,
        events: Sender<Event>,
    ) -> EngineResult<Self> {
        let state = Arc::new(CaptureState::default());
        let busy = Arc::new(AtomicBool::new(false));
        let latest = Arc::new(Mutex::new(None));

        // About one second of headroom at the requested rate
        let (producer, consumer) = RingBuffer::<f32>::new(input.sample_rate.max(8000) as usize);
        let capture = capture_callback(producer, Arc::clone(&state), events.clone());
        let stream = backend.open_input(input, capture, events.clone())?;
        let device_rate = stream.config().sample_rate;
        stream.play()?;

        let (control, commands) = crossbeam_channel::unbounded();
        let mut job = WriterJob {
            commands,
            consumer,
            state: Arc::clone(&state),
            busy: Arc::clone(&busy),
            latest: Arc::clone(&latest),
            events,
            config: config.clone(),
            device_rate,
            max_frames: (device_rate as f32 * config.max_seconds) as usize,
            buffer: Vec::new(),
            active: false,
        };
        let writer = thread::Builder::new()
            .name("nativeaudio-recorder".to_string())
            .spawn(move || job.run())?;

        info!(
            "Recorder created: device {}Hz, storing {}Hz, max {}s",
            device_rate, config.sample_rate, config.max_seconds
        );

        Ok(Self {
            stream: Some(stream),
            control,
            writer: Some(writer),
            state,
            busy,
            latest,
            device_rate,
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Begin a new recording, replacing nothing until it finishes
    pub fn start(&self) -> EngineResult<()> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::RecorderBusy);
        }

        let (ack, started) = crossbeam_channel::bounded(1);
        let live = self.control.send(WriterCommand::Start(ack)).is_ok() && started.recv().is_ok();
        if !live {
            self.busy.store(false, Ordering::Release);
            return Err(EngineError::ChannelSendError);
        }
        Ok(())
    }

    /// Finish the current recording early
    pub fn stop(&self) -> EngineResult<()> {
        self.control
            .send(WriterCommand::Stop)
            .map_err(|_| EngineError::ChannelSendError)
    }

    /// True from `start()` until the recording is stored
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn latest(&self) -> Option<Recording> {
        self.latest.lock().clone()
    }

    /// Samples dropped because the writer fell behind
    pub fn dropped_samples(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }

    /// Close the input stream, then stop the writer
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.state.capturing.store(false, Ordering::Release);
        // Dropping the stream guarantees the callback is not running
        self.stream.take();
        let _ = self.control.send(WriterCommand::Shutdown);
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                error!("Recorder writer thread panicked");
            }
            debug!("Recorder shut down");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn capture_callback(
    mut producer: Producer<f32>,
    state: Arc<CaptureState>,
    events: Sender<Event>,
) -> crate::backend::CaptureFn {
    Box::new(move |data: &[f32], channels: usize| {
        // Real-time: no allocation, no locks
        if !state.capturing.load(Ordering::Acquire) {
            return;
        }
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let n = frames.min(producer.slots());

        if let Ok(chunk) = producer.write_chunk_uninit(n) {
            let scale = 1.0 / channels as f32;
            chunk.fill_from_iter(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        if n < frames {
            state
                .dropped
                .fetch_add((frames - n) as u64, Ordering::Relaxed);
            if !state.overrun_reported.swap(true, Ordering::Relaxed) {
                let _ = events.try_send(Event::RecordingOverrun);
            }
        }
    })
}

struct WriterJob {
    commands: Receiver<WriterCommand>,
    consumer: Consumer<f32>,
    state: Arc<CaptureState>,
    busy: Arc<AtomicBool>,
    latest: Arc<Mutex<Option<Recording>>>,
    events: Sender<Event>,
    config: RecorderConfig,
    device_rate: u32,
    /// Recording length limit at the device rate
    max_frames: usize,
    buffer: Vec<f32>,
    active: bool,
}

impl WriterJob {
    fn run(&mut self) {
        loop {
            match self.commands.recv_timeout(DRAIN_INTERVAL) {
                Ok(WriterCommand::Start(ack)) => {
                    self.discard();
                    self.buffer.clear();
                    self.buffer.reserve(self.max_frames);
                    self.active = true;
                    self.state.overrun_reported.store(false, Ordering::Relaxed);
                    self.state.capturing.store(true, Ordering::Release);
                    let _ = ack.send(());
                    let _ = self.events.try_send(Event::RecordingStarted);
                    debug!("Recording started");
                }
                Ok(WriterCommand::Stop) => {
                    if self.active {
                        self.finish();
                    }
                }
                Ok(WriterCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }

            if self.active {
                self.drain();
                if self.buffer.len() >= self.max_frames {
                    self.finish();
                }
            } else {
                // Leftovers from a callback that raced the end of capture
                self.discard();
            }
        }

        self.state.capturing.store(false, Ordering::Release);
        self.busy.store(false, Ordering::Release);
    }

    fn drain(&mut self) {
        let wanted = self.max_frames.saturating_sub(self.buffer.len());
        let n = self.consumer.slots().min(wanted);
        if let Ok(chunk) = self.consumer.read_chunk(n) {
            let (first, second) = chunk.as_slices();
            self.buffer.extend_from_slice(first);
            self.buffer.extend_from_slice(second);
            chunk.commit_all();
        }
    }

    fn discard(&mut self) {
        let n = self.consumer.slots();
        if n > 0 {
            if let Ok(chunk) = self.consumer.read_chunk(n) {
                chunk.commit_all();
            }
        }
    }

    fn finish(&mut self) {
        self.state.capturing.store(false, Ordering::Release);
        self.drain();
        self.active = false;

        match self.store() {
            Ok(recording) => {
                info!(
                    "Recording finished: {} frames at {}Hz",
                    recording.frames(),
                    recording.sample_rate
                );
                let _ = self.events.try_send(Event::RecordingFinished {
                    frames: recording.frames(),
                    sample_rate: recording.sample_rate,
                    path: recording.path.as_ref().map(|p| p.display().to_string()),
                });
                *self.latest.lock() = Some(recording);
            }
            Err(e) => {
                error!("Failed to store recording: {}", e);
                let _ = self.events.try_send(Event::error(&e));
            }
        }

        self.buffer.clear();
        self.busy.store(false, Ordering::Release);
    }

    fn store(&self) -> EngineResult<Recording> {
        let samples = resample_interleaved(
            &self.buffer,
            1,
            self.device_rate,
            self.config.sample_rate,
        )?;

        let path = if self.config.save_wav {
            match recordings_dir(&self.config) {
                Some(dir) => {
                    let path = dir.join(Local::now().format("recording_%Y%m%d_%H%M%S.wav").to_string());
                    write_wav(&path, &samples, self.config.sample_rate)?;
                    Some(path)
                }
                None => {
                    warn!("No directory for recordings, WAV not written");
                    None
                }
            }
        } else {
            None
        };

        Ok(Recording {
            samples: samples.into(),
            sample_rate: self.config.sample_rate,
            path,
        })
    }
}

fn recordings_dir(config: &RecorderConfig) -> Option<PathBuf> {
    config.output_dir.clone().or_else(|| {
        ProjectDirs::from("com", "nativeaudio", "nativeaudio")
            .map(|dirs| dirs.data_dir().join("recordings"))
    })
}

/// Write mono 16-bit PCM
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in samples {
        writer.write_sample(to_i16(*sample))?;
    }
    writer.finalize()?;
    debug!("Wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}
