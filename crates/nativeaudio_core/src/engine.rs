//! Audio Engine - Main Entry Point
//!
//! The AudioEngine owns the device streams, the players and the recorder,
//! and is the only way the front end touches any of them.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized --create--> Created --create_buffer_queue_player--> Running
//!                                                                  |    ^
//!                                                            pause |    | resume
//!                                                                  v    |
//!                                                                  Paused
//! (any state) --shutdown / drop--> Destroyed
//! ```
//!
//! # Threads
//!
//! ```text
//! control thread (this struct)
//!   |-- rtrb Command queue ----------> output callback (OutputRenderer)
//!   |<- rtrb Retired queue ----------- output callback
//!   |<- crossbeam Event channel ------ output callback, decode workers, recorder
//!   |-- SourceControls / SharedState atomics (scalar parameters)
//! ```
//!
//! Teardown: request stop, wait for the callback to acknowledge, drop the
//! output stream, stop the recorder, join the decode workers, then free
//! whatever the callback retired.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::{debug, error, info, warn};

use nativeaudio_dsp::{EffectHandle, EffectStage};

use crate::assets::AssetStore;
use crate::backend::{AudioBackend, StreamHandle};
use crate::clips::{Clip, ClipLibrary};
use crate::config::{EngineConfig, StreamConfig};
use crate::decode::{decode_to_rate, resolve_uri, AudioDecoder, DecodeWorker};
use crate::error::{EngineError, EngineResult};
use crate::message::{Command, Event, Retired};
use crate::mixer::Mixer;
use crate::recorder::{Recorder, Recording};
use crate::render::{OutputRenderer, RendererChannels, SharedState};
use crate::source::{Source, SourceHandle, SourceId, StreamStatus};

/// Poll interval while waiting for the callback to acknowledge a stop
const STOP_POLL: Duration = Duration::from_millis(1);

/// Smallest renderer capacity, in frames
const MIN_RENDER_FRAMES: usize = 2048;

/// Id of the buffer-queue player; players get ids above it
const CLIP_SOURCE_ID: SourceId = SourceId(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Created,
    Running,
    Paused,
    Destroyed,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Created => "created",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::Destroyed => "destroyed",
        }
    }
}

/// The operations a front end drives the engine with
///
/// Boolean results follow the player API: `false` means "not done", and the
/// reason is logged.
pub trait AudioControl {
    fn create_buffer_queue_player(&mut self, sample_rate: i32, buffer_frames: i32)
        -> EngineResult<()>;

    fn create_asset_player(&mut self, store: &AssetStore, name: &str) -> bool;

    fn create_uri_player(&mut self, uri: &str) -> bool;

    fn set_playing_asset_player(&mut self, playing: bool);

    fn set_playing_uri_player(&mut self, playing: bool);

    fn set_looping_uri_player(&mut self, looping: bool);

    fn set_channel_mute_uri_player(&mut self, channel: u32, mute: bool);

    fn set_channel_solo_uri_player(&mut self, channel: u32, solo: bool);

    fn num_channels_uri_player(&self) -> i32;

    fn set_volume_uri_player(&mut self, millibel: i32);

    fn set_mute_uri_player(&mut self, mute: bool);

    fn enable_stereo_position_uri_player(&mut self, enable: bool);

    fn set_stereo_position_uri_player(&mut self, permille: i32);

    fn select_clip(&mut self, clip: Clip, count: u32) -> bool;

    fn enable_reverb(&mut self, enabled: bool) -> bool;

    fn create_audio_recorder(&mut self) -> bool;

    fn start_recording(&mut self) -> bool;

    fn stop_recording(&mut self) -> bool;

    fn pause(&mut self) -> EngineResult<()>;

    fn resume(&mut self) -> EngineResult<()>;
}

/// The open output stream and the control-side ends of its queues
struct OutputSink {
    stream: Box<dyn StreamHandle>,
    commands: Producer<Command>,
    retired: Consumer<Retired>,
    shared: Arc<SharedState>,
    effect: EffectHandle,
    clip: SourceHandle,
    clips: ClipLibrary,
    /// Latest recording and its copy at the output rate
    playback: Option<(Arc<[f32]>, Arc<[f32]>)>,
    sample_rate: u32,
    buffer_frames: u32,
    next_generation: u64,
}

/// An asset or URI player created by the front end
struct PlayerSlot {
    /// Asset name or URI it was created from
    key: String,
    handle: SourceHandle,
    worker: Option<DecodeWorker>,
}

/// The main audio engine controller
///
/// Lives on the control thread. Dropping it performs the same teardown as
/// `shutdown`.
pub struct AudioEngine {
    config: EngineConfig,
    backend: Box<dyn AudioBackend>,
    state: EngineState,
    event_sender: Sender<Event>,
    event_receiver: Receiver<Event>,
    output: Option<OutputSink>,
    asset_player: Option<PlayerSlot>,
    uri_player: Option<PlayerSlot>,
    recorder: Option<Recorder>,
    next_source_id: u64,
}

impl AudioEngine {
    /// Create the engine context. No device is opened yet.
    pub fn create(config: EngineConfig, backend: Box<dyn AudioBackend>) -> EngineResult<Self> {
        config.validate()?;
        let (event_sender, event_receiver) = bounded(config.event_queue_capacity);

        let mut engine = Self {
            config,
            backend,
            state: EngineState::Uninitialized,
            event_sender,
            event_receiver,
            output: None,
            asset_player: None,
            uri_player: None,
            recorder: None,
            next_source_id: CLIP_SOURCE_ID.0 + 1,
        };
        engine.state = EngineState::Created;
        engine.emit(Event::Created);
        info!("Audio engine created (backend: {})", engine.backend.name());
        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Output rate, once the output sink exists
    pub fn sample_rate(&self) -> Option<u32> {
        self.output.as_ref().map(|sink| sink.sample_rate)
    }

    /// Output buffer size in frames, once the output sink exists
    pub fn buffer_frames(&self) -> Option<u32> {
        self.output.as_ref().map(|sink| sink.buffer_frames)
    }

    /// Peak levels of the last rendered buffer
    pub fn peaks(&self) -> (f32, f32) {
        self.output
            .as_ref()
            .map(|sink| sink.shared.peaks())
            .unwrap_or((0.0, 0.0))
    }

    pub fn underruns(&self) -> u64 {
        self.output
            .as_ref()
            .map(|sink| sink.shared.underruns())
            .unwrap_or(0)
    }

    pub fn is_clip_in_flight(&self) -> bool {
        self.output
            .as_ref()
            .is_some_and(|sink| sink.shared.is_clip_in_flight())
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.as_ref().is_some_and(|r| r.is_busy())
    }

    pub fn is_reverb_enabled(&self) -> bool {
        self.output.as_ref().is_some_and(|sink| sink.effect.is_enabled())
    }

    pub fn latest_recording(&self) -> Option<Recording> {
        self.recorder.as_ref().and_then(|r| r.latest())
    }

    pub fn clip_player(&self) -> Option<&SourceHandle> {
        self.output.as_ref().map(|sink| &sink.clip)
    }

    pub fn asset_player(&self) -> Option<&SourceHandle> {
        self.asset_player.as_ref().map(|p| &p.handle)
    }

    pub fn uri_player(&self) -> Option<&SourceHandle> {
        self.uri_player.as_ref().map(|p| &p.handle)
    }

    /// URI the URI player was created from
    pub fn uri_player_uri(&self) -> Option<&str> {
        self.uri_player.as_ref().map(|p| p.key.as_str())
    }

    /// Additional receiver for engine events
    pub fn event_receiver(&self) -> Receiver<Event> {
        self.event_receiver.clone()
    }

    /// Next pending event, without blocking
    pub fn poll_event(&mut self) -> Option<Event> {
        self.collect_retired();
        self.event_receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn wait_event(&mut self, timeout: Duration) -> Option<Event> {
        self.collect_retired();
        self.event_receiver.recv_timeout(timeout).ok()
    }

    /// Tear everything down. Terminal.
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn emit(&self, event: Event) {
        if self.event_sender.try_send(event).is_err() {
            debug!("Event queue full, event dropped");
        }
    }

    fn require(&self, operation: &'static str, allowed: &[EngineState]) -> EngineResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EngineError::InvalidState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn allocate_source_id(&mut self) -> SourceId {
        let id = SourceId(self.next_source_id);
        self.next_source_id += 1;
        id
    }

    fn send(&mut self, command: Command) -> EngineResult<()> {
        let sink = self.output.as_mut().ok_or(EngineError::NoOutput)?;
        sink.commands
            .push(command)
            .map_err(|_| EngineError::CommandQueueFull)
    }

    /// Free what the callback handed back
    fn collect_retired(&mut self) {
        if let Some(sink) = self.output.as_mut() {
            let mut count = 0;
            while let Ok(item) = sink.retired.pop() {
                drop(item);
                count += 1;
            }
            if count > 0 {
                debug!("Freed {} retired objects", count);
            }
        }
    }

    /// Resolve 0/negative requests to the host's preference, then config
    fn output_stream_config(&self, sample_rate: i32, buffer_frames: i32) -> StreamConfig {
        let native = self.backend.native_output_params();
        let fallback = &self.config.stream;

        let sample_rate = if sample_rate > 0 {
            sample_rate as u32
        } else {
            native.map(|n| n.sample_rate).unwrap_or(fallback.sample_rate)
        };
        let buffer_size = if buffer_frames > 0 {
            buffer_frames as u32
        } else {
            native
                .and_then(|n| n.frames_per_buffer)
                .unwrap_or(fallback.buffer_size)
        };

        StreamConfig {
            sample_rate,
            channels: fallback.channels,
            buffer_size,
        }
    }

    fn open_output(&mut self, sample_rate: i32, buffer_frames: i32) -> EngineResult<()> {
        if self.output.is_some() {
            return Err(EngineError::OutputExists);
        }
        self.require("create_buffer_queue_player", &[EngineState::Created])?;

        let stream_config = self.output_stream_config(sample_rate, buffer_frames);
        stream_config.validate().map_err(EngineError::ConfigError)?;
        let rate = stream_config.sample_rate;

        // Headroom for hosts that hand out larger buffers than requested
        let max_frames = (stream_config.buffer_size as usize * 4).max(MIN_RENDER_FRAMES);

        let clips = ClipLibrary::prepare(rate)?;
        let effect = EffectStage::new(
            rate as f32,
            self.config.effect.reverb_settings()?,
            self.config.effect.crossfade_ms,
        )?;
        let effect_handle = effect.handle();

        let mut mixer = Mixer::new(
            self.config.mixer.max_sources,
            max_frames,
            self.config.mixer.clip_policy.into(),
        );
        let (clip_source, clip) = Source::clip(CLIP_SOURCE_ID);
        if mixer.insert(Box::new(clip_source)).is_err() {
            return Err(EngineError::MixerFull(mixer.capacity()));
        }

        let (commands, command_consumer) = RingBuffer::new(self.config.command_queue_capacity);
        let (retired_producer, retired) = RingBuffer::new(
            self.config.command_queue_capacity * 2 + self.config.mixer.max_sources,
        );
        let shared = Arc::new(SharedState::new());

        let mut renderer = OutputRenderer::new(
            mixer,
            effect,
            RendererChannels {
                commands: command_consumer,
                retired: retired_producer,
                events: self.event_sender.clone(),
                shared: Arc::clone(&shared),
            },
            CLIP_SOURCE_ID,
            rate,
            max_frames,
        );

        let stream = self.backend.open_output(
            &stream_config,
            Box::new(move |data: &mut [f32], channels: usize| renderer.render(data, channels)),
            self.event_sender.clone(),
        )?;
        stream.play()?;

        let actual = stream.config().clone();
        self.output = Some(OutputSink {
            stream,
            commands,
            retired,
            shared,
            effect: effect_handle,
            clip,
            clips,
            playback: None,
            sample_rate: actual.sample_rate,
            buffer_frames: actual.buffer_size,
            next_generation: 1,
        });
        self.state = EngineState::Running;
        self.emit(Event::OutputStarted {
            sample_rate: actual.sample_rate,
            buffer_frames: actual.buffer_size,
            channels: actual.channels,
        });
        info!(
            "Output sink running: {}Hz, {} frames, {} channels ({:.1}ms)",
            actual.sample_rate,
            actual.buffer_size,
            actual.channels,
            actual.latency_ms()
        );
        Ok(())
    }

    /// Take a player out of the mixer and stop its decoder
    ///
    /// The slot is handed back untouched when the command queue is full.
    fn remove_player(&mut self, slot: PlayerSlot) -> Result<(), PlayerSlot> {
        if self.send(Command::RemoveSource(slot.handle.id())).is_err() {
            return Err(slot);
        }
        slot.handle.set_playing(false);
        if let Some(worker) = slot.worker {
            worker.join();
        }
        debug!("Player '{}' removed", slot.key);
        Ok(())
    }

    fn open_asset_player(&mut self, store: &AssetStore, name: &str) -> EngineResult<()> {
        let rate = self.output.as_ref().ok_or(EngineError::NoOutput)?.sample_rate;
        if self.asset_player.as_ref().is_some_and(|p| p.key == name) {
            return Ok(());
        }

        let path = store.resolve(name)?;
        let (pcm, channels) = decode_to_rate(&path, rate)?;

        if let Some(previous) = self.asset_player.take() {
            if let Err(previous) = self.remove_player(previous) {
                self.asset_player = Some(previous);
                return Err(EngineError::CommandQueueFull);
            }
        }

        let id = self.allocate_source_id();
        let (source, handle) = Source::asset(id, pcm.into(), channels);
        self.send(Command::AddSource(Box::new(source)))?;

        info!("Asset player created for '{}' ({} channels)", name, channels);
        self.asset_player = Some(PlayerSlot {
            key: name.to_string(),
            handle,
            worker: None,
        });
        Ok(())
    }

    fn open_uri_player(&mut self, uri: &str) -> EngineResult<()> {
        let rate = self.output.as_ref().ok_or(EngineError::NoOutput)?.sample_rate;
        if self.uri_player.as_ref().is_some_and(|p| p.key == uri) {
            return Ok(());
        }

        let path = resolve_uri(uri)?;
        let decoder = AudioDecoder::open(&path)?;
        let channels = decoder.output_channels();

        if let Some(previous) = self.uri_player.take() {
            if let Err(previous) = self.remove_player(previous) {
                self.uri_player = Some(previous);
                return Err(EngineError::CommandQueueFull);
            }
        }

        let (producer, consumer) = RingBuffer::new(self.config.decode_ring_frames * channels);
        let status = Arc::new(StreamStatus::default());
        let id = self.allocate_source_id();
        let (source, handle) = Source::stream(id, consumer, Arc::clone(&status), channels);

        let worker = DecodeWorker::spawn(
            decoder,
            rate,
            producer,
            source.controls_arc(),
            status,
            self.event_sender.clone(),
        )?;
        self.send(Command::AddSource(Box::new(source)))?;

        info!("URI player created for '{}' ({} channels)", uri, channels);
        self.uri_player = Some(PlayerSlot {
            key: uri.to_string(),
            handle,
            worker: Some(worker),
        });
        Ok(())
    }

    /// Player the URI-player setters act on: the URI player, else the
    /// asset player, else the buffer-queue player
    pub fn uri_target(&self) -> Option<&SourceHandle> {
        self.uri_player
            .as_ref()
            .map(|p| &p.handle)
            .or_else(|| self.asset_player.as_ref().map(|p| &p.handle))
            .or_else(|| self.output.as_ref().map(|sink| &sink.clip))
    }

    fn queue_clip(&mut self, clip: Clip, count: u32) -> EngineResult<()> {
        if self.output.is_none() {
            return Err(EngineError::NoOutput);
        }

        if clip == Clip::None {
            let result = self.send(Command::StopClip);
            if let Some(sink) = self.output.as_ref() {
                sink.shared.clear_clip();
            }
            return result;
        }

        self.require("select_clip", &[EngineState::Running])?;
        if self.is_recording() {
            return Err(EngineError::EngineBusy);
        }

        let latest = self.latest_recording();
        let sink = self.output.as_mut().ok_or(EngineError::NoOutput)?;
        if sink.shared.is_clip_in_flight() {
            return Err(EngineError::EngineBusy);
        }

        let pcm = match clip {
            Clip::Playback => {
                let recording = latest.ok_or(EngineError::NoRecording)?;
                let cached = sink
                    .playback
                    .as_ref()
                    .filter(|(source, _)| Arc::ptr_eq(source, &recording.samples))
                    .map(|(_, prepared)| Arc::clone(prepared));
                match cached {
                    Some(prepared) => prepared,
                    None => {
                        let prepared = sink
                            .clips
                            .prepare_recording(&recording.samples, recording.sample_rate)?;
                        sink.playback = Some((recording.samples, Arc::clone(&prepared)));
                        prepared
                    }
                }
            }
            other => sink.clips.get(other).ok_or(EngineError::InvalidClip(other as i32))?,
        };

        let generation = sink.next_generation;
        sink.next_generation += 1;
        if !sink.shared.begin_clip(generation) {
            return Err(EngineError::EngineBusy);
        }

        let command = Command::QueueClip {
            pcm,
            count: count.max(1),
            generation,
        };
        if sink.commands.push(command).is_err() {
            sink.shared.clear_clip();
            return Err(EngineError::CommandQueueFull);
        }
        debug!("Clip {} queued x{} (generation {})", clip, count.max(1), generation);
        Ok(())
    }

    fn open_recorder(&mut self) -> EngineResult<()> {
        if self.recorder.is_some() {
            return Ok(());
        }
        self.require(
            "create_audio_recorder",
            &[EngineState::Created, EngineState::Running, EngineState::Paused],
        )?;

        let input = StreamConfig {
            sample_rate: self.config.recorder.sample_rate,
            channels: 1,
            buffer_size: self.config.stream.buffer_size,
        };
        let recorder = Recorder::create(
            self.backend.as_mut(),
            &self.config.recorder,
            &input,
            self.event_sender.clone(),
        )?;
        self.recorder = Some(recorder);
        Ok(())
    }

    fn begin_recording(&mut self) -> EngineResult<()> {
        let recorder = self.recorder.as_ref().ok_or(EngineError::NoRecorder)?;
        if self.is_clip_in_flight() {
            return Err(EngineError::EngineBusy);
        }
        recorder.start()
    }

    /// Wait for the callback to go quiet, bounded by the configured timeout
    fn wait_for_stop(&self, sink: &OutputSink) -> EngineResult<()> {
        sink.shared.request_stop();
        let deadline = Instant::now() + Duration::from_millis(self.config.shutdown_timeout_ms);
        while !sink.shared.is_stop_acknowledged() {
            if Instant::now() >= deadline {
                return Err(EngineError::ShutdownTimeout);
            }
            thread::sleep(STOP_POLL);
        }
        Ok(())
    }

    fn teardown(&mut self) {
        if self.state == EngineState::Destroyed {
            return;
        }
        info!("Shutting down audio engine");

        let sink = self.output.take();
        if let Some(sink) = sink.as_ref() {
            if let Err(e) = self.wait_for_stop(sink) {
                // Dropping the stream below still stops the callback
                warn!("{}", e);
            }
        }
        let retired = sink.map(|sink| {
            let OutputSink { stream, retired, .. } = sink;
            drop(stream);
            retired
        });

        if let Some(recorder) = self.recorder.take() {
            recorder.shutdown();
        }

        for slot in [self.asset_player.take(), self.uri_player.take()]
            .into_iter()
            .flatten()
        {
            if let Some(worker) = slot.worker {
                worker.join();
            }
        }

        if let Some(mut retired) = retired {
            while let Ok(item) = retired.pop() {
                drop(item);
            }
        }

        self.state = EngineState::Destroyed;
        self.emit(Event::Destroyed);
        info!("Audio engine destroyed");
    }
}

impl AudioControl for AudioEngine {
    fn create_buffer_queue_player(
        &mut self,
        sample_rate: i32,
        buffer_frames: i32,
    ) -> EngineResult<()> {
        self.open_output(sample_rate, buffer_frames).map_err(|e| {
            error!("Failed to create buffer queue player: {}", e);
            e
        })
    }

    fn create_asset_player(&mut self, store: &AssetStore, name: &str) -> bool {
        self.collect_retired();
        match self.open_asset_player(store, name) {
            Ok(()) => true,
            Err(e) => {
                warn!("Asset player not created: {}", e);
                false
            }
        }
    }

    fn create_uri_player(&mut self, uri: &str) -> bool {
        self.collect_retired();
        match self.open_uri_player(uri) {
            Ok(()) => true,
            Err(e) => {
                warn!("URI player not created: {}", e);
                false
            }
        }
    }

    fn set_playing_asset_player(&mut self, playing: bool) {
        if self.state == EngineState::Paused && playing {
            debug!("Engine paused, asset player stays stopped");
            return;
        }
        if let Some(player) = self.asset_player.as_ref() {
            player.handle.set_playing(playing);
        }
    }

    fn set_playing_uri_player(&mut self, playing: bool) {
        if self.state == EngineState::Paused && playing {
            debug!("Engine paused, URI player stays stopped");
            return;
        }
        if let Some(player) = self.uri_player.as_ref() {
            player.handle.set_playing(playing);
        }
    }

    fn set_looping_uri_player(&mut self, looping: bool) {
        if let Some(player) = self.uri_player.as_ref() {
            player.handle.set_looping(looping);
        }
    }

    fn set_channel_mute_uri_player(&mut self, channel: u32, mute: bool) {
        if let Some(target) = self.uri_target() {
            target.set_channel_mute(channel, mute);
        }
    }

    fn set_channel_solo_uri_player(&mut self, channel: u32, solo: bool) {
        if let Some(target) = self.uri_target() {
            target.set_channel_solo(channel, solo);
        }
    }

    fn num_channels_uri_player(&self) -> i32 {
        self.uri_target()
            .map(|target| target.num_channels() as i32)
            .unwrap_or(0)
    }

    fn set_volume_uri_player(&mut self, millibel: i32) {
        if let Some(target) = self.uri_target() {
            target.set_volume(millibel);
        }
    }

    fn set_mute_uri_player(&mut self, mute: bool) {
        if let Some(target) = self.uri_target() {
            target.set_mute(mute);
        }
    }

    fn enable_stereo_position_uri_player(&mut self, enable: bool) {
        if let Some(target) = self.uri_target() {
            target.enable_stereo_position(enable);
        }
    }

    fn set_stereo_position_uri_player(&mut self, permille: i32) {
        if let Some(target) = self.uri_target() {
            target.set_stereo_position(permille);
        }
    }

    fn select_clip(&mut self, clip: Clip, count: u32) -> bool {
        self.collect_retired();
        match self.queue_clip(clip, count) {
            Ok(()) => true,
            Err(e) => {
                debug!("Clip {} not selected: {}", clip, e);
                false
            }
        }
    }

    fn enable_reverb(&mut self, enabled: bool) -> bool {
        match self.output.as_ref() {
            Some(sink) => {
                sink.effect.set_enabled(enabled);
                debug!("Reverb {}", if enabled { "enabled" } else { "disabled" });
                true
            }
            None => {
                debug!("Reverb not changed: {}", EngineError::NoOutput);
                false
            }
        }
    }

    fn create_audio_recorder(&mut self) -> bool {
        match self.open_recorder() {
            Ok(()) => true,
            Err(e) => {
                warn!("Recorder not created: {}", e);
                false
            }
        }
    }

    fn start_recording(&mut self) -> bool {
        match self.begin_recording() {
            Ok(()) => true,
            Err(e) => {
                debug!("Recording not started: {}", e);
                false
            }
        }
    }

    fn stop_recording(&mut self) -> bool {
        match self.recorder.as_ref() {
            Some(recorder) if recorder.is_busy() => recorder.stop().is_ok(),
            _ => false,
        }
    }

    fn pause(&mut self) -> EngineResult<()> {
        self.require("pause", &[EngineState::Running])?;
        self.send(Command::Pause)?;

        for player in [self.asset_player.as_ref(), self.uri_player.as_ref()]
            .into_iter()
            .flatten()
        {
            player.handle.set_playing(false);
        }
        if let Some(sink) = self.output.as_ref() {
            sink.clip.set_playing(false);
            sink.effect.set_forced_bypass(true);
            sink.shared.clear_clip();
        }

        self.state = EngineState::Paused;
        self.emit(Event::Paused);
        info!("Audio engine paused");
        Ok(())
    }

    fn resume(&mut self) -> EngineResult<()> {
        self.require("resume", &[EngineState::Paused])?;

        self.send(Command::Resume)?;
        if let Some(sink) = self.output.as_ref() {
            sink.effect.set_forced_bypass(false);
        }

        self.state = EngineState::Running;
        self.emit(Event::Resumed);
        info!("Audio engine resumed");
        Ok(())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}
