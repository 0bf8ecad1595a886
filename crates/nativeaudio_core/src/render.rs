//! Output Sink Callback
//!
//! `OutputRenderer` is moved into the device's output callback. Per buffer:
//!
//! ```text
//! drain commands -> mixer.pull_mixed -> effect stage -> clamp -> device buffer
//! ```
//!
//! The callback never allocates, locks, or frees: replaced clip blocks and
//! removed sources go back to the control thread through the retired queue,
//! and everything the UI needs to know goes out as an `Event` via `try_send`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use rtrb::{Consumer, Producer, PushError};

use nativeaudio_dsp::{AudioProcessor, EffectStage, ProcessContext};

use crate::message::{Command, Event, Retired};
use crate::mixer::{MixStats, Mixer};
use crate::source::SourceId;

/// No clip queued
const CLIP_IDLE: u64 = 0;

/// State shared between the output callback and the control thread
pub struct SharedState {
    /// Peak level left channel (stored as f32 bits)
    peak_left_bits: AtomicU32,

    /// Peak level right channel
    peak_right_bits: AtomicU32,

    stop_requested: AtomicBool,

    /// Set by the callback once it has seen the stop request
    stop_acknowledged: AtomicBool,

    /// Generation of the clip being played, `CLIP_IDLE` when none
    clip_in_flight: AtomicU64,

    callbacks: AtomicU64,

    underruns: AtomicU64,

    clipped_samples: AtomicU64,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            peak_left_bits: AtomicU32::new(0.0_f32.to_bits()),
            peak_right_bits: AtomicU32::new(0.0_f32.to_bits()),
            stop_requested: AtomicBool::new(false),
            stop_acknowledged: AtomicBool::new(false),
            clip_in_flight: AtomicU64::new(CLIP_IDLE),
            callbacks: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            clipped_samples: AtomicU64::new(0),
        }
    }

    pub fn set_peaks(&self, left: f32, right: f32) {
        self.peak_left_bits.store(left.to_bits(), Ordering::Relaxed);
        self.peak_right_bits.store(right.to_bits(), Ordering::Relaxed);
    }

    pub fn peaks(&self) -> (f32, f32) {
        (
            f32::from_bits(self.peak_left_bits.load(Ordering::Relaxed)),
            f32::from_bits(self.peak_right_bits.load(Ordering::Relaxed)),
        )
    }

    /// Ask the callback to go quiet before teardown
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_stop_acknowledged(&self) -> bool {
        self.stop_acknowledged.load(Ordering::Acquire)
    }

    fn acknowledge_stop(&self) {
        self.stop_acknowledged.store(true, Ordering::Release);
    }

    /// Claim the clip queue for `generation`. Fails while another clip plays.
    pub fn begin_clip(&self, generation: u64) -> bool {
        self.clip_in_flight
            .compare_exchange(CLIP_IDLE, generation, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the clip queue if `generation` still holds it
    pub fn finish_clip(&self, generation: u64) {
        let _ = self.clip_in_flight.compare_exchange(
            generation,
            CLIP_IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Release the clip queue unconditionally
    pub fn clear_clip(&self) {
        self.clip_in_flight.store(CLIP_IDLE, Ordering::Release);
    }

    pub fn is_clip_in_flight(&self) -> bool {
        self.clip_in_flight.load(Ordering::Acquire) != CLIP_IDLE
    }

    /// Output callbacks run so far
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn clipped_samples(&self) -> u64 {
        self.clipped_samples.load(Ordering::Relaxed)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Queues connecting the renderer to the control thread
pub struct RendererChannels {
    pub commands: Consumer<Command>,
    pub retired: Producer<Retired>,
    pub events: Sender<Event>,
    pub shared: Arc<SharedState>,
}

/// Everything the output callback owns
pub struct OutputRenderer {
    mixer: Mixer,
    effect: EffectStage,
    commands: Consumer<Command>,
    retired: Producer<Retired>,
    events: Sender<Event>,
    shared: Arc<SharedState>,
    /// Stereo scratch bus, `max_frames * 2` samples
    bus: Vec<f32>,
    max_frames: usize,
    context: ProcessContext,
    clip_source: SourceId,
    paused: bool,
    clipping: bool,
}

impl OutputRenderer {
    pub fn new(
        mixer: Mixer,
        effect: EffectStage,
        channels: RendererChannels,
        clip_source: SourceId,
        sample_rate: u32,
        max_frames: usize,
    ) -> Self {
        let max_frames = max_frames.max(1);
        Self {
            mixer,
            effect,
            commands: channels.commands,
            retired: channels.retired,
            events: channels.events,
            shared: channels.shared,
            bus: vec![0.0; max_frames * 2],
            max_frames,
            context: ProcessContext::new(sample_rate as f32, 2, max_frames),
            clip_source,
            paused: false,
            clipping: false,
        }
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Fill one device buffer of `channels` interleaved channels
    ///
    /// # Real-time Safety
    /// No allocations, no locks, no frees.
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        self.shared.callbacks.fetch_add(1, Ordering::Relaxed);
        self.drain_commands();

        if self.shared.is_stop_requested() {
            data.fill(0.0);
            self.shared.set_peaks(0.0, 0.0);
            self.shared.acknowledge_stop();
            return;
        }

        if self.paused {
            data.fill(0.0);
            self.shared.set_peaks(0.0, 0.0);
            return;
        }

        let channels = channels.max(1);
        let frames = data.len() / channels;
        if frames > self.max_frames {
            data.fill(0.0);
            self.shared.underruns.fetch_add(1, Ordering::Relaxed);
            let _ = self.events.try_send(Event::BufferUnderrun);
            return;
        }

        let bus = &mut self.bus[..frames * 2];
        let stats = self.mixer.pull_mixed(bus);
        self.effect.process(bus, &self.context);

        let mut peak_l = 0.0_f32;
        let mut peak_r = 0.0_f32;
        for frame in bus.chunks_exact_mut(2) {
            // Reverb tail can push a limited mix back over full scale
            frame[0] = frame[0].clamp(-1.0, 1.0);
            frame[1] = frame[1].clamp(-1.0, 1.0);
            peak_l = peak_l.max(frame[0].abs());
            peak_r = peak_r.max(frame[1].abs());
        }
        self.shared.set_peaks(peak_l, peak_r);

        if channels == 1 {
            for (out, frame) in data.iter_mut().zip(bus.chunks_exact(2)) {
                *out = 0.5 * (frame[0] + frame[1]);
            }
        } else {
            for (out, frame) in data.chunks_exact_mut(channels).zip(bus.chunks_exact(2)) {
                out[0] = frame[0];
                out[1] = frame[1];
                out[2..].fill(0.0);
            }
        }
        data[frames * channels..].fill(0.0);

        self.report(stats);
    }

    fn report(&mut self, stats: MixStats) {
        if stats.clipped > 0 {
            self.shared
                .clipped_samples
                .fetch_add(stats.clipped as u64, Ordering::Relaxed);
            if !self.clipping {
                let _ = self.events.try_send(Event::Clipped {
                    samples: stats.clipped,
                });
            }
        }
        self.clipping = stats.clipped > 0;

        if !stats.any_ended() {
            return;
        }
        for slot in stats.ended_slots() {
            let Some(source) = self.mixer.slot(slot) else {
                continue;
            };
            if source.id() == self.clip_source {
                self.shared.finish_clip(source.clip_generation());
                let _ = self.events.try_send(Event::ClipFinished);
            } else {
                let _ = self.events.try_send(Event::SourceEnded {
                    source: source.id().0,
                });
            }
        }
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                Command::AddSource(source) => {
                    if let Err(source) = self.mixer.insert(source) {
                        let _ = self.events.try_send(Event::SourceRejected {
                            source: source.id().0,
                        });
                        self.retire(Retired::Source(source));
                    }
                }
                Command::RemoveSource(id) => {
                    if let Some(source) = self.mixer.remove(id) {
                        self.retire(Retired::Source(source));
                    }
                }
                Command::QueueClip {
                    pcm,
                    count,
                    generation,
                } => {
                    let replaced = match self.mixer.source_mut(self.clip_source) {
                        Some(source) => source.queue_clip(pcm, count, generation),
                        None => {
                            self.shared.finish_clip(generation);
                            Some(pcm)
                        }
                    };
                    if let Some(block) = replaced {
                        self.retire(Retired::Clip(block));
                    }
                }
                Command::StopClip => self.stop_clip(),
                Command::Pause => {
                    self.paused = true;
                    self.stop_clip();
                    for source in self.mixer.sources_mut() {
                        source.controls().set_playing(false);
                    }
                }
                Command::Resume => self.paused = false,
            }
        }
    }

    fn stop_clip(&mut self) {
        let block = self
            .mixer
            .source_mut(self.clip_source)
            .and_then(|source| source.stop_clip());
        if let Some(block) = block {
            self.retire(Retired::Clip(block));
        }
    }

    fn retire(&mut self, item: Retired) {
        if let Err(PushError::Full(item)) = self.retired.push(item) {
            // Leaked rather than freed on the audio thread
            std::mem::forget(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use nativeaudio_dsp::{ClipPolicy, ReverbSettings};
    use rtrb::RingBuffer;

    use crate::source::{Source, SourceHandle};

    const RATE: u32 = 48000;
    const CLIP_ID: SourceId = SourceId(1);

    struct Harness {
        renderer: OutputRenderer,
        commands: Producer<Command>,
        retired: Consumer<Retired>,
        events: Receiver<Event>,
        shared: Arc<SharedState>,
        clip: SourceHandle,
    }

    fn harness(max_frames: usize) -> Harness {
        let (commands, command_rx) = RingBuffer::new(16);
        let (retired_tx, retired) = RingBuffer::new(32);
        let (event_tx, events) = crossbeam_channel::bounded(64);
        let shared = Arc::new(SharedState::new());

        let mut mixer = Mixer::new(4, max_frames, ClipPolicy::HardClamp);
        let (clip_source, clip) = Source::clip(CLIP_ID);
        assert!(mixer.insert(Box::new(clip_source)).is_ok());
        let effect = EffectStage::new(RATE as f32, ReverbSettings::default(), 10.0).unwrap();

        let renderer = OutputRenderer::new(
            mixer,
            effect,
            RendererChannels {
                commands: command_rx,
                retired: retired_tx,
                events: event_tx,
                shared: Arc::clone(&shared),
            },
            CLIP_ID,
            RATE,
            max_frames,
        );

        Harness {
            renderer,
            commands,
            retired,
            events,
            shared,
            clip,
        }
    }

    fn constant_asset(id: u64, value: f32, frames: usize) -> (Box<Source>, SourceHandle) {
        let (source, handle) = Source::asset(SourceId(id), vec![value; frames].into(), 1);
        handle.set_playing(true);
        (Box::new(source), handle)
    }

    #[test]
    fn test_silence_without_sources() {
        let mut h = harness(256);
        let mut data = vec![1.0; 512];
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(h.shared.callbacks(), 1);
    }

    #[test]
    fn test_add_source_then_render() {
        let mut h = harness(256);
        let (source, _handle) = constant_asset(2, 0.25, 1024);
        h.commands.push(Command::AddSource(source)).unwrap();

        let mut data = vec![0.0; 128];
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| (*s - 0.25).abs() < 1e-6));
        assert_eq!(h.shared.peaks(), (0.25, 0.25));
    }

    #[test]
    fn test_mono_device_gets_downmix_and_wide_device_gets_silence() {
        let mut h = harness(256);
        let (source, handle) = constant_asset(2, 0.5, 1024);
        handle.enable_stereo_position(true);
        handle.set_stereo_position(-1000);
        h.commands.push(Command::AddSource(source)).unwrap();

        let mut mono = vec![0.0; 32];
        h.renderer.render(&mut mono, 1);
        assert!(mono.iter().all(|s| (*s - 0.25).abs() < 1e-6));

        let mut quad = vec![9.0; 32];
        h.renderer.render(&mut quad, 4);
        for frame in quad.chunks_exact(4) {
            assert_eq!(frame, [0.5, 0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_oversized_buffer_is_silence_and_underrun() {
        let mut h = harness(64);
        let (source, _handle) = constant_asset(2, 0.5, 1024);
        h.commands.push(Command::AddSource(source)).unwrap();

        let mut data = vec![1.0; 65 * 2];
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 0.0));
        assert_eq!(h.shared.underruns(), 1);
        assert_eq!(h.events.try_recv().unwrap(), Event::BufferUnderrun);
    }

    #[test]
    fn test_clip_finishes_and_releases_queue() {
        let mut h = harness(256);
        assert!(h.shared.begin_clip(5));
        assert!(!h.shared.begin_clip(6));

        h.commands
            .push(Command::QueueClip {
                pcm: vec![0.1; 100].into(),
                count: 2,
                generation: 5,
            })
            .unwrap();

        let mut data = vec![0.0; 256];
        h.renderer.render(&mut data, 2);
        assert!(h.clip.is_playing());
        assert!(h.shared.is_clip_in_flight());

        h.renderer.render(&mut data, 2);
        assert!(!h.clip.is_playing());
        assert!(!h.shared.is_clip_in_flight());
        assert_eq!(h.events.try_recv().unwrap(), Event::ClipFinished);
    }

    #[test]
    fn test_replaced_clip_is_retired() {
        let mut h = harness(256);
        for generation in 1..=2 {
            h.commands
                .push(Command::QueueClip {
                    pcm: vec![0.1; 10_000].into(),
                    count: 1,
                    generation,
                })
                .unwrap();
        }
        let mut data = vec![0.0; 64];
        h.renderer.render(&mut data, 2);

        match h.retired.pop() {
            Ok(Retired::Clip(block)) => assert_eq!(block.len(), 10_000),
            _ => panic!("expected retired clip"),
        }
    }

    #[test]
    fn test_remove_source_is_retired() {
        let mut h = harness(256);
        let (source, _handle) = constant_asset(2, 0.5, 16);
        h.commands.push(Command::AddSource(source)).unwrap();
        h.commands.push(Command::RemoveSource(SourceId(2))).unwrap();

        let mut data = vec![0.0; 64];
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 0.0));
        match h.retired.pop() {
            Ok(Retired::Source(source)) => assert_eq!(source.id(), SourceId(2)),
            _ => panic!("expected retired source"),
        }
    }

    #[test]
    fn test_pause_silences_and_stops_sources() {
        let mut h = harness(256);
        let (source, handle) = constant_asset(2, 0.5, 1024);
        h.commands.push(Command::AddSource(source)).unwrap();
        h.commands.push(Command::Pause).unwrap();

        let mut data = vec![1.0; 64];
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 0.0));
        assert!(h.renderer.is_paused());
        assert!(!handle.is_playing());

        h.commands.push(Command::Resume).unwrap();
        handle.set_playing(true);
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_stop_request_is_acknowledged() {
        let mut h = harness(256);
        let (source, _handle) = constant_asset(2, 0.5, 1024);
        h.commands.push(Command::AddSource(source)).unwrap();

        h.shared.request_stop();
        assert!(!h.shared.is_stop_acknowledged());

        let mut data = vec![1.0; 64];
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 0.0));
        assert!(h.shared.is_stop_acknowledged());
    }

    #[test]
    fn test_clipping_reported_once_per_episode() {
        let mut h = harness(256);
        let (a, _ha) = constant_asset(2, 1.0, 4096);
        let (b, _hb) = constant_asset(3, 1.0, 4096);
        h.commands.push(Command::AddSource(a)).unwrap();
        h.commands.push(Command::AddSource(b)).unwrap();

        let mut data = vec![0.0; 64];
        h.renderer.render(&mut data, 2);
        h.renderer.render(&mut data, 2);
        assert!(data.iter().all(|s| *s == 1.0));
        assert_eq!(h.shared.clipped_samples(), 128);
        assert_eq!(h.events.try_recv().unwrap(), Event::Clipped { samples: 64 });
        assert!(h.events.try_recv().is_err());
    }

    #[test]
    fn test_full_mixer_rejects_source() {
        let mut h = harness(256);
        for id in 2..=5 {
            let (source, _handle) = constant_asset(id, 0.1, 16);
            h.commands.push(Command::AddSource(source)).unwrap();
        }
        let mut data = vec![0.0; 64];
        h.renderer.render(&mut data, 2);
        assert_eq!(h.events.try_recv().unwrap(), Event::SourceRejected { source: 5 });
        assert!(matches!(h.retired.pop(), Ok(Retired::Source(_))));
    }
}
