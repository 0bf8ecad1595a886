//! Sample Sources
//!
//! A source is split in two halves:
//!
//! - `Source` lives on the audio callback (inside the mixer) and produces
//!   frames at the mixer rate
//! - `SourceHandle` lives on the control thread and only touches the shared
//!   `SourceControls` atomics
//!
//! The callback owns all source state except the flags in `SourceControls`,
//! so no lock is ever taken on the audio path.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use rtrb::Consumer;
use serde::{Deserialize, Serialize};
use tracing::warn;

use nativeaudio_dsp::{clamp_millibel, StereoGains, PERMILLE_MAX};

/// Sources are mono or stereo; wider material is folded at decode time
pub const MAX_SOURCE_CHANNELS: usize = 2;

/// Channel masks hold one bit per channel
const MAX_MASK_CHANNELS: u32 = 8;

/// Identifies a source inside the mixer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(pub u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    /// Buffer-queue player fed with generated clips and recordings
    GeneratedClip,
    /// Compressed asset decoded up front
    AssetClip,
    /// File streamed through a decoder thread
    UriStream,
}

/// Flags and parameters shared between a handle and its source
#[derive(Debug)]
pub struct SourceControls {
    playing: AtomicBool,
    looping: AtomicBool,
    muted: AtomicBool,
    solo: AtomicBool,
    channel_mute: AtomicU8,
    channel_solo: AtomicU8,
    gain_millibel: AtomicI32,
    pan_permille: AtomicI32,
    pan_enabled: AtomicBool,
    num_channels: AtomicU32,
    position: AtomicU64,
    ended: AtomicBool,
}

impl SourceControls {
    pub fn new(looping: bool) -> Self {
        Self {
            playing: AtomicBool::new(false),
            looping: AtomicBool::new(looping),
            muted: AtomicBool::new(false),
            solo: AtomicBool::new(false),
            channel_mute: AtomicU8::new(0),
            channel_solo: AtomicU8::new(0),
            gain_millibel: AtomicI32::new(0),
            pan_permille: AtomicI32::new(0),
            pan_enabled: AtomicBool::new(false),
            num_channels: AtomicU32::new(0),
            position: AtomicU64::new(0),
            ended: AtomicBool::new(false),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_solo(&self) -> bool {
        self.solo.load(Ordering::Relaxed)
    }

    pub fn set_solo(&self, solo: bool) {
        self.solo.store(solo, Ordering::Relaxed);
    }

    pub fn channel_mute_mask(&self) -> u8 {
        self.channel_mute.load(Ordering::Relaxed)
    }

    pub fn channel_solo_mask(&self) -> u8 {
        self.channel_solo.load(Ordering::Relaxed)
    }

    pub fn set_channel_mute(&self, channel: u32, mute: bool) {
        set_mask_bit(&self.channel_mute, channel, mute);
    }

    pub fn set_channel_solo(&self, channel: u32, solo: bool) {
        set_mask_bit(&self.channel_solo, channel, solo);
    }

    /// Channel contributes iff it is not muted and either no channel is
    /// soloed or this one is
    #[inline]
    pub fn channel_audible(&self, channel: usize) -> bool {
        let bit = 1u8 << channel;
        let mute = self.channel_mute_mask();
        let solo = self.channel_solo_mask();
        mute & bit == 0 && (solo == 0 || solo & bit != 0)
    }

    pub fn gain_millibel(&self) -> i32 {
        self.gain_millibel.load(Ordering::Relaxed)
    }

    pub fn set_gain_millibel(&self, millibel: i32) {
        self.gain_millibel
            .store(clamp_millibel(millibel), Ordering::Relaxed);
    }

    pub fn pan_permille(&self) -> i32 {
        self.pan_permille.load(Ordering::Relaxed)
    }

    pub fn set_pan_permille(&self, permille: i32) {
        self.pan_permille
            .store(permille.clamp(-PERMILLE_MAX, PERMILLE_MAX), Ordering::Relaxed);
    }

    pub fn is_pan_enabled(&self) -> bool {
        self.pan_enabled.load(Ordering::Relaxed)
    }

    pub fn set_pan_enabled(&self, enabled: bool) {
        self.pan_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Unity when stereo positioning is disabled
    #[inline]
    pub fn stereo_gains(&self) -> StereoGains {
        if self.is_pan_enabled() {
            StereoGains::from_permille(self.pan_permille())
        } else {
            StereoGains::UNITY
        }
    }

    /// 0 until the source format is known
    pub fn num_channels(&self) -> u32 {
        self.num_channels.load(Ordering::Relaxed)
    }

    pub(crate) fn set_num_channels(&self, channels: u32) {
        self.num_channels.store(channels, Ordering::Relaxed);
    }

    /// Frames consumed so far
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    pub(crate) fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Called by the mixer when a source reports end of stream
    pub(crate) fn mark_ended(&self) {
        self.ended.store(true, Ordering::Release);
        self.playing.store(false, Ordering::Release);
    }

    pub(crate) fn clear_ended(&self) {
        self.ended.store(false, Ordering::Release);
    }
}

fn set_mask_bit(mask: &AtomicU8, channel: u32, value: bool) {
    if channel >= MAX_MASK_CHANNELS {
        warn!("Channel {} out of range, ignored", channel);
        return;
    }
    let bit = 1u8 << channel;
    if value {
        mask.fetch_or(bit, Ordering::Relaxed);
    } else {
        mask.fetch_and(!bit, Ordering::Relaxed);
    }
}

/// Progress of a URI decoder thread, shared with the callback and handle
#[derive(Debug, Default)]
pub struct StreamStatus {
    /// Decoder has pushed its last sample
    pub(crate) done: AtomicBool,
    /// Decoder should reopen the stream from the start
    pub(crate) restart: AtomicBool,
    /// Decoder thread should exit
    pub(crate) shutdown: AtomicBool,
    /// Decoder hit an unrecoverable error
    pub(crate) failed: AtomicBool,
    /// Callbacks that found the ring short while the decoder was alive
    pub(crate) underruns: AtomicU64,
}

impl StreamStatus {
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Control-side view of a source
#[derive(Debug, Clone)]
pub struct SourceHandle {
    id: SourceId,
    kind: SourceKind,
    controls: Arc<SourceControls>,
    stream: Option<Arc<StreamStatus>>,
}

impl SourceHandle {
    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn controls(&self) -> &SourceControls {
        &self.controls
    }

    /// Start or pause. Starting a source that reached its end plays it again
    /// from the beginning.
    pub fn set_playing(&self, playing: bool) {
        if playing && self.controls.is_ended() {
            if let Some(stream) = &self.stream {
                stream.done.store(false, Ordering::Release);
                stream.restart.store(true, Ordering::Release);
            }
            self.controls.clear_ended();
        }
        self.controls.set_playing(playing);
    }

    pub fn is_playing(&self) -> bool {
        self.controls.is_playing()
    }

    pub fn set_looping(&self, looping: bool) {
        self.controls.set_looping(looping);
    }

    pub fn set_channel_mute(&self, channel: u32, mute: bool) {
        self.controls.set_channel_mute(channel, mute);
    }

    pub fn set_channel_solo(&self, channel: u32, solo: bool) {
        self.controls.set_channel_solo(channel, solo);
    }

    /// Volume in millibel, clamped to [MILLIBEL_MIN, 0]
    pub fn set_volume(&self, millibel: i32) {
        self.controls.set_gain_millibel(millibel);
    }

    pub fn set_mute(&self, mute: bool) {
        self.controls.set_muted(mute);
    }

    pub fn set_solo(&self, solo: bool) {
        self.controls.set_solo(solo);
    }

    pub fn enable_stereo_position(&self, enable: bool) {
        self.controls.set_pan_enabled(enable);
    }

    /// Stereo position in permille, clamped to [-1000, 1000]
    pub fn set_stereo_position(&self, permille: i32) {
        self.controls.set_pan_permille(permille);
    }

    pub fn num_channels(&self) -> u32 {
        self.controls.num_channels()
    }

    pub fn position(&self) -> u64 {
        self.controls.position()
    }

    pub fn stream_status(&self) -> Option<&StreamStatus> {
        self.stream.as_deref()
    }
}

/// Outcome of one `Source::read`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResult {
    /// Frames of real audio written (the rest of the request is silence)
    pub frames: usize,
    /// The source has nothing more to play
    pub eof: bool,
}

/// Buffer-queue player: plays a PCM block a fixed number of times
pub struct ClipPlayer {
    pcm: Option<Arc<[f32]>>,
    position: usize,
    remaining: u32,
    generation: u64,
}

impl ClipPlayer {
    fn new() -> Self {
        Self {
            pcm: None,
            position: 0,
            remaining: 0,
            generation: 0,
        }
    }

    /// Replace the queued block, returning the previous one so the caller
    /// can free it off the audio thread
    fn queue(&mut self, pcm: Arc<[f32]>, count: u32, generation: u64) -> Option<Arc<[f32]>> {
        self.position = 0;
        self.remaining = if pcm.is_empty() { 0 } else { count.max(1) };
        self.generation = generation;
        self.pcm.replace(pcm)
    }

    fn stop(&mut self) -> Option<Arc<[f32]>> {
        self.position = 0;
        self.remaining = 0;
        self.pcm.take()
    }

    fn read(&mut self, out: &mut [f32], frames: usize) -> ReadResult {
        let Some(pcm) = self.pcm.as_ref() else {
            out[..frames].fill(0.0);
            return ReadResult { frames: 0, eof: true };
        };

        let mut written = 0;
        while written < frames && self.remaining > 0 {
            let n = (frames - written).min(pcm.len() - self.position);
            out[written..written + n].copy_from_slice(&pcm[self.position..self.position + n]);
            written += n;
            self.position += n;
            if self.position == pcm.len() {
                self.position = 0;
                self.remaining -= 1;
            }
        }
        out[written..frames].fill(0.0);

        ReadResult {
            frames: written,
            eof: self.remaining == 0,
        }
    }
}

/// Fully decoded asset held in memory
pub struct AssetPlayer {
    pcm: Arc<[f32]>,
    channels: usize,
    /// Frame index
    position: usize,
}

impl AssetPlayer {
    fn frames(&self) -> usize {
        self.pcm.len() / self.channels
    }

    fn read(&mut self, out: &mut [f32], frames: usize, looping: bool) -> ReadResult {
        let total = self.frames();
        let channels = self.channels;
        let mut written = 0;
        let mut eof = total == 0;

        while written < frames && !eof {
            if self.position >= total {
                if looping {
                    self.position = 0;
                } else {
                    eof = true;
                    break;
                }
            }
            let n = (frames - written).min(total - self.position);
            let src = &self.pcm[self.position * channels..(self.position + n) * channels];
            out[written * channels..(written + n) * channels].copy_from_slice(src);
            written += n;
            self.position += n;
        }
        if self.position >= total && !looping {
            eof = true;
        }
        out[written * channels..frames * channels].fill(0.0);

        ReadResult {
            frames: written,
            eof,
        }
    }
}

/// Frames popped from a decoder thread's ring
pub struct StreamPlayer {
    consumer: Consumer<f32>,
    status: Arc<StreamStatus>,
    channels: usize,
}

impl StreamPlayer {
    fn read(&mut self, out: &mut [f32], frames: usize) -> ReadResult {
        let channels = self.channels;
        let wanted = frames * channels;
        let available = self.consumer.slots().min(wanted) / channels * channels;

        if let Ok(chunk) = self.consumer.read_chunk(available) {
            let (first, second) = chunk.as_slices();
            out[..first.len()].copy_from_slice(first);
            out[first.len()..first.len() + second.len()].copy_from_slice(second);
            chunk.commit_all();
        }
        out[available..wanted].fill(0.0);

        let mut eof = false;
        if available < wanted {
            if self.status.is_done() && self.consumer.is_empty() {
                eof = true;
            } else {
                // Decode stall: the missing frames are already silence
                self.status.underruns.fetch_add(1, Ordering::Relaxed);
            }
        }

        ReadResult {
            frames: available / channels,
            eof,
        }
    }
}

pub enum SourceBody {
    Clip(ClipPlayer),
    Asset(AssetPlayer),
    Stream(StreamPlayer),
}

/// Callback-side half of a source
pub struct Source {
    id: SourceId,
    kind: SourceKind,
    channels: usize,
    controls: Arc<SourceControls>,
    body: SourceBody,
    at_end: bool,
}

impl Source {
    fn build(
        id: SourceId,
        kind: SourceKind,
        channels: usize,
        looping: bool,
        body: SourceBody,
        stream: Option<Arc<StreamStatus>>,
    ) -> (Source, SourceHandle) {
        let controls = Arc::new(SourceControls::new(looping));
        controls.set_num_channels(channels as u32);

        let handle = SourceHandle {
            id,
            kind,
            controls: Arc::clone(&controls),
            stream,
        };
        let source = Source {
            id,
            kind,
            channels,
            controls,
            body,
            at_end: false,
        };
        (source, handle)
    }

    /// Mono buffer-queue player, idle until a clip is queued
    pub fn clip(id: SourceId) -> (Source, SourceHandle) {
        Self::build(
            id,
            SourceKind::GeneratedClip,
            1,
            false,
            SourceBody::Clip(ClipPlayer::new()),
            None,
        )
    }

    /// In-memory asset at the mixer rate; loops by default
    pub fn asset(id: SourceId, pcm: Arc<[f32]>, channels: usize) -> (Source, SourceHandle) {
        let channels = channels.clamp(1, MAX_SOURCE_CHANNELS);
        Self::build(
            id,
            SourceKind::AssetClip,
            channels,
            true,
            SourceBody::Asset(AssetPlayer {
                pcm,
                channels,
                position: 0,
            }),
            None,
        )
    }

    /// Stream fed by a decoder thread; does not loop by default
    pub fn stream(
        id: SourceId,
        consumer: Consumer<f32>,
        status: Arc<StreamStatus>,
        channels: usize,
    ) -> (Source, SourceHandle) {
        let channels = channels.clamp(1, MAX_SOURCE_CHANNELS);
        Self::build(
            id,
            SourceKind::UriStream,
            channels,
            false,
            SourceBody::Stream(StreamPlayer {
                consumer,
                status: Arc::clone(&status),
                channels,
            }),
            Some(status),
        )
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn controls(&self) -> &SourceControls {
        &self.controls
    }

    /// Shared handle to the controls, for callers that outlive the source
    pub fn controls_arc(&self) -> Arc<SourceControls> {
        Arc::clone(&self.controls)
    }

    /// Read `frames` interleaved frames in this source's channel count
    ///
    /// `out` must hold at least `frames * channels()` samples. Frames the
    /// source cannot supply are written as silence.
    ///
    /// # Real-time Safety
    /// No allocations, no locks.
    pub fn read(&mut self, out: &mut [f32], frames: usize) -> ReadResult {
        if self.at_end && !self.controls.is_ended() {
            // Restarted after reaching the end
            self.rewind();
        }

        let result = match &mut self.body {
            SourceBody::Clip(clip) => clip.read(out, frames),
            SourceBody::Asset(asset) => asset.read(out, frames, self.controls.is_looping()),
            SourceBody::Stream(stream) => stream.read(out, frames),
        };

        let position = self.controls.position() + result.frames as u64;
        self.controls.set_position(position);
        self.at_end = result.eof;
        result
    }

    fn rewind(&mut self) {
        if let SourceBody::Asset(asset) = &mut self.body {
            asset.position = 0;
        }
        self.controls.set_position(0);
        self.at_end = false;
    }

    /// Queue a clip on a buffer-queue player and start it
    ///
    /// Returns the replaced block. Does nothing (and hands the new block
    /// back) for other source kinds.
    pub fn queue_clip(&mut self, pcm: Arc<[f32]>, count: u32, generation: u64) -> Option<Arc<[f32]>> {
        match &mut self.body {
            SourceBody::Clip(clip) => {
                let previous = clip.queue(pcm, count, generation);
                self.at_end = false;
                self.controls.set_position(0);
                self.controls.clear_ended();
                self.controls.set_playing(true);
                previous
            }
            _ => Some(pcm),
        }
    }

    /// Stop a buffer-queue player, returning its block
    pub fn stop_clip(&mut self) -> Option<Arc<[f32]>> {
        match &mut self.body {
            SourceBody::Clip(clip) => {
                self.controls.set_playing(false);
                clip.stop()
            }
            _ => None,
        }
    }

    /// Generation of the clip currently queued (0 for other kinds)
    pub fn clip_generation(&self) -> u64 {
        match &self.body {
            SourceBody::Clip(clip) => clip.generation,
            _ => 0,
        }
    }
}
