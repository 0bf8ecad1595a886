//! Mixer / Bus
//!
//! Sums every playing source into a stereo bus:
//!
//! 1. zero the bus
//! 2. note whether any playing source is soloed
//! 3. read each playing source (muted and non-soloed sources are still read
//!    so their position keeps moving), gate each channel by its mute/solo
//!    masks, apply volume and stereo position, accumulate
//! 4. sources that hit end of stream are marked ended and stop playing
//! 5. apply the clipping policy
//!
//! Slots and scratch memory are allocated in `new()`; `pull_mixed` never
//! allocates.

use nativeaudio_dsp::{millibel_to_amplitude, ClipPolicy, Clipper};

use crate::source::{Source, SourceId, MAX_SOURCE_CHANNELS};

/// Slot bitmask width
pub const MAX_MIXER_SLOTS: usize = 64;

/// Result of one `pull_mixed` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixStats {
    /// Frames written to the bus
    pub frames: usize,
    /// Sources that were read
    pub active: usize,
    /// Samples that exceeded full scale before the clipping policy
    pub clipped: usize,
    ended: u64,
}

impl MixStats {
    pub fn any_ended(&self) -> bool {
        self.ended != 0
    }

    /// Slots whose source reached end of stream during this pull
    pub fn ended_slots(&self) -> impl Iterator<Item = usize> {
        let ended = self.ended;
        (0..MAX_MIXER_SLOTS).filter(move |slot| ended & (1u64 << slot) != 0)
    }
}

pub struct Mixer {
    slots: Vec<Option<Box<Source>>>,
    scratch: Vec<f32>,
    max_frames: usize,
    clipper: Clipper,
}

impl Mixer {
    pub fn new(max_sources: usize, max_frames: usize, policy: ClipPolicy) -> Self {
        let capacity = max_sources.clamp(1, MAX_MIXER_SLOTS);
        let max_frames = max_frames.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            scratch: vec![0.0; max_frames * MAX_SOURCE_CHANNELS],
            max_frames,
            clipper: Clipper::new(policy),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clip_policy(&self) -> ClipPolicy {
        self.clipper.policy()
    }

    /// Add a source to a free slot
    ///
    /// A full mixer or a duplicate id hands the source back.
    pub fn insert(&mut self, source: Box<Source>) -> Result<usize, Box<Source>> {
        if self.contains(source.id()) {
            return Err(source);
        }
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(source);
                Ok(slot)
            }
            None => Err(source),
        }
    }

    /// Take a source out of the mix. The caller decides where it is freed.
    pub fn remove(&mut self, id: SourceId) -> Option<Box<Source>> {
        self.slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|s| s.id() == id))
            .and_then(Option::take)
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.slots.iter().flatten().any(|s| s.id() == id)
    }

    pub fn source_mut(&mut self, id: SourceId) -> Option<&mut Source> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.id() == id)
            .map(|s| s.as_mut())
    }

    pub fn slot(&self, slot: usize) -> Option<&Source> {
        self.slots.get(slot).and_then(|s| s.as_deref())
    }

    pub fn sources_mut(&mut self) -> impl Iterator<Item = &mut Source> {
        self.slots.iter_mut().flatten().map(|s| s.as_mut())
    }

    /// Mix into a stereo interleaved buffer
    ///
    /// Buffers longer than the scratch capacity are mixed in several passes.
    ///
    /// # Real-time Safety
    /// No allocations, O(sources * frames).
    pub fn pull_mixed(&mut self, out: &mut [f32]) -> MixStats {
        let mut stats = MixStats::default();
        for chunk in out.chunks_mut(self.max_frames * 2) {
            let chunk_stats = self.mix_chunk(chunk);
            stats.frames += chunk_stats.frames;
            stats.active = stats.active.max(chunk_stats.active);
            stats.clipped += chunk_stats.clipped;
            stats.ended |= chunk_stats.ended;
        }
        stats
    }

    fn mix_chunk(&mut self, out: &mut [f32]) -> MixStats {
        out.fill(0.0);
        let frames = out.len() / 2;
        let mut stats = MixStats {
            frames,
            ..MixStats::default()
        };

        let any_solo = self
            .slots
            .iter()
            .flatten()
            .any(|s| s.controls().is_playing() && s.controls().is_solo());

        for (slot, entry) in self.slots.iter_mut().enumerate() {
            let Some(source) = entry.as_mut() else {
                continue;
            };
            if !source.controls().is_playing() {
                continue;
            }

            let channels = source.channels();
            let input = &mut self.scratch[..frames * channels];
            let result = source.read(input, frames);
            stats.active += 1;

            let controls = source.controls();
            if result.eof {
                controls.mark_ended();
                stats.ended |= 1u64 << slot;
            }

            if controls.is_muted() || (any_solo && !controls.is_solo()) {
                continue;
            }

            let amplitude = millibel_to_amplitude(controls.gain_millibel());
            let pan = controls.stereo_gains();

            if channels == 1 {
                if !controls.channel_audible(0) {
                    continue;
                }
                let gain_l = amplitude * pan.left;
                let gain_r = amplitude * pan.right;
                for (frame, sample) in out.chunks_exact_mut(2).zip(input.iter()) {
                    frame[0] += sample * gain_l;
                    frame[1] += sample * gain_r;
                }
            } else {
                let gain_l = if controls.channel_audible(0) {
                    amplitude * pan.left
                } else {
                    0.0
                };
                let gain_r = if controls.channel_audible(1) {
                    amplitude * pan.right
                } else {
                    0.0
                };
                for (frame, sample) in out.chunks_exact_mut(2).zip(input.chunks_exact(channels)) {
                    frame[0] += sample[0] * gain_l;
                    frame[1] += sample[1] * gain_r;
                }
            }
        }

        stats.clipped = self.clipper.process(out);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::source::SourceHandle;
    use nativeaudio_dsp::to_i16;

    fn constant(id: u64, value: f32, channels: usize, frames: usize) -> (Box<Source>, SourceHandle) {
        let pcm: Arc<[f32]> = vec![value; frames * channels].into();
        let (source, handle) = Source::asset(SourceId(id), pcm, channels);
        handle.set_playing(true);
        (Box::new(source), handle)
    }

    fn stereo(id: u64, left: f32, right: f32, frames: usize) -> (Box<Source>, SourceHandle) {
        let pcm: Arc<[f32]> = (0..frames).flat_map(|_| [left, right]).collect::<Vec<_>>().into();
        let (source, handle) = Source::asset(SourceId(id), pcm, 2);
        handle.set_playing(true);
        (Box::new(source), handle)
    }

    #[test]
    fn test_empty_mixer_is_silent() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let mut out = vec![1.0; 128];
        let stats = mixer.pull_mixed(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(stats.frames, 64);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_mono_source_feeds_both_sides() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (source, _handle) = constant(1, 0.25, 1, 64);
        mixer.insert(source).ok().unwrap();

        let mut out = vec![0.0; 32];
        mixer.pull_mixed(&mut out);
        assert!(out.iter().all(|s| (*s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn test_two_full_scale_sources_clamp_not_wrap() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (a, _ha) = constant(1, 1.0, 1, 64);
        let (b, _hb) = constant(2, 1.0, 1, 64);
        let (c, _hc) = constant(3, -1.0, 2, 64);
        let (d, _hd) = constant(4, -1.0, 2, 64);
        mixer.insert(a).ok().unwrap();
        mixer.insert(b).ok().unwrap();

        let mut out = vec![0.0; 64];
        let stats = mixer.pull_mixed(&mut out);
        assert_eq!(stats.clipped, 64);
        assert!(out.iter().all(|s| *s == 1.0));
        assert!(out.iter().all(|s| to_i16(*s) == i16::MAX));

        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        mixer.insert(c).ok().unwrap();
        mixer.insert(d).ok().unwrap();
        mixer.pull_mixed(&mut out);
        assert!(out.iter().all(|s| *s == -1.0));
        assert!(out.iter().all(|s| to_i16(*s) == -i16::MAX));
    }

    #[test]
    fn test_soft_knee_policy_stays_in_range() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::SoftKnee { threshold_db: -3.0 });
        let (a, _ha) = constant(1, 1.0, 1, 64);
        let (b, _hb) = constant(2, 1.0, 1, 64);
        mixer.insert(a).ok().unwrap();
        mixer.insert(b).ok().unwrap();

        let mut out = vec![0.0; 64];
        mixer.pull_mixed(&mut out);
        assert!(out.iter().all(|s| *s > 0.9 && *s <= 1.0));
    }

    #[test]
    fn test_channel_zero_solo_silences_channel_one() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (source, handle) = stereo(1, 0.5, 0.5, 64);
        mixer.insert(source).ok().unwrap();

        handle.set_channel_solo(0, true);
        let mut out = vec![0.0; 32];
        mixer.pull_mixed(&mut out);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame[0], 0.5);
            assert_eq!(frame[1], 0.0);
        }
    }

    #[test]
    fn test_channel_mute() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (source, handle) = stereo(1, 0.5, 0.25, 64);
        mixer.insert(source).ok().unwrap();

        handle.set_channel_mute(1, true);
        let mut out = vec![0.0; 16];
        mixer.pull_mixed(&mut out);
        for frame in out.chunks_exact(2) {
            assert_eq!(frame, [0.5, 0.0]);
        }
    }

    #[test]
    fn test_source_solo_silences_others_but_advances_them() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (a, ha) = constant(1, 0.25, 1, 1000);
        let (b, hb) = constant(2, 0.5, 1, 1000);
        mixer.insert(a).ok().unwrap();
        mixer.insert(b).ok().unwrap();

        hb.set_solo(true);
        let mut out = vec![0.0; 32];
        mixer.pull_mixed(&mut out);
        assert!(out.iter().all(|s| *s == 0.5));
        assert_eq!(ha.position(), 16);
        assert_eq!(hb.position(), 16);
    }

    #[test]
    fn test_muted_source_contributes_nothing() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (a, ha) = constant(1, 0.25, 1, 64);
        mixer.insert(a).ok().unwrap();
        ha.set_mute(true);

        let mut out = vec![0.0; 32];
        mixer.pull_mixed(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(ha.position(), 16);
    }

    #[test]
    fn test_volume_and_pan() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (a, ha) = constant(1, 1.0, 1, 64);
        mixer.insert(a).ok().unwrap();

        ha.set_volume(-600);
        ha.enable_stereo_position(true);
        ha.set_stereo_position(500);

        let mut out = vec![0.0; 4];
        mixer.pull_mixed(&mut out);
        let amp = millibel_to_amplitude(-600);
        assert!((out[0] - amp * 0.5).abs() < 1e-6);
        assert!((out[1] - amp).abs() < 1e-6);
    }

    #[test]
    fn test_end_of_stream_stops_source() {
        let mut mixer = Mixer::new(4, 64, ClipPolicy::HardClamp);
        let (a, ha) = constant(1, 0.5, 1, 10);
        ha.set_looping(false);
        let slot = mixer.insert(a).ok().unwrap();

        let mut out = vec![0.0; 32];
        let stats = mixer.pull_mixed(&mut out);
        assert!(stats.any_ended());
        assert_eq!(stats.ended_slots().collect::<Vec<_>>(), vec![slot]);
        assert!(!ha.is_playing());
        assert!(ha.controls().is_ended());
        assert_eq!(out[19], 0.5);
        assert_eq!(out[20], 0.0);

        let stats = mixer.pull_mixed(&mut out);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn test_large_buffer_mixed_in_chunks() {
        let mut mixer = Mixer::new(4, 16, ClipPolicy::HardClamp);
        let (a, ha) = constant(1, 0.5, 1, 4);
        mixer.insert(a).ok().unwrap();

        let mut out = vec![0.0; 200];
        let stats = mixer.pull_mixed(&mut out);
        assert_eq!(stats.frames, 100);
        assert!(out.iter().all(|s| *s == 0.5));
        assert_eq!(ha.position(), 100);
    }

    #[test]
    fn test_insert_remove() {
        let mut mixer = Mixer::new(2, 16, ClipPolicy::HardClamp);
        let (a, _) = constant(1, 0.5, 1, 4);
        let (b, _) = constant(2, 0.5, 1, 4);
        let (c, _) = constant(3, 0.5, 1, 4);
        let (dup, _) = constant(1, 0.5, 1, 4);

        assert!(mixer.insert(a).is_ok());
        assert!(mixer.insert(dup).is_err());
        assert!(mixer.insert(b).is_ok());
        assert!(mixer.insert(c).is_err());
        assert_eq!(mixer.len(), 2);

        let removed = mixer.remove(SourceId(1)).unwrap();
        assert_eq!(removed.id(), SourceId(1));
        assert!(mixer.remove(SourceId(1)).is_none());
        assert_eq!(mixer.len(), 1);
        assert!(mixer.source_mut(SourceId(2)).is_some());
    }
}
