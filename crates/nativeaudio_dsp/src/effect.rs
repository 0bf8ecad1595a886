//! Effect Stage
//!
//! Reverb applied to the mixed bus as an additive send:
//!
//! ```text
//! out = dry + ramp * wet(dry)
//! ```
//!
//! The control side flips an atomic flag; the audio callback reads it once
//! per block and moves `ramp` linearly toward 0 or 1 over the crossfade, so
//! toggling never produces a step in the output. With the ramp at rest on 0
//! the stage is an exact passthrough and the reverb tank is emptied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};
use crate::reverb::{Reverb, ReverbSettings};

/// Default crossfade length when toggling the effect
pub const DEFAULT_CROSSFADE_MS: f32 = 10.0;

#[derive(Debug, Default)]
struct EffectFlags {
    enabled: AtomicBool,
    forced_bypass: AtomicBool,
}

/// Control-side handle, safe to clone and use from any thread
#[derive(Debug, Clone)]
pub struct EffectHandle {
    flags: Arc<EffectFlags>,
}

impl EffectHandle {
    /// Request the effect on or off. Takes effect at the next block.
    pub fn set_enabled(&self, enabled: bool) {
        self.flags.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::Acquire)
    }

    /// Force the dry path regardless of the enable flag (engine pause)
    pub fn set_forced_bypass(&self, bypass: bool) {
        self.flags.forced_bypass.store(bypass, Ordering::Release);
    }

    pub fn is_forced_bypass(&self) -> bool {
        self.flags.forced_bypass.load(Ordering::Acquire)
    }
}

/// Reverb send with click-free enable/disable
pub struct EffectStage {
    reverb: Reverb,
    flags: Arc<EffectFlags>,
    ramp: f32,
    ramp_step: f32,
    crossfade_frames: usize,
    /// The tank may hold signal and must be cleared before the next enable
    tail_dirty: bool,
}

impl EffectStage {
    pub fn new(
        sample_rate: f32,
        settings: ReverbSettings,
        crossfade_ms: f32,
    ) -> Result<Self, DspError> {
        let reverb = Reverb::new(sample_rate, settings)?;
        let crossfade_frames = ((sample_rate * crossfade_ms.max(0.0) / 1000.0) as usize).max(1);

        Ok(Self {
            reverb,
            flags: Arc::new(EffectFlags::default()),
            ramp: 0.0,
            ramp_step: 1.0 / crossfade_frames as f32,
            crossfade_frames,
            tail_dirty: false,
        })
    }

    pub fn handle(&self) -> EffectHandle {
        EffectHandle {
            flags: Arc::clone(&self.flags),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.flags.enabled.store(enabled, Ordering::Release);
    }

    pub fn set_forced_bypass(&self, bypass: bool) {
        self.flags.forced_bypass.store(bypass, Ordering::Release);
    }

    /// Current wet gain, 0.0 (dry) to 1.0 (full send)
    pub fn ramp(&self) -> f32 {
        self.ramp
    }

    pub fn crossfade_frames(&self) -> usize {
        self.crossfade_frames
    }

    /// True when the stage currently leaves the buffer untouched
    pub fn is_passthrough(&self) -> bool {
        self.ramp == 0.0 && self.target() == 0.0
    }

    pub fn settings(&self) -> ReverbSettings {
        self.reverb.settings()
    }

    /// Not real-time safe, see `Reverb::set_settings`
    pub fn set_settings(&mut self, settings: ReverbSettings) -> Result<(), DspError> {
        self.reverb.set_settings(settings)
    }

    #[inline]
    fn target(&self) -> f32 {
        let enabled = self.flags.enabled.load(Ordering::Acquire);
        let bypass = self.flags.forced_bypass.load(Ordering::Acquire);
        if enabled && !bypass {
            1.0
        } else {
            0.0
        }
    }

    #[inline]
    fn advance_ramp(&mut self, target: f32) {
        if self.ramp < target {
            self.ramp = (self.ramp + self.ramp_step).min(target);
        } else if self.ramp > target {
            self.ramp = (self.ramp - self.ramp_step).max(target);
        }
    }
}

impl AudioProcessor for EffectStage {
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        let target = self.target();

        if target == 0.0 && self.ramp == 0.0 {
            if self.tail_dirty {
                self.reverb.clear();
                self.tail_dirty = false;
            }
            return;
        }

        self.tail_dirty = true;
        let channels = context.channels.max(1);

        for frame in buffer.chunks_exact_mut(channels) {
            self.advance_ramp(target);

            if channels == 1 {
                let (wl, wr) = self.reverb.process_frame(frame[0], frame[0]);
                frame[0] += self.ramp * 0.5 * (wl + wr);
            } else {
                let (wl, wr) = self.reverb.process_frame(frame[0], frame[1]);
                frame[0] += self.ramp * wl;
                frame[1] += self.ramp * wr;
            }
        }
    }

    fn reset(&mut self) {
        self.reverb.clear();
        self.ramp = 0.0;
        self.tail_dirty = false;
    }

    fn name(&self) -> &'static str {
        "Reverb Send"
    }
}
