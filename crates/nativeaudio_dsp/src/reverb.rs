//! Stereo Reverb
//!
//! Schroeder/Moorer network in the Freeverb arrangement: eight damped comb
//! filters in parallel feeding four allpass filters in series, per channel.
//! The right channel uses slightly longer delay lines so the two sides
//! decorrelate. A BiQuad low-pass on the wet output sets the tone.
//!
//! All delay lines are allocated in `new()`; processing never allocates.

use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type, Q_BUTTERWORTH_F32};

use crate::error::DspError;
use crate::processor::{AudioProcessor, ProcessContext};

/// Delay lengths tuned at 44.1 kHz, scaled to the actual sample rate
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const TUNING_RATE: f32 = 44100.0;

const FIXED_GAIN: f32 = 0.015;
const ALLPASS_FEEDBACK: f32 = 0.5;

/// Reverb parameters, all normalized to 0.0 - 1.0 except `tone_hz`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbSettings {
    /// Decay length
    pub room_size: f32,
    /// High-frequency absorption inside the tank
    pub damping: f32,
    /// Level of the reverb return
    pub wet_level: f32,
    /// Cutoff of the wet low-pass
    pub tone_hz: f32,
}

impl Default for ReverbSettings {
    fn default() -> Self {
        crate::presets::REVERB_PRESETS[0].1
    }
}

struct Comb {
    buffer: Vec<f32>,
    index: usize,
    filter_store: f32,
}

impl Comb {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - damp) + self.filter_store * damp;
        self.buffer[self.index] = input + self.filter_store * feedback;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.filter_store = 0.0;
        self.index = 0;
    }
}

struct Allpass {
    buffer: Vec<f32>,
    index: usize,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.index];
        let output = delayed - input;
        self.buffer[self.index] = input + delayed * ALLPASS_FEEDBACK;
        self.index += 1;
        if self.index == self.buffer.len() {
            self.index = 0;
        }
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// One side of the tank
struct Tank {
    combs: Vec<Comb>,
    allpasses: Vec<Allpass>,
    tone: DirectForm2Transposed<f32>,
}

impl Tank {
    fn new(sample_rate: f32, offset: usize, tone: Coefficients<f32>) -> Self {
        let scale = sample_rate / TUNING_RATE;
        let scaled = |len: usize| ((len + offset) as f32 * scale) as usize;
        Self {
            combs: COMB_TUNING.iter().map(|&len| Comb::new(scaled(len))).collect(),
            allpasses: ALLPASS_TUNING.iter().map(|&len| Allpass::new(scaled(len))).collect(),
            tone: DirectForm2Transposed::<f32>::new(tone),
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damp: f32) -> f32 {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input, feedback, damp);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        self.tone.run(out)
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(Comb::clear);
        self.allpasses.iter_mut().for_each(Allpass::clear);
        self.tone.reset_state();
    }
}

/// Stereo reverb producing the wet return for a dry input
pub struct Reverb {
    left: Tank,
    right: Tank,
    settings: ReverbSettings,
    sample_rate: f32,
    feedback: f32,
    damp: f32,
}

impl Reverb {
    pub fn new(sample_rate: f32, settings: ReverbSettings) -> Result<Self, DspError> {
        ProcessContext::new(sample_rate, 2, 0).validate()?;
        let tone = tone_coefficients(sample_rate, settings.tone_hz)?;

        let mut reverb = Self {
            left: Tank::new(sample_rate, 0, tone),
            right: Tank::new(sample_rate, STEREO_SPREAD, tone),
            settings,
            sample_rate,
            feedback: 0.0,
            damp: 0.0,
        };
        reverb.update_internals();
        Ok(reverb)
    }

    pub fn settings(&self) -> ReverbSettings {
        self.settings
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Change parameters. Not real-time safe if the tone changes
    /// (coefficient computation), call from the control side.
    pub fn set_settings(&mut self, settings: ReverbSettings) -> Result<(), DspError> {
        let tone = tone_coefficients(self.sample_rate, settings.tone_hz)?;
        self.left.tone.update_coefficients(tone);
        self.right.tone.update_coefficients(tone);
        self.settings = settings;
        self.update_internals();
        Ok(())
    }

    fn update_internals(&mut self) {
        self.feedback = self.settings.room_size.clamp(0.0, 1.0) * 0.28 + 0.7;
        self.damp = self.settings.damping.clamp(0.0, 1.0) * 0.4;
    }

    /// Wet return for one stereo frame, already scaled by `wet_level`
    #[inline]
    pub fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * FIXED_GAIN;
        let wet = self.settings.wet_level;
        (
            self.left.process(input, self.feedback, self.damp) * wet,
            self.right.process(input, self.feedback, self.damp) * wet,
        )
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

impl AudioProcessor for Reverb {
    /// Adds the wet return to the buffer (effect send at unity level)
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext) {
        match context.channels {
            1 => {
                for sample in buffer.iter_mut() {
                    let (wl, wr) = self.process_frame(*sample, *sample);
                    *sample += 0.5 * (wl + wr);
                }
            }
            channels => {
                for frame in buffer.chunks_exact_mut(channels) {
                    let (wl, wr) = self.process_frame(frame[0], frame[1]);
                    frame[0] += wl;
                    frame[1] += wr;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.clear();
    }

    fn name(&self) -> &'static str {
        "Reverb"
    }
}

fn tone_coefficients(sample_rate: f32, tone_hz: f32) -> Result<Coefficients<f32>, DspError> {
    // Keep the cutoff safely below Nyquist
    let cutoff = tone_hz.clamp(20.0, sample_rate * 0.45);
    Coefficients::<f32>::from_params(Type::LowPass, sample_rate.hz(), cutoff.hz(), Q_BUTTERWORTH_F32)
        .map_err(|_| DspError::InvalidCoefficients {
            frequency: cutoff,
            sample_rate,
        })
}
