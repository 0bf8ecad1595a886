//! nativeaudio DSP - Digital Signal Processing Module
//!
//! This crate provides the signal processing used by the nativeaudio engine:
//! - Millibel/permille unit conversion for volume and stereo position
//! - Clipping policy for the mix bus
//! - Freeverb-style reverb with a BiQuad tone filter
//! - Effect stage with click-free enable/disable
//! - Sample-rate conversion for decoded and recorded audio
//!
//! # Architecture
//!
//! Everything reachable from `AudioProcessor::process` and `Clipper::process`
//! follows the "no allocation in audio callback" rule. Parameters change
//! through atomics between buffer processing calls. The resampler is the
//! exception and only runs on worker threads.

mod clip;
mod effect;
mod error;
mod gain;
mod presets;
mod processor;
mod resample;
mod reverb;

pub use clip::{to_i16, ClipPolicy, Clipper};
pub use effect::{EffectHandle, EffectStage, DEFAULT_CROSSFADE_MS};
pub use error::DspError;
pub use gain::{
    clamp_millibel, millibel_to_amplitude, StereoGains, MAX_VOLUME_MILLIBEL, MILLIBEL_MIN,
    PERMILLE_MAX,
};
pub use presets::{find_preset, Preset, DEFAULT_PRESET, REVERB_PRESETS};
pub use processor::{AudioProcessor, ProcessContext};
pub use resample::{resample_interleaved, StreamResampler};
pub use reverb::{Reverb, ReverbSettings};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        // Verify all public types are accessible
        let _clipper = Clipper::default();
        let _stage = EffectStage::new(48000.0, ReverbSettings::default(), DEFAULT_CROSSFADE_MS)
            .unwrap();
        let _gains = StereoGains::from_permille(0);
    }
}
