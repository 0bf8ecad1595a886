//! Generated Clip Set
//!
//! Short mono clips for the buffer-queue player. They are synthesized at
//! 8 kHz and converted to the output rate once, when the output sink opens.

use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use nativeaudio_dsp::resample_interleaved;

use crate::error::{EngineError, EngineResult};

/// Rate the built-in clips are synthesized at
pub const CLIP_SOURCE_RATE: u32 = 8000;

/// One second at the clip rate
pub const SAWTOOTH_FRAMES: usize = 8000;

/// Envelope attack/release so tones start and stop without clicks
const ENVELOPE_SECONDS: f32 = 0.01;

const TONE_AMPLITUDE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum Clip {
    None = 0,
    Hello = 1,
    Android = 2,
    Sawtooth = 3,
    /// The latest recording
    Playback = 4,
}

impl TryFrom<i32> for Clip {
    type Error = EngineError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Clip::None),
            1 => Ok(Clip::Hello),
            2 => Ok(Clip::Android),
            3 => Ok(Clip::Sawtooth),
            4 => Ok(Clip::Playback),
            other => Err(EngineError::InvalidClip(other)),
        }
    }
}

impl fmt::Display for Clip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Clip::None => "none",
            Clip::Hello => "hello",
            Clip::Android => "android",
            Clip::Sawtooth => "sawtooth",
            Clip::Playback => "playback",
        };
        f.write_str(name)
    }
}

/// Falling ramp from full scale, period 100 samples
pub fn sawtooth() -> Vec<f32> {
    (0..SAWTOOTH_FRAMES)
        .map(|i| {
            let value = 32768 - (i as i32 % 100) * 660;
            (value as f32 / 32768.0).min(1.0)
        })
        .collect()
}

/// Two rising notes
pub fn hello() -> Vec<f32> {
    tone_sequence(&[(440.0, 0.25), (660.0, 0.35)], CLIP_SOURCE_RATE)
}

/// C major arpeggio
pub fn android() -> Vec<f32> {
    tone_sequence(
        &[(523.25, 0.15), (659.25, 0.15), (783.99, 0.15)],
        CLIP_SOURCE_RATE,
    )
}

fn tone_sequence(notes: &[(f32, f32)], rate: u32) -> Vec<f32> {
    let rate = rate as f32;
    let ramp = ((ENVELOPE_SECONDS * rate) as usize).max(1);
    let mut out = Vec::new();

    for &(frequency, seconds) in notes {
        let frames = (seconds * rate).round() as usize;
        for n in 0..frames {
            let envelope = (n.min(frames - 1 - n).min(ramp) as f32) / ramp as f32;
            let phase = 2.0 * PI * frequency * n as f32 / rate;
            out.push(TONE_AMPLITUDE * envelope * phase.sin());
        }
    }
    out
}

/// Built-in clips converted to the output rate
#[derive(Debug, Clone)]
pub struct ClipLibrary {
    rate: u32,
    hello: Arc<[f32]>,
    android: Arc<[f32]>,
    sawtooth: Arc<[f32]>,
}

impl ClipLibrary {
    /// Convert the generated clips to `rate`. Not real-time safe.
    pub fn prepare(rate: u32) -> EngineResult<Self> {
        let convert = |pcm: Vec<f32>| -> EngineResult<Arc<[f32]>> {
            Ok(resample_interleaved(&pcm, 1, CLIP_SOURCE_RATE, rate)?.into())
        };

        let library = Self {
            rate,
            hello: convert(hello())?,
            android: convert(android())?,
            sawtooth: convert(sawtooth())?,
        };
        debug!(
            "Clip library prepared at {}Hz ({} / {} / {} frames)",
            rate,
            library.hello.len(),
            library.android.len(),
            library.sawtooth.len()
        );
        Ok(library)
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// PCM for a generated clip; `None` for `Clip::None` and `Clip::Playback`
    pub fn get(&self, clip: Clip) -> Option<Arc<[f32]>> {
        match clip {
            Clip::Hello => Some(Arc::clone(&self.hello)),
            Clip::Android => Some(Arc::clone(&self.android)),
            Clip::Sawtooth => Some(Arc::clone(&self.sawtooth)),
            Clip::None | Clip::Playback => None,
        }
    }

    /// Convert a mono recording to the output rate
    pub fn prepare_recording(&self, samples: &[f32], sample_rate: u32) -> EngineResult<Arc<[f32]>> {
        Ok(resample_interleaved(samples, 1, sample_rate, self.rate)?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_from_i32() {
        assert_eq!(Clip::try_from(0).unwrap(), Clip::None);
        assert_eq!(Clip::try_from(3).unwrap(), Clip::Sawtooth);
        assert_eq!(Clip::try_from(4).unwrap(), Clip::Playback);
        assert!(matches!(Clip::try_from(5), Err(EngineError::InvalidClip(5))));
        assert!(Clip::try_from(-1).is_err());
        assert_eq!(Clip::Hello as i32, 1);
    }

    #[test]
    fn test_sawtooth_shape() {
        let saw = sawtooth();
        assert_eq!(saw.len(), SAWTOOTH_FRAMES);
        assert_eq!(saw[0], 1.0);
        assert!((saw[1] - (32768.0 - 660.0) / 32768.0).abs() < 1e-6);
        assert!((saw[99] - (32768.0 - 99.0 * 660.0) / 32768.0).abs() < 1e-6);
        assert_eq!(saw[100], 1.0);
        assert!(saw.iter().all(|s| (-1.0..=1.0).contains(s)));
        // Strictly falling within each period
        assert!(saw[..100].windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_tones() {
        let hello = hello();
        assert_eq!(hello.len(), 2000 + 2800);
        assert_eq!(hello[0], 0.0);
        assert!(hello.iter().all(|s| s.abs() <= TONE_AMPLITUDE));

        let android = android();
        assert_eq!(android.len(), 3 * 1200);
        assert!(android.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_library_prepared_at_output_rate() {
        let library = ClipLibrary::prepare(48000).unwrap();
        assert_eq!(library.rate(), 48000);
        assert_eq!(library.get(Clip::Sawtooth).unwrap().len(), 48000);
        assert_eq!(library.get(Clip::Hello).unwrap().len(), 4800 * 6);
        assert!(library.get(Clip::None).is_none());
        assert!(library.get(Clip::Playback).is_none());
    }

    #[test]
    fn test_library_at_clip_rate_is_unchanged() {
        let library = ClipLibrary::prepare(CLIP_SOURCE_RATE).unwrap();
        assert_eq!(&library.get(Clip::Sawtooth).unwrap()[..], &sawtooth()[..]);
    }

    #[test]
    fn test_prepare_recording() {
        let library = ClipLibrary::prepare(48000).unwrap();
        let recording = vec![0.25; 16000];
        let pcm = library.prepare_recording(&recording, 16000).unwrap();
        assert_eq!(pcm.len(), 48000);
    }
}
