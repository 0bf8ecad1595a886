//! DSP Error Types

use thiserror::Error;

/// Errors that can occur during DSP operations
#[derive(Error, Debug)]
pub enum DspError {
    #[error("Sample rate must be positive, got {0}")]
    InvalidSampleRate(f32),

    #[error("Channel count must be 1 or more, got {0}")]
    InvalidChannelCount(usize),

    #[error("Invalid filter coefficients for frequency {frequency}Hz at sample rate {sample_rate}Hz")]
    InvalidCoefficients { frequency: f32, sample_rate: f32 },

    #[error("Unknown reverb preset: {0}")]
    UnknownPreset(String),

    #[error("Resampler error: {0}")]
    Resample(String),
}
