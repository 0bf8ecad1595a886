//! Audio Processor Trait
//!
//! Defines the interface for insert processors applied to the mixed bus.

use crate::error::DspError;

/// Context passed to processors containing stream metadata
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext {
    pub sample_rate: f32,
    pub channels: usize,
    pub buffer_size: usize,
}

impl ProcessContext {
    pub fn new(sample_rate: f32, channels: usize, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            channels,
            buffer_size,
        }
    }

    /// Check that a processor can be built for this context
    pub fn validate(&self) -> Result<(), DspError> {
        if !(self.sample_rate > 0.0) {
            return Err(DspError::InvalidSampleRate(self.sample_rate));
        }
        if self.channels == 0 {
            return Err(DspError::InvalidChannelCount(self.channels));
        }
        Ok(())
    }

    /// Number of frames in an interleaved buffer of `len` samples
    #[inline]
    pub fn frames_in(&self, len: usize) -> usize {
        len / self.channels.max(1)
    }
}

/// Trait for audio processors on the output path
///
/// # Real-time Safety Contract
///
/// Implementors MUST follow these rules in `process()`:
/// - NO heap allocations (no Vec::push, no Box::new, no String)
/// - NO syscalls (no file I/O, no network, no mutex locks)
/// - NO unbounded loops
/// - Constant or O(n) time complexity where n = buffer size
///
/// Violating these rules causes audio dropouts ("glitches").
pub trait AudioProcessor: Send {
    /// Process audio buffer in-place
    ///
    /// Buffer format is interleaved: [L0, R0, L1, R1, ...]
    fn process(&mut self, buffer: &mut [f32], context: &ProcessContext);

    /// Reset internal state (delay lines, envelopes, etc.)
    fn reset(&mut self);

    /// Human-readable name for debugging/UI
    fn name(&self) -> &'static str;
}
