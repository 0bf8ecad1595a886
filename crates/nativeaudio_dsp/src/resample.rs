//! Sample-Rate Conversion
//!
//! Decoded assets, URI streams, generated clips and recordings all arrive at
//! their own rate and are converted to the mixer rate with rubato's FFT
//! resampler. Allocates freely: never call from a real-time thread.

use rubato::{FftFixedIn, Resampler};
use tracing::debug;

use crate::error::DspError;

const CHUNK_SIZE: usize = 1024;
const SUB_CHUNKS: usize = 2;

/// Chunked resampler over interleaved f32 data
pub struct StreamResampler {
    /// `None` when the rates match
    inner: Option<FftFixedIn<f32>>,
    from_rate: u32,
    to_rate: u32,
    channels: usize,
    /// Deinterleaved input waiting for a full chunk
    pending: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: usize) -> Result<Self, DspError> {
        if from_rate == 0 {
            return Err(DspError::InvalidSampleRate(from_rate as f32));
        }
        if to_rate == 0 {
            return Err(DspError::InvalidSampleRate(to_rate as f32));
        }
        if channels == 0 {
            return Err(DspError::InvalidChannelCount(channels));
        }

        let inner = if from_rate == to_rate {
            None
        } else {
            let resampler = FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                CHUNK_SIZE,
                SUB_CHUNKS,
                channels,
            )
            .map_err(|e| DspError::Resample(e.to_string()))?;
            debug!("Resampler created: {}Hz -> {}Hz, {} channels", from_rate, to_rate, channels);
            Some(resampler)
        };

        Ok(Self {
            inner,
            from_rate,
            to_rate,
            channels,
            pending: vec![Vec::with_capacity(CHUNK_SIZE); channels],
        })
    }

    pub fn needs_resampling(&self) -> bool {
        self.inner.is_some()
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Output frames of latency introduced by the filter
    pub fn output_delay(&self) -> usize {
        self.inner.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Feed interleaved samples, returning whatever full chunks produced
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, DspError> {
        if self.inner.is_none() {
            return Ok(input.to_vec());
        }

        for frame in input.chunks_exact(self.channels) {
            for (channel, sample) in self.pending.iter_mut().zip(frame) {
                channel.push(*sample);
            }
        }

        let mut output = Vec::new();
        while self.pending[0].len() >= CHUNK_SIZE {
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|channel| channel.drain(..CHUNK_SIZE).collect())
                .collect();
            let resampled = self.run(&chunk)?;
            interleave_into(&resampled, usize::MAX, &mut output);
        }

        Ok(output)
    }

    /// Push out the final partial chunk, padded with silence and trimmed to
    /// the proportional length
    pub fn flush(&mut self) -> Result<Vec<f32>, DspError> {
        let remaining = self.pending[0].len();
        if self.inner.is_none() || remaining == 0 {
            return Ok(Vec::new());
        }

        let chunk: Vec<Vec<f32>> = self
            .pending
            .iter_mut()
            .map(|channel| {
                let mut data = std::mem::take(channel);
                data.resize(CHUNK_SIZE, 0.0);
                data
            })
            .collect();

        let resampled = self.run(&chunk)?;
        let frames = scaled_frames(remaining, self.from_rate, self.to_rate);
        let mut output = Vec::with_capacity(frames * self.channels);
        interleave_into(&resampled, frames, &mut output);
        Ok(output)
    }

    pub fn reset(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
        }
        self.pending.iter_mut().for_each(Vec::clear);
    }

    fn run(&mut self, chunk: &[Vec<f32>]) -> Result<Vec<Vec<f32>>, DspError> {
        match self.inner.as_mut() {
            Some(inner) => inner
                .process(chunk, None)
                .map_err(|e| DspError::Resample(e.to_string())),
            None => Ok(chunk.to_vec()),
        }
    }
}

/// One-shot conversion of a whole interleaved buffer
///
/// The filter delay is removed so the output lines up with the input, and
/// the output holds exactly `ceil(frames * to / from)` frames.
pub fn resample_interleaved(
    input: &[f32],
    channels: usize,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, DspError> {
    let mut resampler = StreamResampler::new(from_rate, to_rate, channels)?;
    if !resampler.needs_resampling() {
        return Ok(input.to_vec());
    }

    let frames = input.len() / channels;
    let expected = scaled_frames(frames, from_rate, to_rate);
    let delay = resampler.output_delay();

    let mut output = resampler.process(&input[..frames * channels])?;
    let silence = vec![0.0; CHUNK_SIZE * channels];
    while output.len() / channels < delay + expected {
        output.extend(resampler.process(&silence)?);
    }

    output.drain(..delay * channels);
    output.truncate(expected * channels);
    Ok(output)
}

fn scaled_frames(frames: usize, from_rate: u32, to_rate: u32) -> usize {
    (frames as u64 * to_rate as u64).div_ceil(from_rate as u64) as usize
}

fn interleave_into(channels: &[Vec<f32>], max_frames: usize, output: &mut Vec<f32>) {
    let Some(first) = channels.first() else {
        return;
    };
    let frames = first.len().min(max_frames);
    for frame in 0..frames {
        for channel in channels {
            output.push(channel[frame]);
        }
    }
}
