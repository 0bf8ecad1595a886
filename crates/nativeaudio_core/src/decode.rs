//! Decoding
//!
//! Compressed assets and URI streams are decoded with symphonia. Assets are
//! decoded and resampled in one go when the player is created; URI streams
//! get a `DecodeWorker` thread that keeps a lock-free ring topped up for the
//! output callback.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use rtrb::Producer;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, error, info, warn};

use nativeaudio_dsp::{resample_interleaved, StreamResampler};

use crate::error::{EngineError, EngineResult};
use crate::message::Event;
use crate::source::{SourceControls, StreamStatus, MAX_SOURCE_CHANNELS};

/// Worker sleep while the ring is full or the stream has ended
const IDLE_WAIT: Duration = Duration::from_millis(2);

/// Symphonia-backed file decoder producing interleaved f32
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    path: PathBuf,
}

impl AudioDecoder {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| EngineError::Decode(format!("{}: {}", path.display(), e)))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| EngineError::Decode(format!("{}: no audio track", path.display())))?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            EngineError::Decode(format!("{}: unknown sample rate", path.display()))
        })?;
        let channels = track.codec_params.channels.map_or(2, |c| c.count()).max(1);

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::Decode(format!("{}: {}", path.display(), e)))?;

        debug!(
            "Opened {}: track={}, {}Hz, {} channels",
            path.display(),
            track_id,
            sample_rate,
            channels
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channels in the file
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Channels after folding (mono stays mono, wider becomes stereo)
    pub fn output_channels(&self) -> usize {
        self.channels.min(MAX_SOURCE_CHANNELS)
    }

    /// Decode the next packet, folded to `output_channels()`
    ///
    /// Corrupt packets are skipped. `None` at end of stream.
    pub fn decode_next(&mut self) -> EngineResult<Option<Vec<f32>>> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(None);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(None),
                Err(e) => {
                    return Err(EngineError::Decode(format!("read packet: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buffer.copy_interleaved_ref(decoded);
                    let from = spec.channels.count().max(1);
                    return Ok(Some(fold_channels(
                        buffer.samples(),
                        from,
                        self.output_channels(),
                    )));
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Decode error in {} (skipping): {}", self.path.display(), e);
                }
                Err(e) => return Err(EngineError::Decode(format!("decode: {}", e))),
            }
        }
    }

    /// Decode everything that is left
    pub fn decode_all(&mut self) -> EngineResult<Vec<f32>> {
        let mut samples = Vec::new();
        while let Some(packet) = self.decode_next()? {
            samples.extend_from_slice(&packet);
        }
        Ok(samples)
    }
}

/// Keep the first `to` channels of each frame, repeating the last channel
/// when the input is narrower
fn fold_channels(samples: &[f32], from: usize, to: usize) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        for channel in 0..to {
            out.push(frame[channel.min(from - 1)]);
        }
    }
    out
}

/// Map a URI to a local file
///
/// `file://` URIs and plain paths are accepted; any other scheme is refused.
pub fn resolve_uri(uri: &str) -> EngineResult<PathBuf> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(EngineError::UnsupportedUri(uri.to_string()));
    }
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(PathBuf::from(path));
    }
    if uri.contains("://") {
        return Err(EngineError::UnsupportedUri(uri.to_string()));
    }
    Ok(PathBuf::from(uri))
}

/// Decode a whole file and convert it to `rate`
///
/// Returns interleaved samples and their channel count.
pub fn decode_to_rate(path: &Path, rate: u32) -> EngineResult<(Vec<f32>, usize)> {
    let mut decoder = AudioDecoder::open(path)?;
    let channels = decoder.output_channels();
    let samples = decoder.decode_all()?;
    let samples = resample_interleaved(&samples, channels, decoder.sample_rate(), rate)?;
    info!(
        "Decoded {}: {} frames at {}Hz",
        path.display(),
        samples.len() / channels,
        rate
    );
    Ok((samples, channels))
}

/// Background decoder feeding one URI stream
pub struct DecodeWorker {
    status: Arc<StreamStatus>,
    thread: Option<JoinHandle<()>>,
}

impl DecodeWorker {
    pub fn spawn(
        decoder: AudioDecoder,
        target_rate: u32,
        producer: Producer<f32>,
        controls: Arc<SourceControls>,
        status: Arc<StreamStatus>,
        events: Sender<Event>,
    ) -> EngineResult<Self> {
        let channels = decoder.output_channels();
        let resampler = StreamResampler::new(decoder.sample_rate(), target_rate, channels)?;

        let mut job = DecodeJob {
            decoder,
            resampler,
            producer,
            controls,
            status: Arc::clone(&status),
            events,
            channels,
            pending: Vec::new(),
            pending_pos: 0,
            finished: false,
        };

        let thread = thread::Builder::new()
            .name("nativeaudio-decode".to_string())
            .spawn(move || job.run())
            .map_err(EngineError::Io)?;

        Ok(Self {
            status,
            thread: Some(thread),
        })
    }

    pub fn status(&self) -> &StreamStatus {
        &self.status
    }

    /// Ask the thread to exit without waiting
    pub fn stop(&self) {
        self.status.shutdown.store(true, Ordering::Release);
    }

    /// Stop and wait for the thread
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Decode thread panicked");
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct DecodeJob {
    decoder: AudioDecoder,
    resampler: StreamResampler,
    producer: Producer<f32>,
    controls: Arc<SourceControls>,
    status: Arc<StreamStatus>,
    events: Sender<Event>,
    channels: usize,
    /// Resampled samples not yet in the ring
    pending: Vec<f32>,
    pending_pos: usize,
    /// Reached end of file without looping
    finished: bool,
}

impl DecodeJob {
    fn run(&mut self) {
        debug!("Decode thread started for {}", self.decoder.path().display());

        while !self.status.shutdown.load(Ordering::Acquire) {
            if self.status.restart.swap(false, Ordering::AcqRel) {
                if let Err(e) = self.rewind() {
                    self.fail(e);
                }
            }

            if self.pending_pos < self.pending.len() {
                if !self.push_pending() {
                    thread::sleep(IDLE_WAIT);
                }
                continue;
            }

            if self.finished {
                self.status.done.store(true, Ordering::Release);
                thread::sleep(IDLE_WAIT);
                continue;
            }

            if let Err(e) = self.decode_step() {
                self.fail(e);
            }
        }

        debug!("Decode thread exiting for {}", self.decoder.path().display());
    }

    fn decode_step(&mut self) -> EngineResult<()> {
        match self.decoder.decode_next()? {
            Some(samples) => {
                let resampled = self.resampler.process(&samples)?;
                self.set_pending(resampled);
            }
            None => {
                let tail = self.resampler.flush()?;
                self.set_pending(tail);
                if self.controls.is_looping() {
                    self.reopen()?;
                } else {
                    self.finished = true;
                }
            }
        }
        Ok(())
    }

    fn set_pending(&mut self, samples: Vec<f32>) {
        self.pending = samples;
        self.pending_pos = 0;
    }

    /// Push whole frames into the ring. False when nothing fit.
    fn push_pending(&mut self) -> bool {
        let remaining = self.pending.len() - self.pending_pos;
        let room = self.producer.slots() / self.channels * self.channels;
        let n = remaining.min(room);
        if n == 0 {
            return false;
        }

        match self.producer.write_chunk_uninit(n) {
            Ok(chunk) => {
                let source = &self.pending[self.pending_pos..self.pending_pos + n];
                let written = chunk.fill_from_iter(source.iter().copied());
                self.pending_pos += written;
                written > 0
            }
            Err(_) => false,
        }
    }

    fn reopen(&mut self) -> EngineResult<()> {
        let path = self.decoder.path().to_path_buf();
        self.decoder = AudioDecoder::open(&path)?;
        self.resampler.reset();
        debug!("Decoder reopened {}", path.display());
        Ok(())
    }

    /// Start over after the source was replayed
    fn rewind(&mut self) -> EngineResult<()> {
        self.set_pending(Vec::new());
        self.finished = false;
        self.status.done.store(false, Ordering::Release);
        self.reopen()
    }

    fn fail(&mut self, err: EngineError) {
        error!("URI stream failed: {}", err);
        let _ = self.events.try_send(Event::error(&err));
        self.status.failed.store(true, Ordering::Release);
        self.set_pending(Vec::new());
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use rtrb::RingBuffer;

    fn write_wav(path: &Path, channels: u16, rate: u32, frames: usize, value: i16) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames * channels as usize {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_decode_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 2, 44100, 2000, 16384);

        let mut decoder = AudioDecoder::open(&path).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.output_channels(), 2);

        let samples = decoder.decode_all().unwrap();
        assert_eq!(samples.len(), 4000);
        assert!(samples.iter().all(|s| (*s - 0.5).abs() < 1e-3));
    }

    #[test]
    fn test_decode_to_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        write_wav(&path, 1, 24000, 2400, 8192);

        let (samples, channels) = decode_to_rate(&path, 48000).unwrap();
        assert_eq!(channels, 1);
        assert_eq!(samples.len(), 4800);
    }

    #[test]
    fn test_open_missing_file() {
        let result = AudioDecoder::open(Path::new("/nonexistent/audio.wav"));
        assert!(matches!(result, Err(EngineError::Io(_))));
    }

    #[test]
    fn test_open_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noise.mp3");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(matches!(AudioDecoder::open(&path), Err(EngineError::Decode(_))));
    }

    #[test]
    fn test_fold_channels() {
        let quad = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        assert_eq!(fold_channels(&quad, 4, 2), vec![1.0, 2.0, 5.0, 6.0]);
        assert_eq!(fold_channels(&[1.0, 2.0], 1, 2), vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(fold_channels(&[1.0, 2.0], 2, 2), vec![1.0, 2.0]);
    }

    #[test]
    fn test_resolve_uri() {
        assert_eq!(
            resolve_uri("file:///music/song.ogg").unwrap(),
            PathBuf::from("/music/song.ogg")
        );
        assert_eq!(resolve_uri("clips/a.wav").unwrap(), PathBuf::from("clips/a.wav"));
        assert!(matches!(
            resolve_uri("http://example.com/stream.mp3"),
            Err(EngineError::UnsupportedUri(_))
        ));
        assert!(resolve_uri("  ").is_err());
    }

    #[test]
    fn test_worker_fills_ring_then_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.wav");
        write_wav(&path, 1, 48000, 1000, 16384);

        let decoder = AudioDecoder::open(&path).unwrap();
        let (producer, consumer) = RingBuffer::new(4096);
        let controls = Arc::new(SourceControls::new(false));
        let status = Arc::new(StreamStatus::default());
        let (events, _rx) = crossbeam_channel::unbounded();

        let worker =
            DecodeWorker::spawn(decoder, 48000, producer, controls, Arc::clone(&status), events)
                .unwrap();

        assert!(wait_for(Duration::from_secs(5), || status.is_done()));
        assert_eq!(consumer.slots(), 1000);
        assert!(!status.has_failed());
        worker.join();
    }

    #[test]
    fn test_looping_worker_keeps_ring_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        write_wav(&path, 1, 48000, 300, 16384);

        let decoder = AudioDecoder::open(&path).unwrap();
        let (producer, consumer) = RingBuffer::new(2048);
        let controls = Arc::new(SourceControls::new(true));
        let status = Arc::new(StreamStatus::default());
        let (events, _rx) = crossbeam_channel::unbounded();

        let worker =
            DecodeWorker::spawn(decoder, 48000, producer, controls, Arc::clone(&status), events)
                .unwrap();

        assert!(wait_for(Duration::from_secs(5), || consumer.slots() == 2048));
        assert!(!status.is_done());
        worker.stop();
        worker.join();
    }
}
