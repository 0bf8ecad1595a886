//! Engine and Stream Configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use nativeaudio_dsp::{find_preset, ClipPolicy, ReverbSettings, DEFAULT_CROSSFADE_MS, DEFAULT_PRESET};

use crate::error::{EngineError, EngineResult};

/// Audio stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,

    /// Number of audio channels (1 = mono, 2 = stereo)
    pub channels: u16,

    /// Buffer size in frames (lower = less latency, higher = more stability)
    pub buffer_size: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            buffer_size: 512,
        }
    }
}

impl StreamConfig {
    /// Calculate latency in milliseconds for this configuration
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size as f32 / self.sample_rate as f32) * 1000.0
    }

    /// Samples in one interleaved buffer
    pub fn samples_per_buffer(&self) -> usize {
        self.buffer_size as usize * self.channels as usize
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate < 8000 || self.sample_rate > 192000 {
            return Err(format!("Invalid sample rate: {}", self.sample_rate));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("Invalid channel count: {}", self.channels));
        }
        if self.buffer_size < 32 || self.buffer_size > 8192 {
            return Err(format!("Invalid buffer size: {}", self.buffer_size));
        }
        Ok(())
    }
}

/// Capture path configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Rate the finished recording is stored at
    pub sample_rate: u32,

    /// Capture stops automatically after this many seconds
    pub max_seconds: f32,

    /// Also write each recording to a WAV file
    #[serde(default)]
    pub save_wav: bool,

    /// Where WAV files go (defaults to the platform data dir)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            max_seconds: 5.0,
            save_wav: false,
            output_dir: None,
        }
    }
}

impl RecorderConfig {
    /// Recording length in frames at the storage rate
    pub fn max_frames(&self) -> usize {
        (self.sample_rate as f32 * self.max_seconds) as usize
    }
}

/// Serializable form of the bus clipping policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum ClipPolicyConfig {
    HardClamp,
    SoftKnee { threshold_db: f32 },
}

impl Default for ClipPolicyConfig {
    fn default() -> Self {
        ClipPolicyConfig::HardClamp
    }
}

impl From<ClipPolicyConfig> for ClipPolicy {
    fn from(config: ClipPolicyConfig) -> Self {
        match config {
            ClipPolicyConfig::HardClamp => ClipPolicy::HardClamp,
            ClipPolicyConfig::SoftKnee { threshold_db } => ClipPolicy::SoftKnee { threshold_db },
        }
    }
}

/// Mixer/bus configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixerConfig {
    /// Number of source slots allocated up front
    pub max_sources: usize,

    pub clip_policy: ClipPolicyConfig,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            max_sources: 8,
            clip_policy: ClipPolicyConfig::default(),
        }
    }
}

/// Reverb send configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectConfig {
    /// Name of a built-in reverb preset
    pub preset: String,

    /// Crossfade when toggling the effect
    pub crossfade_ms: f32,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            preset: DEFAULT_PRESET.to_string(),
            crossfade_ms: DEFAULT_CROSSFADE_MS,
        }
    }
}

impl EffectConfig {
    pub fn reverb_settings(&self) -> EngineResult<ReverbSettings> {
        Ok(find_preset(&self.preset)?)
    }
}

/// Overall engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Output stream configuration (fallback when the host reports nothing)
    pub stream: StreamConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,

    #[serde(default)]
    pub mixer: MixerConfig,

    #[serde(default)]
    pub effect: EffectConfig,

    /// Capacity of the UI -> callback command queue
    pub command_queue_capacity: usize,

    /// Capacity of the callback -> UI event channel
    pub event_queue_capacity: usize,

    /// Decoded frames buffered ahead for each URI stream
    pub decode_ring_frames: usize,

    /// Longest wait for the callback to acknowledge a stop
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            recorder: RecorderConfig::default(),
            mixer: MixerConfig::default(),
            effect: EffectConfig::default(),
            command_queue_capacity: 64,
            event_queue_capacity: 256,
            decode_ring_frames: 16384,
            shutdown_timeout_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Create config optimized for low latency
    pub fn low_latency() -> Self {
        Self {
            stream: StreamConfig {
                sample_rate: 48000,
                channels: 2,
                buffer_size: 128, // ~2.6ms latency
            },
            decode_ring_frames: 8192,
            ..Self::default()
        }
    }

    /// Create config optimized for stability
    pub fn stable() -> Self {
        Self {
            stream: StreamConfig {
                sample_rate: 48000,
                channels: 2,
                buffer_size: 1024, // ~21ms latency
            },
            decode_ring_frames: 32768,
            ..Self::default()
        }
    }

    /// Validate every section
    pub fn validate(&self) -> EngineResult<()> {
        self.stream.validate().map_err(EngineError::ConfigError)?;

        if !(4000..=48000).contains(&self.recorder.sample_rate) {
            return Err(EngineError::ConfigError(format!(
                "Invalid recorder sample rate: {}",
                self.recorder.sample_rate
            )));
        }
        if !(self.recorder.max_seconds > 0.0 && self.recorder.max_seconds <= 600.0) {
            return Err(EngineError::ConfigError(format!(
                "Invalid recording length: {}s",
                self.recorder.max_seconds
            )));
        }
        if self.mixer.max_sources == 0 || self.mixer.max_sources > 64 {
            return Err(EngineError::ConfigError(format!(
                "Invalid mixer size: {}",
                self.mixer.max_sources
            )));
        }
        if self.command_queue_capacity < 8 {
            return Err(EngineError::ConfigError(format!(
                "Command queue too small: {}",
                self.command_queue_capacity
            )));
        }
        if self.event_queue_capacity == 0 {
            return Err(EngineError::ConfigError(
                "Event queue capacity must be positive".to_string(),
            ));
        }
        if self.decode_ring_frames < self.stream.buffer_size as usize * 2 {
            return Err(EngineError::ConfigError(format!(
                "Decode ring ({} frames) must hold at least two buffers",
                self.decode_ring_frames
            )));
        }
        if self.effect.crossfade_ms < 0.0 {
            return Err(EngineError::ConfigError(format!(
                "Invalid crossfade: {}ms",
                self.effect.crossfade_ms
            )));
        }
        self.effect.reverb_settings()?;
        Ok(())
    }

    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> EngineResult<Self> {
        let file = fs::File::open(path)?;
        let config: EngineConfig = serde_json::from_reader(file)?;
        config.validate()?;
        info!("Engine config loaded from {:?}", path);
        Ok(config)
    }

    /// Write this config as pretty JSON
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        info!("Engine config saved to {:?}", path);
        Ok(())
    }
}
