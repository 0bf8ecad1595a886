//! Engine Error Types

use thiserror::Error;

/// Errors that can occur in the audio engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No audio devices found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to play audio stream: {0}")]
    StreamPlayError(String),

    #[error("Stream configuration error: {0}")]
    ConfigError(String),

    #[error("Operation '{operation}' not allowed while engine is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Output sink has not been created")]
    NoOutput,

    #[error("Output sink already created")]
    OutputExists,

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("Invalid asset name: {0}")]
    InvalidAssetName(String),

    #[error("Unsupported URI: {0}")]
    UnsupportedUri(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Recorder has not been created")]
    NoRecorder,

    #[error("Recorder busy - a recording is already in progress")]
    RecorderBusy,

    #[error("Engine busy - a clip is still queued or a recording is running")]
    EngineBusy,

    #[error("No recording available for playback")]
    NoRecording,

    #[error("Unknown clip: {0}")]
    InvalidClip(i32),

    #[error("Mixer is full ({0} sources)")]
    MixerFull(usize),

    #[error("Command queue full - audio callback not draining")]
    CommandQueueFull,

    #[error("Shutdown timed out waiting for audio callback")]
    ShutdownTimeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Config file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("DSP error: {0}")]
    DspError(#[from] nativeaudio_dsp::DspError),

    #[error("Channel send error - receiver dropped")]
    ChannelSendError,
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
