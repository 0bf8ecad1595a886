//! nativeaudio Core - Audio Engine
//!
//! This crate provides the engine behind the nativeaudio player, including:
//! - Buffer-queue, asset and URI players mixed on one output bus
//! - Reverb send with click-free enable/disable
//! - A short mono recorder whose result can be played back
//! - Device streams via CPAL, or an offline backend driven by the caller
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Control Thread                          │
//! │   front end ──AudioControl──▶ AudioEngine ◀──events──       │
//! └─────────────────────────────────────────────────────────────┘
//!          │ rtrb commands            ▲ rtrb retired / crossbeam events
//!          ▼                          │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Output Callback                         │
//! │   Sources ──▶ Mixer ──▶ Effect Stage ──▶ clamp ──▶ device   │
//! │              (Zero allocation in this path)                 │
//! └─────────────────────────────────────────────────────────────┘
//!          ▲ rtrb PCM                         ▲ rtrb PCM
//!   decode workers (URI streams)       input callback ──▶ recorder
//! ```

mod assets;
mod backend;
mod clips;
mod config;
mod decode;
mod device;
mod engine;
mod error;
mod message;
mod mixer;
mod recorder;
mod render;
mod settings;
mod source;
mod stream;
mod units;

pub use assets::AssetStore;
pub use backend::{
    AudioBackend, CaptureFn, NativeParams, OfflineBackend, OfflineDriver, RenderFn, StreamHandle,
};
pub use clips::{Clip, ClipLibrary, CLIP_SOURCE_RATE};
pub use config::{
    ClipPolicyConfig, EffectConfig, EngineConfig, MixerConfig, RecorderConfig, StreamConfig,
};
pub use decode::{decode_to_rate, resolve_uri, AudioDecoder};
pub use device::{AudioDevice, DeviceType};
pub use engine::{AudioControl, AudioEngine, EngineState};
pub use error::{EngineError, EngineResult};
pub use message::{Command, Event};
pub use mixer::{MixStats, Mixer};
pub use recorder::{write_wav, Recording};
pub use render::SharedState;
pub use settings::PlayerSettings;
pub use source::{Source, SourceControls, SourceHandle, SourceId, SourceKind, StreamStatus};
pub use stream::CpalBackend;
pub use units::{pan_slider_to_permille, volume_slider_to_millibel, VOLUME_SLIDER_FLOOR_MILLIBEL};

// Re-export DSP types for convenience
pub use nativeaudio_dsp::{ClipPolicy, ReverbSettings, REVERB_PRESETS};
