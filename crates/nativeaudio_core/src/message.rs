//! Message Types for Thread Communication
//!
//! Commands flow from control thread -> audio callback (rtrb queue)
//! Retired objects flow from audio callback -> control thread (rtrb queue)
//! Events flow from audio callback / workers -> control thread (crossbeam)

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::source::{Source, SourceId};

/// Structural changes applied by the audio callback at the start of a buffer
pub enum Command {
    /// Hand a new source to the mixer
    AddSource(Box<Source>),

    /// Take a source out of the mixer; it comes back through the retired queue
    RemoveSource(SourceId),

    /// Queue PCM on the buffer-queue player, played `count` times
    QueueClip {
        pcm: Arc<[f32]>,
        count: u32,
        generation: u64,
    },

    /// Stop the buffer-queue player and drop its block
    StopClip,

    /// Silence the output and stop every source
    Pause,

    /// Resume rendering after a pause
    Resume,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AddSource(source) => f.debug_tuple("AddSource").field(&source.id()).finish(),
            Command::RemoveSource(id) => f.debug_tuple("RemoveSource").field(id).finish(),
            Command::QueueClip {
                pcm,
                count,
                generation,
            } => f
                .debug_struct("QueueClip")
                .field("samples", &pcm.len())
                .field("count", count)
                .field("generation", generation)
                .finish(),
            Command::StopClip => write!(f, "StopClip"),
            Command::Pause => write!(f, "Pause"),
            Command::Resume => write!(f, "Resume"),
        }
    }
}

/// Objects the callback is done with; dropped on the control thread
pub enum Retired {
    Source(Box<Source>),
    Clip(Arc<[f32]>),
}

/// Events sent to the control thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Engine context created
    Created,

    /// Output sink opened and rendering
    OutputStarted {
        sample_rate: u32,
        buffer_frames: u32,
        channels: u16,
    },

    Paused,

    Resumed,

    /// Engine torn down
    Destroyed,

    /// Error occurred
    Error { message: String },

    /// Device asked for more frames than the callback can render
    BufferUnderrun,

    /// Mixer output exceeded full scale and was limited
    Clipped { samples: usize },

    /// The buffer-queue player played its clip to the end
    ClipFinished,

    /// A non-looping asset or URI source reached its end
    SourceEnded { source: u64 },

    /// The mixer had no free slot for a new source
    SourceRejected { source: u64 },

    RecordingStarted,

    /// Capture finished; the recording is available as the playback clip
    RecordingFinished {
        frames: usize,
        sample_rate: u32,
        path: Option<String>,
    },

    /// Capture ring was full and samples were dropped
    RecordingOverrun,
}

impl Event {
    /// Create an error event from any error type
    pub fn error<E: std::fmt::Display>(err: E) -> Self {
        Event::Error {
            message: err.to_string(),
        }
    }
}
