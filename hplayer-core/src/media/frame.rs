//! Decoded presentation units

use crate::media::pool::Pooled;
use crate::playback::queue::Timed;
use hplayer_common::{MediaKind, Timebase};
use std::any::Any;
use std::sync::Arc;

/// Opaque handle to memory the engine never inspects (hardware surfaces etc.)
///
/// The handle is carried unexamined inside a `Frame`; only the renderer that
/// knows the concrete type downcasts it.
#[derive(Clone)]
pub struct ExternalHandle(Arc<dyn Any + Send + Sync>);

impl ExternalHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for ExternalHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ExternalHandle(..)")
    }
}

/// Decoded payload owned by a frame
#[derive(Debug, Default)]
pub enum Payload {
    #[default]
    Empty,

    /// Interleaved f32 samples
    Samples { buffer: Pooled<f32>, channels: u16 },

    /// Raw pixels
    Pixels {
        buffer: Pooled<u8>,
        width: u32,
        height: u32,
    },

    /// Backend-owned memory
    External(ExternalHandle),
}

impl Payload {
    /// Payload size in bytes (zero for external handles)
    pub fn size_bytes(&self) -> usize {
        match self {
            Payload::Empty | Payload::External(_) => 0,
            Payload::Samples { buffer, .. } => buffer.size_bytes(),
            Payload::Pixels { buffer, .. } => buffer.size_bytes(),
        }
    }
}

/// One decoded unit ready for rendering
#[derive(Debug)]
pub struct Frame {
    pub kind: MediaKind,

    /// Position in `timebase` units
    pub position: i64,

    /// Duration in `timebase` units
    pub duration: i64,

    /// Payload size in bytes
    pub size: usize,

    pub timebase: Timebase,

    /// Clock epoch this frame was decoded in (bumped on seek and loop restart)
    pub serial: u64,

    pub payload: Payload,
}

impl Frame {
    pub fn new(kind: MediaKind, position: i64, duration: i64, timebase: Timebase, payload: Payload) -> Self {
        let size = payload.size_bytes();
        Self {
            kind,
            position,
            duration,
            size,
            timebase,
            serial: 0,
            payload,
        }
    }

    /// Start position in seconds
    pub fn seconds(&self) -> f64 {
        self.timebase.seconds(self.position)
    }

    pub fn duration_seconds(&self) -> f64 {
        self.timebase.seconds(self.duration)
    }

    /// End position (`position + duration`) in seconds
    pub fn end_seconds(&self) -> f64 {
        self.timebase.seconds(self.position + self.duration)
    }

    /// Interleaved samples, for audio frames
    pub fn samples(&self) -> Option<&[f32]> {
        match &self.payload {
            Payload::Samples { buffer, .. } => Some(buffer.as_slice()),
            _ => None,
        }
    }

    /// Number of sample frames (samples per channel), for audio frames
    pub fn sample_frames(&self) -> usize {
        match &self.payload {
            Payload::Samples { buffer, channels } => buffer.len() / (*channels).max(1) as usize,
            _ => 0,
        }
    }

    pub fn external(&self) -> Option<&ExternalHandle> {
        match &self.payload {
            Payload::External(handle) => Some(handle),
            _ => None,
        }
    }
}

impl Timed for Frame {
    fn position(&self) -> i64 {
        self.position
    }
}
