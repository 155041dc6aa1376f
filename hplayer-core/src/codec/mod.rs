//! Codec seams
//!
//! The engine drives codecs it does not implement. A `CodecProvider` hands
//! out `CodecBackend` sessions (hardware or software) for a stream; backends
//! turn packets into `RawUnit`s, and a `Normalizer` turns those into
//! `Frame`s with pooled payloads. `Decoder` wraps one backend with the
//! timestamp policy of its variant.

pub mod decoder;
pub mod normalizer;
pub mod symphonia;

use crate::error::Result;
use crate::media::{ExternalHandle, Frame, Packet, PayloadPool, StreamDescriptor};
use bytes::Bytes;
use hplayer_common::{PlayerConfig, Timebase};

pub use decoder::{Decoder, DecoderKind, HardwareDecoder, SoftwareDecoder};
pub use normalizer::FrameNormalizer;
pub use self::symphonia::SymphoniaCodecProvider;

/// Decoded content before normalization
#[derive(Debug)]
pub enum RawContent {
    /// Interleaved f32 samples at the stream's native rate and layout
    Samples {
        data: Vec<f32>,
        channels: u16,
        sample_rate: u32,
    },

    /// Packed pixels
    Pixels { data: Bytes, width: u32, height: u32 },

    /// Backend-owned surface
    External(ExternalHandle),
}

/// One decoded unit as produced by a backend
#[derive(Debug)]
pub struct RawUnit {
    /// Coded timestamp in stream timebase units
    pub pts: i64,

    /// Backend's best-effort timestamp estimate, when it has one
    pub best_effort_timestamp: Option<i64>,

    /// Duration in stream timebase units (0 when unknown)
    pub duration: i64,

    pub content: RawContent,
}

impl RawUnit {
    pub fn new(pts: i64, duration: i64, content: RawContent) -> Self {
        Self {
            pts,
            best_effort_timestamp: None,
            duration,
            content,
        }
    }
}

/// One decoding session
pub trait CodecBackend: Send {
    /// Reset internal state before a decode run
    fn prepare(&mut self) -> Result<()>;

    /// Decode one packet into zero or more units
    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawUnit>>;

    /// Drop buffered reference state (after seek)
    fn flush(&mut self);

    fn shutdown(&mut self);
}

/// Factory for decoding sessions
pub trait CodecProvider: Send + Sync {
    /// Whether a hardware session can be attempted for this stream
    fn can_accelerate(&self, stream: &StreamDescriptor) -> bool;

    fn hardware(&self, stream: &StreamDescriptor) -> Result<Box<dyn CodecBackend>>;

    fn software(&self, stream: &StreamDescriptor) -> Result<Box<dyn CodecBackend>>;

    /// Normalizer for a stream's units; independent of the backend variant
    fn normalizer(
        &self,
        stream: &StreamDescriptor,
        config: &PlayerConfig,
        pool: &PayloadPool,
    ) -> Box<dyn Normalizer> {
        Box::new(FrameNormalizer::new(stream, config, pool.clone()))
    }
}

/// Converts raw decoder output into frames
pub trait Normalizer: Send {
    /// Build a frame positioned at `position` (in `timebase` units)
    fn normalize(&mut self, unit: RawUnit, position: i64, timebase: Timebase) -> Result<Frame>;
}
