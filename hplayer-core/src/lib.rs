//! # HPlayer Engine Core (hplayer-core)
//!
//! Continuous-media playback engine: demux, per-track decoding with
//! hardware/software fallback, bounded frame buffering, buffering and
//! adaptive-bitrate policy, and audio/video synchronization against a shared
//! position clock.
//!
//! **Architecture:** one read thread per Source, one decode thread per
//! Track, and external render threads pulling through the `SyncGateway`.
//! Demuxers and codecs plug in through the `Demuxer` and `CodecProvider`
//! traits; a symphonia + rubato backend ships for local audio files.

pub mod codec;
pub mod demux;
pub mod error;
pub mod media;
pub mod playback;
pub mod player;

pub use codec::{CodecBackend, CodecProvider, Decoder, DecoderKind, Normalizer, RawContent, RawUnit};
pub use demux::{ContainerInfo, Demuxer, OpenOptions, ReadOutcome};
pub use error::{Error, Result};
pub use media::{Frame, Packet, Payload, PayloadPool, StreamDescriptor, StreamInfo};
pub use playback::{BufferPolicy, BufferSnapshot, SyncGateway, TimedQueue};
pub use player::Player;
