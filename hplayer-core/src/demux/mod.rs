//! Demuxer seam
//!
//! The Source drives any container reader through `Demuxer`. Container and
//! bitstream parsing stay behind this trait; the engine only sees stream
//! descriptors and packets.

pub mod symphonia;

use crate::error::Result;
use crate::media::{Packet, StreamDescriptor};
use hplayer_common::{MediaKind, PlayerConfig};

pub use self::symphonia::{SymphoniaDemuxer, SymphoniaStreamParams};

/// Options passed to `Demuxer::open`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    pub video_disable: bool,
    pub audio_disable: bool,
}

impl OpenOptions {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            video_disable: config.video_disable,
            audio_disable: config.audio_disable,
        }
    }
}

/// Result of a successful open
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    /// Every stream in container order (`streams[i].index == i`)
    pub streams: Vec<StreamDescriptor>,

    /// Container duration in seconds (0 when unknown)
    pub duration: f64,

    /// Container start time in seconds
    pub start_time: f64,
}

/// One read attempt
#[derive(Debug)]
pub enum ReadOutcome {
    Packet(Packet),
    EndOfFile,
}

/// Container reader
pub trait Demuxer: Send {
    fn open(&mut self, locator: &str, options: &OpenOptions) -> Result<ContainerInfo>;

    /// Next compressed unit; end of file is an outcome, not an error
    fn read_packet(&mut self) -> Result<ReadOutcome>;

    /// Reposition to `seconds`; `false` on failure
    fn seek(&mut self, seconds: f64) -> bool;

    fn seekable(&self) -> bool;

    fn close(&mut self);

    /// Pick a stream of `kind`
    ///
    /// `wanted` wins when it names a stream of that kind. Otherwise streams
    /// sharing `related`'s program group are preferred, and among those the
    /// highest bitrate (first one on ties).
    fn find_best_stream(
        &self,
        streams: &[StreamDescriptor],
        kind: MediaKind,
        wanted: Option<usize>,
        related: Option<usize>,
    ) -> Option<usize> {
        if let Some(index) = wanted {
            if streams.get(index).map(|s| s.kind) == Some(kind) {
                return Some(index);
            }
        }

        let group = related.and_then(|index| streams.get(index)).and_then(|s| s.group);
        let candidates: Vec<&StreamDescriptor> = streams.iter().filter(|s| s.kind == kind).collect();
        let grouped: Vec<&StreamDescriptor> = match group {
            Some(group) => candidates
                .iter()
                .copied()
                .filter(|s| s.group == Some(group))
                .collect(),
            None => Vec::new(),
        };
        let pool = if grouped.is_empty() { candidates } else { grouped };

        let mut best: Option<&StreamDescriptor> = None;
        for stream in pool {
            if best.map_or(true, |b| stream.bit_rate > b.bit_rate) {
                best = Some(stream);
            }
        }
        best.map(|s| s.index)
    }
}
