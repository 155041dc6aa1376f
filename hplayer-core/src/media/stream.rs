//! Stream descriptors discovered by a demuxer

use crate::media::frame::ExternalHandle;
use hplayer_common::{MediaKind, Timebase};
use serde::{Deserialize, Serialize};

/// Nominal fps used when a stream declares neither frame count nor rate
const FALLBACK_AUDIO_FPS: u32 = 44;
const FALLBACK_VIDEO_FPS: u32 = 24;

/// One elementary stream as probed from the container
#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    /// Position in the container's stream table
    pub index: usize,
    pub kind: MediaKind,

    /// Lowercase codec name (e.g. "h264", "aac", "pcm_s16le")
    pub codec: String,

    /// Declared timebase; may be invalid (0/0) when the container omits it
    pub timebase: Timebase,

    pub bit_rate: u64,
    pub language: Option<String>,

    /// Program id, used as a relevance hint when pairing audio with video
    pub group: Option<u32>,

    /// Declared frame count (0 when unknown)
    pub frame_count: u64,

    /// Duration in `timebase` units (0 when unknown)
    pub duration: i64,

    /// Start time in `timebase` units
    pub start_time: i64,

    /// Frame rate guessed by the demuxer as `(num, den)`
    pub guessed_frame_rate: Option<(u32, u32)>,

    pub sample_rate: u32,
    pub channels: u16,

    pub width: u32,
    pub height: u32,

    /// Display rotation in degrees
    pub rotation: i32,

    /// Backend-specific codec parameters, only inspected by the codec provider
    pub codec_private: Option<ExternalHandle>,
}

impl StreamDescriptor {
    /// Bare descriptor with every optional property unset
    pub fn new(index: usize, kind: MediaKind, codec: impl Into<String>) -> Self {
        Self {
            index,
            kind,
            codec: codec.into(),
            timebase: Timebase::new(0, 0),
            bit_rate: 0,
            language: None,
            group: None,
            frame_count: 0,
            duration: 0,
            start_time: 0,
            guessed_frame_rate: None,
            sample_rate: 0,
            channels: 0,
            width: 0,
            height: 0,
            rotation: 0,
            codec_private: None,
        }
    }

    /// Declared timebase, or `1/sample_rate` for audio and `1/25000` otherwise
    pub fn effective_timebase(&self) -> Timebase {
        if self.timebase.is_valid() {
            self.timebase
        } else if self.kind == MediaKind::Audio && self.sample_rate > 0 {
            Timebase::for_sample_rate(self.sample_rate)
        } else {
            Timebase::DEFAULT_VIDEO
        }
    }

    /// Nominal units per second
    pub fn fps(&self) -> u32 {
        let timebase = self.effective_timebase();
        if self.frame_count > 0 && self.duration > 0 {
            let denominator = self.duration as i128 * timebase.num as i128;
            let fps = self.frame_count as i128 * timebase.den as i128 / denominator;
            if fps > 0 {
                return fps.min(u32::MAX as i128) as u32;
            }
        }
        if let Some((num, den)) = self.guessed_frame_rate {
            if den > 0 && num / den > 0 {
                return num / den;
            }
        }
        match self.kind {
            MediaKind::Audio => FALLBACK_AUDIO_FPS,
            _ => FALLBACK_VIDEO_FPS,
        }
    }

    /// Start time in seconds
    pub fn start_seconds(&self) -> f64 {
        self.effective_timebase().seconds(self.start_time)
    }

    /// Duration in seconds (0 when unknown)
    pub fn duration_seconds(&self) -> f64 {
        self.effective_timebase().seconds(self.duration)
    }
}

/// Stream listing entry exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub language: Option<String>,
    pub bit_rate: u64,
    pub fps: u32,
    pub enabled: bool,
}

impl StreamInfo {
    pub fn from_descriptor(stream: &StreamDescriptor, enabled: bool) -> Self {
        Self {
            index: stream.index,
            kind: stream.kind,
            codec: stream.codec.clone(),
            language: stream.language.clone(),
            bit_rate: stream.bit_rate,
            fps: stream.fps(),
            enabled,
        }
    }
}
