//! File demuxer backed by symphonia
//!
//! Opens local files, exposes every audio track as a stream and reads
//! packets as `Bytes`. Codec parameters travel to the codec provider inside
//! `StreamDescriptor::codec_private`.

use crate::demux::{ContainerInfo, Demuxer, OpenOptions, ReadOutcome};
use crate::error::{Error, Result};
use crate::media::{ExternalHandle, Packet, StreamDescriptor};
use ::symphonia::core::codecs::{CodecParameters, CODEC_TYPE_NULL};
use ::symphonia::core::errors::Error as SymphoniaError;
use ::symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use ::symphonia::core::io::MediaSourceStream;
use ::symphonia::core::meta::MetadataOptions;
use ::symphonia::core::probe::Hint;
use ::symphonia::core::units::Time;
use bytes::Bytes;
use hplayer_common::{MediaKind, Timebase};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Codec parameters of one symphonia track
#[derive(Debug, Clone)]
pub struct SymphoniaStreamParams {
    pub track_id: u32,
    pub params: CodecParameters,
}

/// Symphonia-backed `Demuxer` for local files
#[derive(Default)]
pub struct SymphoniaDemuxer {
    reader: Option<Box<dyn FormatReader>>,
    /// symphonia track id -> stream index
    indices: HashMap<u32, usize>,
    /// Audio streams are dropped entirely when audio is disabled
    audio_disable: bool,
    duration: f64,
}

impl SymphoniaDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    fn describe(index: usize, track_id: u32, params: &CodecParameters, language: Option<String>) -> StreamDescriptor {
        let codec = ::symphonia::default::get_codecs()
            .get_codec(params.codec)
            .map(|descriptor| descriptor.short_name.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut stream = StreamDescriptor::new(index, MediaKind::Audio, codec);
        stream.sample_rate = params.sample_rate.unwrap_or(0);
        stream.channels = params.channels.map(|c| c.count() as u16).unwrap_or(0);
        if let Some(time_base) = params.time_base {
            stream.timebase = Timebase::new(time_base.numer as i32, time_base.denom as i32);
        }
        stream.duration = params.n_frames.map(|n| n as i64).unwrap_or(0);
        stream.start_time = params.start_ts as i64;
        if let Some(frames_per_packet) = params.max_frames_per_packet.filter(|n| *n > 0) {
            stream.guessed_frame_rate = Some((stream.sample_rate, frames_per_packet as u32));
        }
        if let Some(bits) = params.bits_per_sample {
            stream.bit_rate = bits as u64 * stream.sample_rate as u64 * stream.channels as u64;
        }
        stream.language = language;
        stream.codec_private = Some(ExternalHandle::new(SymphoniaStreamParams {
            track_id,
            params: params.clone(),
        }));
        stream
    }
}

impl Demuxer for SymphoniaDemuxer {
    fn open(&mut self, locator: &str, options: &OpenOptions) -> Result<ContainerInfo> {
        let path = Path::new(locator);
        let file = std::fs::File::open(path)
            .map_err(|e| Error::Open(format!("Failed to open file {}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = ::symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| Error::Open(format!("Failed to probe format: {}", e)))?;
        let reader = probed.format;

        let mut streams = Vec::new();
        self.indices.clear();
        for track in reader.tracks() {
            if track.codec_params.codec == CODEC_TYPE_NULL {
                continue;
            }
            let index = streams.len();
            self.indices.insert(track.id, index);
            streams.push(Self::describe(index, track.id, &track.codec_params, track.language.clone()));
        }

        self.duration = streams
            .iter()
            .map(StreamDescriptor::duration_seconds)
            .fold(0.0, f64::max);
        let start_time = streams
            .iter()
            .map(StreamDescriptor::start_seconds)
            .reduce(f64::min)
            .unwrap_or(0.0);
        self.audio_disable = options.audio_disable;
        self.reader = Some(reader);

        debug!(
            "Opened {} ({} streams, {:.3}s)",
            path.display(),
            streams.len(),
            self.duration
        );

        Ok(ContainerInfo {
            streams,
            duration: self.duration,
            start_time,
        })
    }

    fn read_packet(&mut self) -> Result<ReadOutcome> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| Error::InvalidState("demuxer not open".to_string()))?;

        loop {
            let packet = match reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(ReadOutcome::EndOfFile);
                }
                Err(SymphoniaError::ResetRequired) => return Ok(ReadOutcome::EndOfFile),
                Err(e) => return Err(Error::Read(e.to_string())),
            };

            let Some(&index) = self.indices.get(&packet.track_id()) else {
                continue;
            };
            if self.audio_disable {
                continue;
            }

            let ts = packet.ts() as i64;
            let duration = packet.dur() as i64;
            let data = Bytes::from(packet.data.into_vec());
            return Ok(ReadOutcome::Packet(
                Packet::new(index, Some(ts), None, duration, data).with_key(true),
            ));
        }
    }

    fn seek(&mut self, seconds: f64) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };
        let seconds = seconds.max(0.0);
        let time = Time::new(seconds.trunc() as u64, seconds.fract());
        match reader.seek(SeekMode::Accurate, SeekTo::Time { time, track_id: None }) {
            Ok(seeked) => {
                debug!("Seeked to ts {} (requested {})", seeked.actual_ts, seeked.required_ts);
                true
            }
            Err(e) => {
                warn!("Seek to {:.3}s failed: {}", seconds, e);
                false
            }
        }
    }

    fn seekable(&self) -> bool {
        self.reader.is_some() && self.duration > 0.0
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!("Demuxer closed");
        }
        self.indices.clear();
    }
}
