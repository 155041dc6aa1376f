//! Hardware/software decoder variants
//!
//! Both variants wrap a `CodecBackend` and differ only in how they assign
//! frame positions and in how their errors are treated by the Track:
//!
//! - **Software**: positions follow a best-effort high-watermark so decode
//!   reordering never moves the clock backwards. Errors are fatal.
//! - **Hardware**: positions follow the packet timestamps plus a start offset
//!   that re-bases discarded key units. A non-key failure is recoverable by
//!   swapping the variant in place for a software one.

use crate::codec::{CodecBackend, CodecProvider, Normalizer, RawUnit};
use crate::error::{Error, Result};
use crate::media::{Frame, Packet, StreamDescriptor};
use hplayer_common::{PlayerConfig, Timebase};
use tracing::{debug, info};

/// Which variant a decoder is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    Hardware,
    Software,
}

/// Software session with the best-effort watermark
pub struct SoftwareDecoder {
    backend: Box<dyn CodecBackend>,
    timebase: Timebase,
    best_effort_timestamp: i64,
    /// The first flush after creation is skipped
    first_flush: bool,
}

impl SoftwareDecoder {
    pub fn new(backend: Box<dyn CodecBackend>, timebase: Timebase) -> Self {
        Self {
            backend,
            timebase,
            best_effort_timestamp: 0,
            first_flush: true,
        }
    }

    fn position_for(&mut self, unit: &RawUnit, duration: i64) -> i64 {
        let timestamp = unit.best_effort_timestamp.unwrap_or(unit.pts).max(unit.pts);
        if timestamp >= self.best_effort_timestamp {
            self.best_effort_timestamp = timestamp;
        }
        let position = self.best_effort_timestamp;
        self.best_effort_timestamp += duration;
        position
    }
}

/// Hardware session with start-offset tracking
pub struct HardwareDecoder {
    backend: Box<dyn CodecBackend>,
    timebase: Timebase,
    start_offset: i64,
    last_position: i64,
}

impl HardwareDecoder {
    pub fn new(backend: Box<dyn CodecBackend>, timebase: Timebase) -> Self {
        Self {
            backend,
            timebase,
            start_offset: 0,
            last_position: 0,
        }
    }

    fn position_for(&mut self, timestamp: i64, duration: i64) -> i64 {
        self.last_position = self.last_position.max(timestamp);
        let position = self.start_offset + timestamp;
        self.last_position += duration;
        position
    }
}

/// Decoder for one stream, swappable in place on fallback
pub enum Decoder {
    Hardware(HardwareDecoder),
    Software(SoftwareDecoder),
}

impl Decoder {
    /// Pick the variant for a stream
    ///
    /// Hardware is used when the config allows it for the codec and the
    /// provider can accelerate the stream; a hardware session that cannot be
    /// built silently becomes software.
    pub fn create(
        stream: &StreamDescriptor,
        provider: &dyn CodecProvider,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let timebase = stream.effective_timebase();
        if config.can_hardware_decode(&stream.codec) && provider.can_accelerate(stream) {
            match provider.hardware(stream) {
                Ok(backend) => {
                    debug!("Stream {} ({}) using hardware decoder", stream.index, stream.codec);
                    return Ok(Decoder::Hardware(HardwareDecoder::new(backend, timebase)));
                }
                Err(e) => {
                    info!(
                        "Hardware session unavailable for stream {} ({}), using software: {}",
                        stream.index, stream.codec, e
                    );
                }
            }
        }
        Self::software(stream, provider)
    }

    /// Software variant for a stream
    pub fn software(stream: &StreamDescriptor, provider: &dyn CodecProvider) -> Result<Self> {
        let backend = provider
            .software(stream)
            .map_err(|e| Error::DecoderInit(format!("stream {} ({}): {}", stream.index, stream.codec, e)))?;
        debug!("Stream {} ({}) using software decoder", stream.index, stream.codec);
        Ok(Decoder::Software(SoftwareDecoder::new(
            backend,
            stream.effective_timebase(),
        )))
    }

    pub fn kind(&self) -> DecoderKind {
        match self {
            Decoder::Hardware(_) => DecoderKind::Hardware,
            Decoder::Software(_) => DecoderKind::Software,
        }
    }

    /// Reset positions and backend state before a decode run
    pub fn prepare(&mut self) -> Result<()> {
        match self {
            Decoder::Hardware(hw) => {
                hw.start_offset = 0;
                hw.last_position = 0;
                hw.backend.prepare()
            }
            Decoder::Software(sw) => {
                sw.best_effort_timestamp = 0;
                sw.backend.prepare()
            }
        }
    }

    /// Decode one packet into positioned frames
    pub fn decode(&mut self, packet: &Packet, normalizer: &mut dyn Normalizer) -> Result<Vec<Frame>> {
        match self {
            Decoder::Software(sw) => {
                let units = sw.backend.decode(packet)?;
                let mut frames = Vec::with_capacity(units.len());
                for unit in units {
                    let duration = unit_duration(&unit, packet);
                    let position = sw.position_for(&unit, duration);
                    frames.push(normalize(normalizer, unit, position, duration, sw.timebase)?);
                }
                Ok(frames)
            }
            Decoder::Hardware(hw) => {
                let units = hw.backend.decode(packet)?;
                if packet.is_key && packet.is_discard && hw.last_position > 0 {
                    hw.start_offset = hw.last_position - packet.position;
                }
                let mut frames = Vec::with_capacity(units.len());
                for unit in units {
                    let duration = unit_duration(&unit, packet);
                    let position = hw.position_for(packet.position, duration);
                    frames.push(normalize(normalizer, unit, position, duration, hw.timebase)?);
                }
                Ok(frames)
            }
        }
    }

    /// Drop reference state; the software variant skips its first flush
    pub fn flush(&mut self) {
        match self {
            Decoder::Hardware(hw) => hw.backend.flush(),
            Decoder::Software(sw) => {
                if sw.first_flush {
                    sw.first_flush = false;
                } else {
                    sw.backend.flush();
                }
            }
        }
    }

    /// Reset position prediction after a seek
    pub fn seek(&mut self) {
        match self {
            Decoder::Hardware(hw) => {
                hw.start_offset = 0;
                hw.last_position = 0;
            }
            Decoder::Software(sw) => sw.best_effort_timestamp = 0,
        }
    }

    pub fn shutdown(&mut self) {
        match self {
            Decoder::Hardware(hw) => hw.backend.shutdown(),
            Decoder::Software(sw) => sw.backend.shutdown(),
        }
    }
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Decoder").field(&self.kind()).finish()
    }
}

fn unit_duration(unit: &RawUnit, packet: &Packet) -> i64 {
    if unit.duration > 0 {
        unit.duration
    } else {
        packet.duration
    }
}

fn normalize(
    normalizer: &mut dyn Normalizer,
    mut unit: RawUnit,
    position: i64,
    duration: i64,
    timebase: Timebase,
) -> Result<Frame> {
    unit.duration = duration;
    normalizer.normalize(unit, position, timebase)
}
