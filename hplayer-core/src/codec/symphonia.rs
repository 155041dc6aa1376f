//! Software audio codec backed by symphonia

use crate::codec::{CodecBackend, CodecProvider, RawContent, RawUnit};
use crate::demux::SymphoniaStreamParams;
use crate::error::{Error, Result};
use crate::media::{Packet, StreamDescriptor};
use ::symphonia::core::audio::SampleBuffer;
use ::symphonia::core::codecs::{Decoder as SymphoniaDecoder, DecoderOptions};
use ::symphonia::core::errors::Error as SymphoniaError;
use ::symphonia::core::formats::Packet as SymphoniaPacket;
use tracing::{debug, warn};

/// Provider for streams opened by `SymphoniaDemuxer` (software only)
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaCodecProvider;

impl SymphoniaCodecProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CodecProvider for SymphoniaCodecProvider {
    fn can_accelerate(&self, _stream: &StreamDescriptor) -> bool {
        false
    }

    fn hardware(&self, stream: &StreamDescriptor) -> Result<Box<dyn CodecBackend>> {
        Err(Error::DecoderInit(format!(
            "no hardware path for {} (stream {})",
            stream.codec, stream.index
        )))
    }

    fn software(&self, stream: &StreamDescriptor) -> Result<Box<dyn CodecBackend>> {
        let params = stream
            .codec_private
            .as_ref()
            .and_then(|handle| handle.downcast_ref::<SymphoniaStreamParams>())
            .ok_or_else(|| {
                Error::DecoderInit(format!("stream {} carries no symphonia parameters", stream.index))
            })?;
        let decoder = ::symphonia::default::get_codecs()
            .make(&params.params, &DecoderOptions::default())
            .map_err(|e| Error::DecoderInit(format!("Failed to create decoder: {}", e)))?;
        debug!("Symphonia decoder created for {} (track {})", stream.codec, params.track_id);
        Ok(Box::new(SymphoniaBackend {
            decoder,
            track_id: params.track_id,
        }))
    }
}

struct SymphoniaBackend {
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
}

impl CodecBackend for SymphoniaBackend {
    fn prepare(&mut self) -> Result<()> {
        self.decoder.reset();
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawUnit>> {
        let input = SymphoniaPacket::new_from_slice(
            self.track_id,
            packet.position.max(0) as u64,
            packet.duration.max(0) as u64,
            &packet.data,
        );
        match self.decoder.decode(&input) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                if decoded.frames() == 0 {
                    return Ok(Vec::new());
                }
                let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);

                return Ok(vec![RawUnit::new(
                    packet.position,
                    packet.duration,
                    RawContent::Samples {
                        data: samples.samples().to_vec(),
                        channels: spec.channels.count() as u16,
                        sample_rate: spec.rate,
                    },
                )]);
            }
            Err(SymphoniaError::ResetRequired) => {
                warn!("Decoder reset required (track {})", self.track_id);
            }
            Err(e) => return Err(Error::decode(packet.is_key, e.to_string())),
        }

        self.decoder.reset();
        Ok(Vec::new())
    }

    fn flush(&mut self) {
        self.decoder.reset();
    }

    fn shutdown(&mut self) {
        let _ = self.decoder.finalize();
    }
}
