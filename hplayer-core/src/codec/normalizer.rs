//! Frame normalizer
//!
//! Converts decoder output into frames with pooled payloads:
//! - audio is remixed to the configured channel count and resampled to the
//!   configured output rate (rubato), so every audio frame the gateway sees
//!   shares one timebase `1/output_sample_rate`
//! - pixels are copied into a pooled arena
//! - external handles pass through untouched

use crate::codec::{Normalizer, RawContent, RawUnit};
use crate::error::{Error, Result};
use crate::media::{Frame, Payload, PayloadPool, StreamDescriptor};
use hplayer_common::{MediaKind, PlayerConfig, Timebase};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::debug;

/// Cached resampler, rebuilt when the input shape changes
struct ResamplerSlot {
    input_rate: u32,
    chunk_size: usize,
    resampler: FastFixedIn<f32>,
}

/// Default normalizer used by every provider unless overridden
pub struct FrameNormalizer {
    kind: MediaKind,
    output_rate: u32,
    output_channels: u16,
    pool: PayloadPool,
    resampler: Option<ResamplerSlot>,
}

impl FrameNormalizer {
    pub fn new(stream: &StreamDescriptor, config: &PlayerConfig, pool: PayloadPool) -> Self {
        Self {
            kind: stream.kind,
            output_rate: config.output_sample_rate,
            output_channels: config.output_channels,
            pool,
            resampler: None,
        }
    }

    fn normalize_samples(
        &mut self,
        data: Vec<f32>,
        channels: u16,
        sample_rate: u32,
        position: i64,
        timebase: Timebase,
    ) -> Result<Frame> {
        let output_timebase = Timebase::for_sample_rate(self.output_rate);
        let remixed = remix(&data, channels.max(1), self.output_channels);
        let samples = if sample_rate == self.output_rate || sample_rate == 0 {
            remixed
        } else {
            self.resample(&remixed, sample_rate)?
        };

        let channels = self.output_channels.max(1) as usize;
        let mut buffer = self.pool.acquire_samples(samples.len());
        buffer.as_mut_slice().copy_from_slice(&samples);
        let sample_frames = samples.len() / channels;

        Ok(Frame::new(
            MediaKind::Audio,
            timebase.rescale(position, output_timebase),
            sample_frames as i64,
            output_timebase,
            Payload::Samples {
                buffer,
                channels: self.output_channels,
            },
        ))
    }

    fn resample(&mut self, input: &[f32], input_rate: u32) -> Result<Vec<f32>> {
        let channels = self.output_channels.max(1) as usize;
        let chunk_size = input.len() / channels;
        if chunk_size == 0 {
            return Ok(Vec::new());
        }

        let rebuild = match &self.resampler {
            Some(slot) => slot.input_rate != input_rate || slot.chunk_size != chunk_size,
            None => true,
        };
        if rebuild {
            debug!(
                "Resampler {}Hz -> {}Hz ({} channels, chunk {})",
                input_rate, self.output_rate, channels, chunk_size
            );
            let resampler = FastFixedIn::<f32>::new(
                self.output_rate as f64 / input_rate as f64,
                1.0,
                PolynomialDegree::Cubic,
                chunk_size,
                channels,
            )
            .map_err(|e| Error::Normalize(format!("Failed to create resampler: {}", e)))?;
            self.resampler = Some(ResamplerSlot {
                input_rate,
                chunk_size,
                resampler,
            });
        }

        let slot = self
            .resampler
            .as_mut()
            .ok_or_else(|| Error::Normalize("resampler missing".to_string()))?;
        let planar = deinterleave(input, channels);
        let output = slot
            .resampler
            .process(&planar, None)
            .map_err(|e| Error::Normalize(format!("Resampling failed: {}", e)))?;
        Ok(interleave(&output))
    }
}

impl Normalizer for FrameNormalizer {
    fn normalize(&mut self, unit: RawUnit, position: i64, timebase: Timebase) -> Result<Frame> {
        match unit.content {
            RawContent::Samples {
                data,
                channels,
                sample_rate,
            } => self.normalize_samples(data, channels, sample_rate, position, timebase),
            RawContent::Pixels { data, width, height } => {
                let mut buffer = self.pool.acquire_pixels(data.len());
                buffer.as_mut_slice().copy_from_slice(&data);
                Ok(Frame::new(
                    self.kind,
                    position,
                    unit.duration,
                    timebase,
                    Payload::Pixels { buffer, width, height },
                ))
            }
            RawContent::External(handle) => Ok(Frame::new(
                self.kind,
                position,
                unit.duration,
                timebase,
                Payload::External(handle),
            )),
        }
    }
}

/// Map interleaved samples from one channel count to another
///
/// Mono is duplicated on upmix, downmix to mono averages, and any other
/// mismatch keeps the leading channels (repeating the last one if short).
fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from as usize, to.max(1) as usize);
    if from == to {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for channel in 0..to {
                out.push(frame[channel.min(from - 1)]);
            }
        }
    }
    out
}

fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (channel, sample) in frame.iter().enumerate() {
            planar[channel].push(*sample);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let Some(first) = planar.first() else {
        return Vec::new();
    };
    let frames = first.len();
    let mut interleaved = Vec::with_capacity(frames * planar.len());
    for index in 0..frames {
        for channel in planar {
            interleaved.push(channel[index]);
        }
    }
    interleaved
}
