//! WAV fixture generation for end-to-end playback tests

use hound::{SampleFormat, WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::Path;

/// Standard fixture sample rate (matches the default output rate)
pub const TEST_SAMPLE_RATE: u32 = 44_100;

/// Write a stereo 16-bit sine wave of `duration_ms`
pub fn generate_sine_wav<P: AsRef<Path>>(
    path: P,
    frequency: f32,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate: TEST_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = TEST_SAMPLE_RATE as u64 * duration_ms / 1000;
    for n in 0..total_frames {
        let t = n as f32 / TEST_SAMPLE_RATE as f32;
        let sample = ((2.0 * PI * frequency * t).sin() * 0.5 * i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

/// Write a mono 16-bit sine wave at a non-default rate (exercises resampling)
pub fn generate_mono_wav<P: AsRef<Path>>(
    path: P,
    sample_rate: u32,
    duration_ms: u64,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;

    let total_frames = sample_rate as u64 * duration_ms / 1000;
    for n in 0..total_frames {
        let t = n as f32 / sample_rate as f32;
        writer.write_sample(((2.0 * PI * 440.0 * t).sin() * 8000.0) as i16)?;
    }
    writer.finalize()
}
