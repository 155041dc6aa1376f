//! Scripted demuxer and codec provider
//!
//! `SyntheticDemuxer` serves N packets per stream, interleaved, with a key
//! unit every K packets. `SyntheticCodecProvider` decodes every packet into
//! exactly one unit and can inject failures on chosen positions. Both share
//! their scripts through `Arc<Mutex<_>>` so tests can steer and inspect them
//! while the engine threads run.

use bytes::Bytes;
use hplayer_common::{MediaKind, Timebase};
use hplayer_core::codec::{CodecBackend, CodecProvider, RawContent, RawUnit};
use hplayer_core::demux::{ContainerInfo, Demuxer, OpenOptions, ReadOutcome};
use hplayer_core::error::{Error, Result};
use hplayer_core::media::{Packet, StreamDescriptor};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Audio test streams use the default output rate so no resampling happens
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;
pub const AUDIO_CHANNELS: u16 = 2;

/// Shape of one synthetic stream
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub kind: MediaKind,
    pub codec: String,
    /// Packets per second; the stream timebase is `1/fps`
    pub fps: u32,
    pub packet_count: usize,
    pub key_interval: usize,
    pub bit_rate: u64,
    pub group: Option<u32>,
    pub language: Option<String>,
    /// Display rotation in degrees (video only)
    pub rotation: i32,
}

impl StreamSpec {
    pub fn audio(packet_count: usize) -> Self {
        Self {
            kind: MediaKind::Audio,
            codec: "pcm_f32le".to_string(),
            fps: 50,
            packet_count,
            key_interval: 1,
            bit_rate: 128_000,
            group: None,
            language: None,
            rotation: 0,
        }
    }

    pub fn video(packet_count: usize) -> Self {
        Self {
            kind: MediaKind::Video,
            codec: "hevc".to_string(),
            fps: 25,
            packet_count,
            key_interval: 5,
            bit_rate: 1_000_000,
            group: None,
            language: None,
            rotation: 0,
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_key_interval(mut self, key_interval: usize) -> Self {
        self.key_interval = key_interval.max(1);
        self
    }

    pub fn with_codec(mut self, codec: &str) -> Self {
        self.codec = codec.to_string();
        self
    }

    pub fn descriptor(&self, index: usize) -> StreamDescriptor {
        let mut stream = StreamDescriptor::new(index, self.kind, self.codec.clone());
        stream.timebase = Timebase::new(1, self.fps as i32);
        stream.bit_rate = self.bit_rate;
        stream.group = self.group;
        stream.language = self.language.clone();
        stream.frame_count = self.packet_count as u64;
        stream.duration = self.packet_count as i64;
        if self.kind == MediaKind::Audio {
            stream.sample_rate = AUDIO_SAMPLE_RATE;
            stream.channels = AUDIO_CHANNELS;
        } else {
            stream.width = 4;
            stream.height = 2;
            stream.rotation = self.rotation;
        }
        stream
    }

    fn seconds(&self) -> f64 {
        self.packet_count as f64 / self.fps as f64
    }
}

/// Shared demuxer script and counters
#[derive(Debug, Default)]
pub struct DemuxScript {
    pub fail_open: bool,
    /// Return a read error once this many packets have been served
    pub read_error_after: Option<usize>,
    pub fail_seek: bool,
    /// Sleep before serving each packet
    pub read_delay: Option<Duration>,
    /// Seconds of every successful or failed seek, in call order
    pub seeks: Vec<f64>,
    pub packets_served: usize,
    pub end_of_file_count: usize,
    pub closed: bool,
}

pub struct SyntheticDemuxer {
    specs: Vec<StreamSpec>,
    /// Interleaved `(stream, packet)` order
    order: Vec<(usize, usize)>,
    cursor: usize,
    script: Arc<Mutex<DemuxScript>>,
}

impl SyntheticDemuxer {
    pub fn new(specs: Vec<StreamSpec>) -> (Self, Arc<Mutex<DemuxScript>>) {
        let longest = specs.iter().map(|s| s.packet_count).max().unwrap_or(0);
        let mut order = Vec::new();
        for packet in 0..longest {
            for (stream, spec) in specs.iter().enumerate() {
                if packet < spec.packet_count {
                    order.push((stream, packet));
                }
            }
        }
        let script = Arc::new(Mutex::new(DemuxScript::default()));
        (
            Self {
                specs,
                order,
                cursor: 0,
                script: Arc::clone(&script),
            },
            script,
        )
    }

    pub fn audio_only(packet_count: usize) -> (Self, Arc<Mutex<DemuxScript>>) {
        Self::new(vec![StreamSpec::audio(packet_count)])
    }
}

impl Demuxer for SyntheticDemuxer {
    fn open(&mut self, _locator: &str, _options: &OpenOptions) -> Result<ContainerInfo> {
        if self.script.lock().fail_open {
            return Err(Error::Open("scripted open failure".to_string()));
        }
        let streams: Vec<StreamDescriptor> = self
            .specs
            .iter()
            .enumerate()
            .map(|(index, spec)| spec.descriptor(index))
            .collect();
        let duration = self.specs.iter().map(StreamSpec::seconds).fold(0.0, f64::max);
        Ok(ContainerInfo {
            streams,
            duration,
            start_time: 0.0,
        })
    }

    fn read_packet(&mut self) -> Result<ReadOutcome> {
        let delay = self.script.lock().read_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut script = self.script.lock();
        if let Some(limit) = script.read_error_after {
            if script.packets_served >= limit {
                return Err(Error::Read("scripted read failure".to_string()));
            }
        }
        let Some(&(stream, index)) = self.order.get(self.cursor) else {
            script.end_of_file_count += 1;
            return Ok(ReadOutcome::EndOfFile);
        };
        self.cursor += 1;
        script.packets_served += 1;

        let spec = &self.specs[stream];
        let data = Bytes::copy_from_slice(&(index as u64).to_le_bytes());
        let packet = Packet::new(stream, Some(index as i64), None, 1, data)
            .with_key(index % spec.key_interval == 0);
        Ok(ReadOutcome::Packet(packet))
    }

    fn seek(&mut self, seconds: f64) -> bool {
        let mut script = self.script.lock();
        script.seeks.push(seconds);
        if script.fail_seek {
            return false;
        }
        // Land on the first packet at or after the target in every stream
        self.cursor = self
            .order
            .iter()
            .position(|&(stream, index)| index as f64 / self.specs[stream].fps as f64 >= seconds - 1e-9)
            .unwrap_or(self.order.len());
        true
    }

    fn seekable(&self) -> bool {
        true
    }

    fn close(&mut self) {
        self.script.lock().closed = true;
    }
}

/// Shared codec script and counters
#[derive(Debug, Default)]
pub struct CodecScript {
    /// Whether hardware sessions may be attempted
    pub accelerate: bool,
    pub hardware_init_fails: bool,
    /// Hardware sessions fail on packets at these positions
    pub fail_hardware_at: Vec<i64>,
    /// Software sessions fail on packets at these positions
    pub fail_software_at: Vec<i64>,
    pub hardware_created: usize,
    pub software_created: usize,
    /// Packets decoded successfully, by any session
    pub decoded: usize,
}

#[derive(Clone)]
pub struct SyntheticCodecProvider {
    script: Arc<Mutex<CodecScript>>,
}

impl SyntheticCodecProvider {
    pub fn new() -> (Self, Arc<Mutex<CodecScript>>) {
        let script = Arc::new(Mutex::new(CodecScript::default()));
        (
            Self {
                script: Arc::clone(&script),
            },
            script,
        )
    }

    pub fn accelerated() -> (Self, Arc<Mutex<CodecScript>>) {
        let (provider, script) = Self::new();
        script.lock().accelerate = true;
        (provider, script)
    }
}

impl CodecProvider for SyntheticCodecProvider {
    fn can_accelerate(&self, stream: &StreamDescriptor) -> bool {
        stream.kind == MediaKind::Video && self.script.lock().accelerate
    }

    fn hardware(&self, stream: &StreamDescriptor) -> Result<Box<dyn CodecBackend>> {
        let mut script = self.script.lock();
        if script.hardware_init_fails {
            return Err(Error::DecoderInit("scripted hardware init failure".to_string()));
        }
        script.hardware_created += 1;
        Ok(Box::new(SyntheticBackend::new(stream, true, Arc::clone(&self.script))))
    }

    fn software(&self, stream: &StreamDescriptor) -> Result<Box<dyn CodecBackend>> {
        self.script.lock().software_created += 1;
        Ok(Box::new(SyntheticBackend::new(stream, false, Arc::clone(&self.script))))
    }
}

struct SyntheticBackend {
    kind: MediaKind,
    fps: u32,
    hardware: bool,
    script: Arc<Mutex<CodecScript>>,
}

impl SyntheticBackend {
    fn new(stream: &StreamDescriptor, hardware: bool, script: Arc<Mutex<CodecScript>>) -> Self {
        Self {
            kind: stream.kind,
            fps: stream.fps().max(1),
            hardware,
            script,
        }
    }
}

impl CodecBackend for SyntheticBackend {
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, packet: &Packet) -> Result<Vec<RawUnit>> {
        let mut script = self.script.lock();
        let failures = if self.hardware {
            &script.fail_hardware_at
        } else {
            &script.fail_software_at
        };
        if failures.contains(&packet.position) {
            return Err(Error::decode(
                packet.is_key,
                format!("scripted failure at {}", packet.position),
            ));
        }
        script.decoded += 1;

        let content = match self.kind {
            MediaKind::Audio => {
                let sample_frames = (AUDIO_SAMPLE_RATE / self.fps) as usize;
                RawContent::Samples {
                    data: vec![0.25; sample_frames * usize::from(AUDIO_CHANNELS)],
                    channels: AUDIO_CHANNELS,
                    sample_rate: AUDIO_SAMPLE_RATE,
                }
            }
            _ => RawContent::Pixels {
                data: Bytes::from(vec![packet.position as u8; 4 * 2 * 4]),
                width: 4,
                height: 2,
            },
        };
        Ok(vec![RawUnit::new(packet.position, packet.duration, content)])
    }

    fn flush(&mut self) {}

    fn shutdown(&mut self) {}
}
