//! Test helper modules for hplayer-core integration tests
//!
//! - synthetic: scripted demuxer and codec provider with failure injection
//! - audio_generator: WAV fixtures for the symphonia backend

#![allow(dead_code)]

pub mod audio_generator;
pub mod synthetic;

pub use audio_generator::{generate_mono_wav, generate_sine_wav, TEST_SAMPLE_RATE};
pub use synthetic::{CodecScript, DemuxScript, StreamSpec, SyntheticCodecProvider, SyntheticDemuxer};

use hplayer_common::{MediaKind, PlayerConfig};
use hplayer_core::SyncGateway;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Compiled defaults with a short snapshot throttle
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        snapshot_throttle_ms: 0,
        ..PlayerConfig::default()
    }
}

pub fn shared(config: PlayerConfig) -> Arc<PlayerConfig> {
    Arc::new(config)
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Generous bound for anything the engine threads should finish quickly
pub const SETTLE: Duration = Duration::from_secs(10);

/// Sample frames pulled per `render_until` period
pub const RENDER_FRAMES: usize = 1024;

/// Act as both render backends until `done` holds or `timeout` elapses
///
/// Audio is pulled in `RENDER_FRAMES` chunks and every due video frame is
/// consumed and reported back. Returns the audio sample frames rendered, or
/// `None` on timeout.
pub fn render_until<F>(gateway: &SyncGateway, timeout: Duration, mut done: F) -> Option<usize>
where
    F: FnMut() -> bool,
{
    let mut buffer = vec![0.0f32; RENDER_FRAMES * 2];
    let deadline = Instant::now() + timeout;
    let mut rendered = 0;
    while !done() {
        if Instant::now() >= deadline {
            return None;
        }
        let filled = gateway.fill_audio(&mut buffer, 2);
        rendered += filled;
        let mut shown = 0;
        while let Some(frame) = gateway.get_next_frame(MediaKind::Video) {
            gateway.publish_rendered_position(MediaKind::Video, frame.seconds(), frame.serial);
            shown += 1;
        }
        if filled == 0 && shown == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
    Some(rendered)
}
