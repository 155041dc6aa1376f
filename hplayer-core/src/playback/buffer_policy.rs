//! Buffering policy
//!
//! Turns per-track occupancy into a playability snapshot and decides adaptive
//! bitrate steps. Both decisions are pure functions of their inputs apart
//! from the snapshot throttle timestamp.

use hplayer_common::events::BufferingInfo;
use hplayer_common::{MediaKind, PlayerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Occupancy of one track at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackLoad {
    pub kind: MediaKind,
    pub packet_count: usize,
    pub frame_count: usize,
    pub frame_max_count: usize,
    pub fps: u32,
    pub is_end_of_file: bool,
}

impl TrackLoad {
    fn loaded_time(&self) -> f64 {
        (self.packet_count + self.frame_count) as f64 / self.fps.max(1) as f64
    }
}

/// Result of one buffering computation
#[derive(Debug, Clone, PartialEq)]
pub struct BufferSnapshot {
    /// Seconds buffered ahead, minimum across tracks
    pub loaded_time: f64,

    /// `loaded_time` as a percentage of the preferred forward buffer, 0-100
    pub progress: f64,

    pub packet_count: usize,
    pub frame_count: usize,
    pub is_end_of_file: bool,
    pub is_playable: bool,
    pub is_first: bool,
    pub is_seek: bool,
}

impl BufferSnapshot {
    pub fn info(&self) -> BufferingInfo {
        BufferingInfo {
            loaded_time: self.loaded_time,
            progress: self.progress,
            packet_count: self.packet_count,
            frame_count: self.frame_count,
            is_end_of_file: self.is_end_of_file,
            is_playable: self.is_playable,
        }
    }
}

/// Bitrate ladder and switch history of the video track
#[derive(Debug, Clone)]
pub struct AdaptationState {
    /// Available bitrates, ascending
    pub bit_rates: Vec<u64>,

    pub fps: u32,

    /// Every selected bitrate with the time it was selected
    pub history: Vec<(u64, Instant)>,

    /// Packets plus frames buffered on the video track
    pub loaded_count: usize,

    pub is_playable: bool,

    pub current_playback_time: f64,
}

impl AdaptationState {
    pub fn new(mut bit_rates: Vec<u64>, fps: u32, initial: u64, now: Instant) -> Self {
        bit_rates.sort_unstable();
        Self {
            bit_rates,
            fps,
            history: vec![(initial, now)],
            loaded_count: 0,
            is_playable: false,
            current_playback_time: 0.0,
        }
    }

    /// Most recently selected bitrate
    pub fn current(&self) -> Option<u64> {
        self.history.last().map(|(rate, _)| *rate)
    }

    pub fn record(&mut self, bit_rate: u64, now: Instant) {
        self.history.push((bit_rate, now));
    }
}

/// Snapshot computation with its throttle state
#[derive(Debug)]
pub struct BufferPolicy {
    config: Arc<PlayerConfig>,
    last_computed: Option<Instant>,
}

impl BufferPolicy {
    pub fn new(config: Arc<PlayerConfig>) -> Self {
        Self {
            config,
            last_computed: None,
        }
    }

    /// Compute a snapshot unless throttled
    ///
    /// The first call, and calls with `is_first` or `is_seek`, always compute.
    pub fn compute_snapshot(
        &mut self,
        tracks: &[TrackLoad],
        is_first: bool,
        is_seek: bool,
        now: Instant,
    ) -> Option<BufferSnapshot> {
        let throttled = match self.last_computed {
            Some(last) => now.saturating_duration_since(last) <= self.config.snapshot_throttle(),
            None => false,
        };
        if throttled && !is_first && !is_seek {
            return None;
        }

        let preferred = self.config.preferred_forward_buffer_duration;
        let loaded_time = tracks
            .iter()
            .map(TrackLoad::loaded_time)
            .reduce(f64::min)
            .unwrap_or(0.0);
        let packet_count = tracks.iter().map(|t| t.packet_count).min().unwrap_or(0);
        let frame_count = tracks.iter().map(|t| t.frame_count).min().unwrap_or(0);
        let is_end_of_file = tracks.iter().all(|t| t.is_end_of_file);
        let is_playable = tracks
            .iter()
            .all(|track| self.is_track_playable(track, is_first, is_seek));

        self.last_computed = Some(now);
        trace!(
            "Buffer snapshot: loaded={:.3}s packets={} frames={} eof={} playable={}",
            loaded_time,
            packet_count,
            frame_count,
            is_end_of_file,
            is_playable
        );

        Some(BufferSnapshot {
            loaded_time,
            progress: (loaded_time * 100.0 / preferred).clamp(0.0, 100.0),
            packet_count,
            frame_count,
            is_end_of_file,
            is_playable,
            is_first,
            is_seek,
        })
    }

    fn is_track_playable(&self, track: &TrackLoad, is_first: bool, is_seek: bool) -> bool {
        let fps = track.fps as usize;
        if is_first || is_seek {
            if track.frame_count >= track.frame_max_count >> 1 {
                // Audio (or fast start) opens as soon as half its frame queue is full
                if track.kind == MediaKind::Audio || self.config.fast_start {
                    if is_first || track.packet_count >= fps {
                        return true;
                    }
                }
            } else {
                return track.is_end_of_file && track.packet_count == 0;
            }
        }
        if track.is_end_of_file {
            return true;
        }
        let wanted = fps * self.config.preferred_forward_buffer_duration.floor() as usize;
        track.packet_count + track.frame_count >= wanted
    }

    /// One-rung step on the bitrate ladder as `(old, new)`
    pub fn decide_bitrate_switch(&self, state: &AdaptationState, now: Instant) -> Option<(u64, u64)> {
        let max_buffer = self.config.max_buffer_duration;
        let (last_rate, last_time) = *state.history.last()?;
        let settle = Duration::from_secs_f64(max_buffer / 2.0);
        if now.saturating_duration_since(last_time) <= settle {
            return None;
        }
        let index = state.bit_rates.iter().position(|rate| *rate == last_rate)?;

        let is_up = state.loaded_count > state.fps as usize * max_buffer.floor() as usize / 2;
        if is_up != state.is_playable {
            return None;
        }

        if is_up {
            state
                .bit_rates
                .get(index + 1)
                .map(|next| (last_rate, *next))
        } else if index > 0 {
            Some((last_rate, state.bit_rates[index - 1]))
        } else {
            None
        }
    }
}
