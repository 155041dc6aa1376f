//! Render pull surface
//!
//! Audio and video render backends run on their own threads and pull frames
//! through the gateway. Audio is the clock master whenever an audio track
//! exists: its published positions move the shared clock, and video frames
//! are only released once the clock has reached them. Without audio (or
//! while audio is stalled) video paces itself against wall-clock time.

use crate::media::{Frame, Payload};
use crate::playback::clock::PositionClock;
use crate::playback::track::Track;
use hplayer_common::MediaKind;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

#[derive(Default)]
struct TrackSlots {
    audio: Option<Arc<Track>>,
    video: Option<Arc<Track>>,
}

/// Partially consumed audio frame carried between `fill_audio` calls
#[derive(Default)]
struct AudioCursor {
    frame: Option<Frame>,
    /// Sample frames of `frame` already handed out
    offset: usize,
    /// Bumped by `reset`; a fill that raced with a reset discards its cursor
    generation: u64,
}

/// Frame delivery and position feedback between render threads and the engine
pub struct SyncGateway {
    clock: Arc<PositionClock>,
    tracks: RwLock<TrackSlots>,
    cursor: Mutex<AudioCursor>,
}

impl SyncGateway {
    pub fn new(clock: Arc<PositionClock>) -> Self {
        Self {
            clock,
            tracks: RwLock::new(TrackSlots::default()),
            cursor: Mutex::new(AudioCursor::default()),
        }
    }

    pub fn clock(&self) -> &Arc<PositionClock> {
        &self.clock
    }

    /// Bind the tracks frames are pulled from
    pub fn attach(&self, audio: Option<Arc<Track>>, video: Option<Arc<Track>>) {
        let mut tracks = self.tracks.write();
        tracks.audio = audio;
        tracks.video = video;
    }

    pub fn detach(&self) {
        *self.tracks.write() = TrackSlots::default();
        let mut cursor = self.cursor.lock();
        cursor.frame = None;
        cursor.offset = 0;
        cursor.generation += 1;
    }

    fn track(&self, kind: MediaKind) -> Option<Arc<Track>> {
        let tracks = self.tracks.read();
        match kind {
            MediaKind::Audio => tracks.audio.clone(),
            MediaKind::Video => tracks.video.clone(),
            MediaKind::Subtitle => None,
        }
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.read().audio.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.clock.is_running()
    }

    /// Start or stop delivery (stopped while the player is not playing)
    pub fn set_running(&self, running: bool) {
        self.clock.set_running(running);
        debug!("Gateway {}", if running { "running" } else { "stopped" });
    }

    /// Next frame of `kind` eligible for rendering now
    ///
    /// Audio pops unconditionally. Video pops only once the frame is due:
    /// its position must not be past the clock (plus elapsed wall time while
    /// audio is stalled). Video frames left over from an older serial are
    /// discarded, never shown.
    pub fn get_next_frame(&self, kind: MediaKind) -> Option<Frame> {
        if !self.clock.is_running() {
            return None;
        }
        let track = self.track(kind)?;
        match kind {
            MediaKind::Video => loop {
                let serial = self.clock.serial();
                let desire = self.clock.video_deadline(Instant::now());
                let frame =
                    track.get_output_render(|frame| frame.serial < serial || frame.seconds() <= desire)?;
                if frame.serial >= serial {
                    return Some(frame);
                }
                trace!(
                    "Stale video frame at {:.3}s discarded (serial {} < {})",
                    frame.seconds(),
                    frame.serial,
                    serial
                );
            },
            _ => track.get_output_render(|_| true),
        }
    }

    /// Feed a rendered position back into the clock
    ///
    /// Audio writes the clock unless it is stalled. Video always refreshes
    /// its media time and writes the position only while audio is stalled.
    pub fn publish_rendered_position(&self, kind: MediaKind, seconds: f64, serial: u64) {
        match kind {
            MediaKind::Audio => {
                if !self.clock.is_audio_stalled() {
                    self.clock.publish(seconds, serial);
                }
            }
            MediaKind::Video => {
                self.clock.mark_video_rendered(Instant::now());
                if self.clock.is_audio_stalled() {
                    self.clock.publish(seconds, serial);
                }
            }
            MediaKind::Subtitle => {}
        }
    }

    /// Fill `out` with interleaved samples for `channels` output channels
    ///
    /// Always fills the whole buffer; any shortfall is silence. Returns the
    /// number of sample frames that came from decoded audio. The position
    /// reached in each frame is published to the clock.
    pub fn fill_audio(&self, out: &mut [f32], channels: u16) -> usize {
        let channels = usize::from(channels.max(1));
        let wanted = out.len() / channels;

        if !self.clock.is_running() {
            out.fill(0.0);
            return 0;
        }
        let Some(track) = self.track(MediaKind::Audio) else {
            out.fill(0.0);
            return 0;
        };

        // Work on a detached cursor: popping may call back into the Source,
        // which may reset the gateway.
        let (mut frame, mut offset, generation) = {
            let mut cursor = self.cursor.lock();
            (cursor.frame.take(), cursor.offset, cursor.generation)
        };

        let mut written = 0;
        let mut reached: Option<(f64, u64)> = None;
        while written < wanted {
            if frame.is_none() {
                // Publish before popping: running dry may mark audio stalled
                if let Some((seconds, serial)) = reached.take() {
                    self.publish_rendered_position(MediaKind::Audio, seconds, serial);
                }
                frame = track.get_output_render(|_| true);
                offset = 0;
            }
            let Some(current) = frame.as_ref() else {
                break;
            };

            let source_channels = match &current.payload {
                Payload::Samples { channels, .. } => usize::from((*channels).max(1)),
                _ => channels,
            };
            let samples = current.samples().unwrap_or(&[]);
            let total = samples.len() / source_channels;
            let count = (total.saturating_sub(offset)).min(wanted - written);

            for i in 0..count {
                let src = (offset + i) * source_channels;
                let dst = (written + i) * channels;
                for ch in 0..channels {
                    out[dst + ch] = samples[src + ch.min(source_channels - 1)];
                }
            }
            written += count;
            offset += count;

            if total > 0 {
                let fraction = offset as f64 / total as f64;
                reached = Some((
                    current.seconds() + current.duration_seconds() * fraction,
                    current.serial,
                ));
            }
            if offset >= total {
                frame = None;
                offset = 0;
            }
        }
        out[written * channels..].fill(0.0);

        {
            let mut cursor = self.cursor.lock();
            if cursor.generation == generation {
                cursor.frame = frame;
                cursor.offset = offset;
            }
        }

        if let Some((seconds, serial)) = reached {
            trace!("Audio reached {:.3}s (serial {})", seconds, serial);
            self.publish_rendered_position(MediaKind::Audio, seconds, serial);
        }
        written
    }

    /// Force the clock after a seek and drop the partially played frame
    pub fn reset(&self, position: f64, serial: u64) {
        {
            let mut cursor = self.cursor.lock();
            cursor.frame = None;
            cursor.offset = 0;
            cursor.generation += 1;
        }
        self.clock.reset(position, serial);
    }

    /// Start a new serial for a loop restart at `position`
    ///
    /// The partially played frame is kept: its tail still plays, and its
    /// positions are ignored because they carry the previous serial.
    pub fn begin_loop(&self, position: f64) -> u64 {
        let serial = self.clock.advance_serial();
        self.clock.reset(position, serial);
        serial
    }
}

impl std::fmt::Debug for SyncGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncGateway")
            .field("clock", &self.clock)
            .field("has_audio", &self.has_audio())
            .finish()
    }
}
