//! Shared position clock
//!
//! One clock per Source. The authoritative writer is the audio render side
//! whenever an audio track exists; otherwise video publishes its own
//! positions and paces itself against wall-clock time.
//!
//! Positions are grouped into serials. A serial starts on seek and on loop
//! restart; within one serial the position never goes backwards.

use parking_lot::Mutex;
use std::time::Instant;
use tracing::trace;

#[derive(Debug)]
struct ClockState {
    position: f64,
    serial: u64,
    audio_stalled: bool,
    video_media_time: Instant,
    running: bool,
}

/// Position clock shared by the Source, its Tracks and the gateway
#[derive(Debug)]
pub struct PositionClock {
    state: Mutex<ClockState>,
}

impl PositionClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ClockState {
                position: 0.0,
                serial: 0,
                audio_stalled: true,
                video_media_time: Instant::now(),
                running: false,
            }),
        }
    }

    /// Current position in seconds
    pub fn position(&self) -> f64 {
        self.state.lock().position
    }

    pub fn serial(&self) -> u64 {
        self.state.lock().serial
    }

    /// Start a new serial and return it; the position is left untouched
    pub fn advance_serial(&self) -> u64 {
        let mut state = self.state.lock();
        state.serial += 1;
        state.serial
    }

    /// Force the position for a serial (seek target, loop start)
    pub fn reset(&self, position: f64, serial: u64) {
        let mut state = self.state.lock();
        state.position = position;
        state.serial = state.serial.max(serial);
        state.video_media_time = Instant::now();
        trace!("Clock reset to {:.3}s (serial {})", position, state.serial);
    }

    /// Publish a rendered position
    ///
    /// Returns whether the clock moved. Older serials are ignored, a newer
    /// serial replaces the position, and within a serial the clock only
    /// moves forward.
    pub fn publish(&self, position: f64, serial: u64) -> bool {
        let mut state = self.state.lock();
        if serial < state.serial {
            return false;
        }
        if serial > state.serial {
            state.serial = serial;
            state.position = position;
            return true;
        }
        if position > state.position {
            state.position = position;
            return true;
        }
        false
    }

    pub fn is_audio_stalled(&self) -> bool {
        self.state.lock().audio_stalled
    }

    pub fn set_audio_stalled(&self, stalled: bool) {
        self.state.lock().audio_stalled = stalled;
    }

    pub fn video_media_time(&self) -> Instant {
        self.state.lock().video_media_time
    }

    pub fn mark_video_rendered(&self, now: Instant) {
        self.state.lock().video_media_time = now;
    }

    /// Position video may render up to at `now`
    ///
    /// With audio stalled or absent, wall-clock time since the last video
    /// delivery is added so video paces itself.
    pub fn video_deadline(&self, now: Instant) -> f64 {
        let state = self.state.lock();
        if state.audio_stalled {
            state.position + now.saturating_duration_since(state.video_media_time).as_secs_f64()
        } else {
            state.position
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Start or stop the clock; starting re-bases the video media time
    pub fn set_running(&self, running: bool) {
        let mut state = self.state.lock();
        if running && !state.running {
            state.video_media_time = Instant::now();
        }
        state.running = running;
    }
}

impl Default for PositionClock {
    fn default() -> Self {
        Self::new()
    }
}
