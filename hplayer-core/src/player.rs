//! Player facade
//!
//! Wraps one Source with playback and load state, loop counting and the
//! `PlayerEvent` stream. Render backends pull through `gateway()`; the
//! gateway only delivers while playback is `Playing`.

use crate::codec::CodecProvider;
use crate::demux::Demuxer;
use crate::error::{Error, Result};
use crate::media::StreamInfo;
use crate::playback::{BufferSnapshot, Source, SourceDelegate, SyncGateway};
use hplayer_common::{time, EventBus, LoadState, MediaKind, PlaybackState, PlayerConfig, PlayerEvent, SourceState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Event channel depth; slow subscribers lag rather than block the engine
const EVENT_CAPACITY: usize = 512;

#[derive(Debug)]
struct PlayerStatus {
    playback: PlaybackState,
    load: LoadState,
    progress: u8,
    playable_time: f64,
    prepared: bool,
    loop_count: u32,
    /// Playback state to return to once a seek completes
    before_seek: Option<PlaybackState>,
}

/// Playback facade over one media locator
pub struct Player {
    session_id: Uuid,
    config: Arc<PlayerConfig>,
    source: Arc<Source>,
    events: EventBus,
    status: Mutex<PlayerStatus>,
    weak_self: Weak<Player>,
    shut_down: AtomicBool,
}

impl Player {
    pub fn new(
        locator: impl Into<String>,
        config: Arc<PlayerConfig>,
        demuxer: Box<dyn Demuxer>,
        codecs: Arc<dyn CodecProvider>,
    ) -> Arc<Self> {
        let locator = locator.into();
        Arc::new_cyclic(|weak_self: &Weak<Player>| {
            let delegate: Weak<dyn SourceDelegate> = weak_self.clone();
            let source = Source::new(locator, Arc::clone(&config), demuxer, codecs, delegate);
            Self {
                session_id: Uuid::new_v4(),
                config,
                source,
                events: EventBus::new(EVENT_CAPACITY),
                status: Mutex::new(PlayerStatus {
                    playback: PlaybackState::Idle,
                    load: LoadState::Idle,
                    progress: 0,
                    playable_time: 0.0,
                    prepared: false,
                    loop_count: 0,
                    before_seek: None,
                }),
                weak_self: weak_self.clone(),
                shut_down: AtomicBool::new(false),
            }
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn config(&self) -> &Arc<PlayerConfig> {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Render pull surface
    pub fn gateway(&self) -> Arc<SyncGateway> {
        Arc::clone(self.source.gateway())
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    /// Open the media and start buffering
    pub fn prepare(&self) -> Result<()> {
        self.set_load_state(LoadState::Loading, 0);
        self.source.prepare_to_play()
    }

    pub fn play(&self) {
        let from = self.playback_state();
        match from {
            PlaybackState::Playing | PlaybackState::Stopped => return,
            PlaybackState::Finished => {
                // Replay from the start
                self.set_playback_state(PlaybackState::Playing);
                self.seek(0.0, |_| {});
                return;
            }
            _ => {}
        }
        if !self.is_prepared() {
            debug!("play() before prepared; starting once opened");
        }
        self.set_playback_state(PlaybackState::Playing);
    }

    pub fn pause(&self) {
        let playback = self.playback_state();
        if matches!(playback, PlaybackState::Playing | PlaybackState::Seeking) {
            self.set_playback_state(PlaybackState::Paused);
        }
    }

    /// Seek to `seconds` from the start
    ///
    /// Negative times are ignored. With loop playback a target at or past
    /// the end wraps to 0. `completion` runs exactly once.
    pub fn seek<F>(&self, seconds: f64, completion: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        if seconds < 0.0 || !seconds.is_finite() {
            warn!("Ignoring seek to {}", seconds);
            completion(false);
            return;
        }
        let duration = self.duration();
        let target = if self.config.is_loop_play && duration > 0.0 && seconds >= duration {
            0.0
        } else {
            seconds
        };

        {
            let mut status = self.status.lock();
            if status.playback == PlaybackState::Stopped {
                drop(status);
                completion(false);
                return;
            }
            if status.playback != PlaybackState::Seeking {
                status.before_seek = Some(status.playback);
            }
        }
        self.set_playback_state(PlaybackState::Seeking);
        self.set_load_state(LoadState::Loading, 0);

        let player = self.weak_self.clone();
        self.source.seek(
            target,
            Box::new(move |success| {
                if let Some(player) = player.upgrade() {
                    player.seek_did_complete(target, success);
                }
                completion(success);
            }),
        );
    }

    fn seek_did_complete(&self, target: f64, success: bool) {
        let resume = {
            let mut status = self.status.lock();
            let previous = status.before_seek.take();
            if status.playback != PlaybackState::Seeking {
                None
            } else if success && self.config.is_seeked_auto_play {
                Some(PlaybackState::Playing)
            } else {
                match previous {
                    Some(PlaybackState::Playing) => Some(PlaybackState::Playing),
                    // A rejected seek leaves playback where it was
                    Some(state) if !success => Some(state),
                    _ => Some(PlaybackState::Paused),
                }
            }
        };
        if let Some(state) = resume {
            self.set_playback_state(state);
        }
        info!("Seek to {:.3}s completed (success: {})", target, success);
        self.events.emit_lossy(PlayerEvent::SeekCompleted {
            session_id: self.session_id,
            position: target,
            success,
            timestamp: time::now(),
        });
    }

    /// Stop everything; later calls are no-ops
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_playback_state(PlaybackState::Stopped);
        self.source.shutdown();
        info!("Player shut down (session {})", self.session_id);
    }

    pub fn streams(&self, kind: MediaKind) -> Vec<StreamInfo> {
        self.source.streams(kind)
    }

    pub fn select(&self, stream_index: usize) -> Result<()> {
        if self.source.state() == SourceState::Idle {
            return Err(Error::InvalidState("select before prepare".to_string()));
        }
        self.source.select(stream_index)
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.status.lock().playback
    }

    pub fn load_state(&self) -> LoadState {
        self.status.lock().load
    }

    /// Buffering progress 0-100
    pub fn buffering_progress(&self) -> u8 {
        self.status.lock().progress
    }

    /// Seconds of media playable without further buffering
    pub fn playable_time(&self) -> f64 {
        self.status.lock().playable_time
    }

    pub fn current_playback_time(&self) -> f64 {
        self.source.current_playback_time()
    }

    pub fn duration(&self) -> f64 {
        self.source.duration()
    }

    /// Display size, with width and height swapped for 90/270 rotation
    pub fn natural_size(&self) -> (u32, u32) {
        let (width, height) = self.source.natural_size();
        match self.source.rotation().rem_euclid(360) {
            90 | 270 => (height, width),
            _ => (width, height),
        }
    }

    pub fn nominal_frame_rate(&self) -> u32 {
        self.source.nominal_frame_rate()
    }

    pub fn loop_count(&self) -> u32 {
        self.status.lock().loop_count
    }

    pub fn is_prepared(&self) -> bool {
        self.status.lock().prepared
    }

    pub fn is_seekable(&self) -> bool {
        self.source.seekable()
    }

    fn set_playback_state(&self, state: PlaybackState) {
        {
            let mut status = self.status.lock();
            if status.playback == state || status.playback == PlaybackState::Stopped {
                return;
            }
            debug!("Playback state {:?} -> {:?}", status.playback, state);
            status.playback = state;
        }
        self.source.gateway().set_running(state == PlaybackState::Playing);
        self.events.emit_lossy(PlayerEvent::PlaybackStateChanged {
            session_id: self.session_id,
            state,
            timestamp: time::now(),
        });
    }

    fn set_load_state(&self, state: LoadState, progress: u8) {
        {
            let mut status = self.status.lock();
            if status.load == state && status.progress == progress {
                return;
            }
            status.load = state;
            status.progress = progress;
        }
        self.events.emit_lossy(PlayerEvent::LoadStateChanged {
            session_id: self.session_id,
            state,
            progress,
            timestamp: time::now(),
        });
    }
}

impl SourceDelegate for Player {
    fn source_did_open(&self, duration: f64) {
        self.status.lock().prepared = true;
        info!("Prepared (duration {:.3}s)", duration);
        self.events.emit_lossy(PlayerEvent::Prepared {
            session_id: self.session_id,
            duration,
            timestamp: time::now(),
        });
        if self.config.is_auto_play {
            self.play();
        }
    }

    fn source_did_fail(&self, error: &Error) {
        self.set_playback_state(PlaybackState::Stopped);
        self.set_load_state(LoadState::Idle, 0);
        self.events.emit_lossy(PlayerEvent::Failed {
            session_id: self.session_id,
            message: error.to_string(),
            timestamp: time::now(),
        });
    }

    fn source_did_change_buffering(&self, snapshot: &BufferSnapshot) {
        let playable_time = if snapshot.is_end_of_file {
            self.duration()
        } else {
            self.current_playback_time() + snapshot.loaded_time
        };

        let (load, progress, playing) = {
            let mut status = self.status.lock();
            status.playable_time = playable_time;
            (status.load, status.progress, status.playback == PlaybackState::Playing)
        };

        if load == LoadState::Playable {
            let starved = !snapshot.is_end_of_file && snapshot.packet_count == 0 && snapshot.frame_count == 0;
            if starved {
                debug!("Buffer underrun, loading");
                self.set_load_state(LoadState::Loading, if playing { 0 } else { progress });
            }
        } else if snapshot.is_playable {
            self.set_load_state(LoadState::Playable, 100);
        } else {
            let progress = snapshot.progress as u8;
            self.set_load_state(LoadState::Loading, progress);
        }

        self.events.emit_lossy(PlayerEvent::BufferingChanged {
            session_id: self.session_id,
            buffering: snapshot.info(),
            timestamp: time::now(),
        });
    }

    fn source_did_switch_bitrate(&self, old_bit_rate: u64, new_bit_rate: u64) {
        self.events.emit_lossy(PlayerEvent::BitrateChanged {
            session_id: self.session_id,
            old_bit_rate,
            new_bit_rate,
            timestamp: time::now(),
        });
    }

    fn source_did_finish_track(&self, kind: MediaKind, all_finished: bool) {
        self.events.emit_lossy(PlayerEvent::TrackFinished {
            session_id: self.session_id,
            kind,
            all_finished,
            timestamp: time::now(),
        });
        if !all_finished {
            return;
        }

        if self.config.is_loop_play {
            let loop_count = {
                let mut status = self.status.lock();
                status.loop_count += 1;
                status.loop_count
            };
            info!("Loop {} completed", loop_count);
            self.events.emit_lossy(PlayerEvent::LoopCompleted {
                session_id: self.session_id,
                loop_count,
                timestamp: time::now(),
            });
        } else {
            info!("Playback finished");
            self.set_playback_state(PlaybackState::Finished);
        }
    }

    fn source_did_fail_track(&self, kind: MediaKind, error: &Error) {
        self.events.emit_lossy(PlayerEvent::TrackFailed {
            session_id: self.session_id,
            kind,
            message: error.to_string(),
            timestamp: time::now(),
        });
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("session_id", &self.session_id)
            .field("status", &*self.status.lock())
            .field("source", &self.source)
            .finish()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}
