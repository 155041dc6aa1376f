//! Source: demux state machine
//!
//! Owns the demuxer, the stream table and one Track per selected kind. A
//! single read thread (`hplayer-read`) opens the container, then routes
//! packets to the Tracks until end of file, failure or shutdown:
//!
//! ```text
//! Idle ─► Opening ─► Opened ─► Reading ⇄ Seeking ⇄ Paused ─► Finished | Closed | Failed
//! ```
//!
//! Buffering is driven by the Tracks' capacity callbacks: every change feeds
//! the buffer policy, which pauses reading when enough is buffered, resumes
//! it when the buffer runs low, and steps the video bitrate ladder.
//!
//! Loop playback reads the next pass into each Track's loop queue while the
//! current pass drains. Once every Track has drained, the loop queues are
//! promoted under the loop lock and the clock starts a new serial.

use crate::codec::CodecProvider;
use crate::demux::{Demuxer, OpenOptions, ReadOutcome};
use crate::error::{Error, Result};
use crate::media::{Packet, PayloadPool, StreamDescriptor, StreamInfo};
use crate::playback::buffer_policy::{AdaptationState, BufferPolicy, BufferSnapshot};
use crate::playback::clock::PositionClock;
use crate::playback::sync_gateway::SyncGateway;
use crate::playback::track::{Track, TrackContext, TrackDelegate};
use hplayer_common::{CodecState, MediaKind, PlayerConfig, SourceState};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Interval at which a read loop waiting for a loop swap re-checks its state
const LOOP_SWAP_POLL: Duration = Duration::from_millis(20);

/// One-shot seek completion, invoked from the read thread
pub type SeekCompletion = Box<dyn FnOnce(bool) + Send + 'static>;

/// Callbacks from a Source to its owner (the Player)
pub trait SourceDelegate: Send + Sync {
    /// Container opened and streams selected
    fn source_did_open(&self, duration: f64);

    /// Terminal open or read failure (reported once)
    fn source_did_fail(&self, error: &Error);

    /// A new buffering snapshot
    fn source_did_change_buffering(&self, snapshot: &BufferSnapshot);

    /// Adaptive switch between two video bitrates
    fn source_did_switch_bitrate(&self, old_bit_rate: u64, new_bit_rate: u64);

    /// A track ran out of frames; `all_finished` once every track has
    fn source_did_finish_track(&self, kind: MediaKind, all_finished: bool);

    /// Terminal decode failure on one track
    fn source_did_fail_track(&self, kind: MediaKind, error: &Error);
}

struct PendingSeek {
    target: f64,
    completion: Option<SeekCompletion>,
}

struct Control {
    state: SourceState,
    seek: Option<PendingSeek>,
}

/// Stream table and container properties, fixed once opened
#[derive(Default)]
struct MediaInfo {
    streams: Arc<Vec<StreamDescriptor>>,
    enabled: Vec<bool>,
    duration: f64,
    start_time: f64,
    rotation: i32,
    natural_size: (u32, u32),
    seekable: bool,
}

#[derive(Default)]
struct Tracks {
    audio: Option<Arc<Track>>,
    video: Option<Arc<Track>>,
}

impl Tracks {
    fn all(&self) -> Vec<Arc<Track>> {
        self.audio.iter().chain(self.video.iter()).cloned().collect()
    }
}

/// Serialized buffering decisions
struct CapacityState {
    policy: BufferPolicy,
    is_first: bool,
    is_seek: bool,
    adaptation: Option<AdaptationState>,
}

#[derive(Default)]
struct LoopState {
    swapping: bool,
}

/// Demux state machine for one media locator
pub struct Source {
    locator: String,
    config: Arc<PlayerConfig>,
    provider: Arc<dyn CodecProvider>,
    pool: PayloadPool,
    clock: Arc<PositionClock>,
    gateway: Arc<SyncGateway>,
    delegate: Weak<dyn SourceDelegate>,
    weak_self: Weak<Source>,

    demuxer: Mutex<Box<dyn Demuxer>>,
    control: Mutex<Control>,
    signal: Condvar,
    media: RwLock<MediaInfo>,
    tracks: RwLock<Tracks>,
    capacity: Mutex<CapacityState>,
    loop_lock: Mutex<LoopState>,
    loop_signal: Condvar,
    reader: Mutex<Option<JoinHandle<()>>>,

    /// Set once "all finished" was reported for the current pass
    drained_reported: AtomicBool,
    failure_reported: AtomicBool,
    closed: AtomicBool,
}

impl Source {
    pub fn new(
        locator: impl Into<String>,
        config: Arc<PlayerConfig>,
        demuxer: Box<dyn Demuxer>,
        provider: Arc<dyn CodecProvider>,
        delegate: Weak<dyn SourceDelegate>,
    ) -> Arc<Self> {
        let clock = Arc::new(PositionClock::new());
        let gateway = Arc::new(SyncGateway::new(Arc::clone(&clock)));
        let policy = BufferPolicy::new(Arc::clone(&config));

        Arc::new_cyclic(|weak_self| Self {
            locator: locator.into(),
            config,
            provider,
            pool: PayloadPool::new(),
            clock,
            gateway,
            delegate,
            weak_self: weak_self.clone(),
            demuxer: Mutex::new(demuxer),
            control: Mutex::new(Control {
                state: SourceState::Idle,
                seek: None,
            }),
            signal: Condvar::new(),
            media: RwLock::new(MediaInfo::default()),
            tracks: RwLock::new(Tracks::default()),
            capacity: Mutex::new(CapacityState {
                policy,
                is_first: true,
                is_seek: false,
                adaptation: None,
            }),
            loop_lock: Mutex::new(LoopState::default()),
            loop_signal: Condvar::new(),
            reader: Mutex::new(None),
            drained_reported: AtomicBool::new(false),
            failure_reported: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> SourceState {
        self.control.lock().state
    }

    pub fn gateway(&self) -> &Arc<SyncGateway> {
        &self.gateway
    }

    pub fn clock(&self) -> &Arc<PositionClock> {
        &self.clock
    }

    pub fn audio_track(&self) -> Option<Arc<Track>> {
        self.tracks.read().audio.clone()
    }

    pub fn video_track(&self) -> Option<Arc<Track>> {
        self.tracks.read().video.clone()
    }

    fn all_tracks(&self) -> Vec<Arc<Track>> {
        self.tracks.read().all()
    }

    fn track_for(&self, kind: MediaKind) -> Option<Arc<Track>> {
        match kind {
            MediaKind::Audio => self.audio_track(),
            MediaKind::Video => self.video_track(),
            MediaKind::Subtitle => None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.media.read().duration
    }

    pub fn start_time(&self) -> f64 {
        self.media.read().start_time
    }

    /// Display rotation of the selected video stream in degrees
    pub fn rotation(&self) -> i32 {
        self.media.read().rotation
    }

    /// Coded size of the selected video stream (unrotated)
    pub fn natural_size(&self) -> (u32, u32) {
        self.media.read().natural_size
    }

    pub fn seekable(&self) -> bool {
        let media = self.media.read();
        media.duration > 0.0 && media.seekable
    }

    /// Nominal fps of the video track, else of the audio track
    pub fn nominal_frame_rate(&self) -> u32 {
        self.video_track()
            .or_else(|| self.audio_track())
            .map(|track| track.fps())
            .unwrap_or(0)
    }

    /// Playback time relative to the container start
    pub fn current_playback_time(&self) -> f64 {
        (self.clock.position() - self.start_time()).max(0.0)
    }

    /// Streams of `kind` with their enabled flags
    pub fn streams(&self, kind: MediaKind) -> Vec<StreamInfo> {
        let media = self.media.read();
        media
            .streams
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| StreamInfo::from_descriptor(s, media.enabled.get(s.index).copied().unwrap_or(false)))
            .collect()
    }

    /// Open and start reading on the read thread
    pub fn prepare_to_play(&self) -> Result<()> {
        {
            let mut control = self.control.lock();
            if control.state != SourceState::Idle {
                return Err(Error::InvalidState(format!(
                    "prepare_to_play in state {:?}",
                    control.state
                )));
            }
            control.state = SourceState::Opening;
        }
        self.spawn_reader()
    }

    fn spawn_reader(&self) -> Result<()> {
        let source = self
            .weak_self
            .upgrade()
            .ok_or_else(|| Error::InvalidState("source dropped".to_string()))?;

        let mut reader = self.reader.lock();
        if let Some(previous) = reader.take() {
            if previous.thread().id() != thread::current().id() {
                let _ = previous.join();
            }
        }
        let handle = thread::Builder::new()
            .name("hplayer-read".to_string())
            .spawn(move || source.run())?;
        *reader = Some(handle);
        Ok(())
    }

    fn run(self: Arc<Self>) {
        debug!("Read thread started ({})", self.locator);
        if self.state() == SourceState::Opening {
            if let Err(e) = self.open() {
                self.fail(e);
                return;
            }
        }
        self.read_loop();
        debug!("Read thread exited (state {:?})", self.state());
    }

    fn open(&self) -> Result<()> {
        let options = OpenOptions::from_config(&self.config);
        let mut demuxer = self.demuxer.lock();
        let info = demuxer.open(&self.locator, &options).map_err(|e| match e {
            Error::Open(_) => e,
            other => Error::Open(other.to_string()),
        })?;
        let streams = info.streams;
        let now = Instant::now();

        let mut media = MediaInfo {
            enabled: vec![false; streams.len()],
            duration: info.duration,
            start_time: info.start_time,
            seekable: demuxer.seekable(),
            ..MediaInfo::default()
        };
        let mut adaptation = None;

        let mut video = None;
        if !options.video_disable {
            let candidates: Vec<&StreamDescriptor> =
                streams.iter().filter(|s| s.kind == MediaKind::Video).collect();
            let bit_rates: Vec<u64> = candidates.iter().map(|s| s.bit_rate).collect();
            let wanted = self.config.wanted_video(&bit_rates).map(|i| candidates[i].index);
            video = demuxer.find_best_stream(&streams, MediaKind::Video, wanted, None);

            if let Some(stream) = video.and_then(|index| streams.get(index)) {
                media.rotation = stream.rotation;
                media.natural_size = (stream.width, stream.height);
                self.clock.reset(stream.start_seconds(), 0);
                if candidates.len() > 1 && self.config.video_adaptable {
                    adaptation = Some(AdaptationState::new(bit_rates, stream.fps(), stream.bit_rate, now));
                }
            }
        }

        let mut audio = None;
        if !options.audio_disable {
            audio = self.pick_audio(demuxer.as_ref(), &streams, video);
        }
        drop(demuxer);

        if audio.is_none() && video.is_none() {
            return Err(Error::NoPlayableStreams);
        }
        for index in audio.iter().chain(video.iter()) {
            media.enabled[*index] = true;
        }
        self.clock.set_audio_stalled(audio.is_none());

        let streams = Arc::new(streams);
        media.streams = Arc::clone(&streams);
        let audio_track = audio.map(|index| self.create_track(MediaKind::Audio, index, &streams)).transpose()?;
        let video_track = video.map(|index| self.create_track(MediaKind::Video, index, &streams)).transpose()?;

        info!(
            "Opened {} (duration {:.3}s, audio {:?}, video {:?})",
            self.locator, media.duration, audio, video
        );
        let duration = media.duration;
        *self.media.write() = media;
        *self.tracks.write() = Tracks {
            audio: audio_track.clone(),
            video: video_track.clone(),
        };
        self.capacity.lock().adaptation = adaptation;
        self.gateway.attach(audio_track, video_track);

        if !self.transition(SourceState::Opening, SourceState::Opened) {
            return Ok(());
        }
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.source_did_open(duration);
        }
        self.transition(SourceState::Opened, SourceState::Reading);
        Ok(())
    }

    fn pick_audio(
        &self,
        demuxer: &dyn Demuxer,
        streams: &[StreamDescriptor],
        related: Option<usize>,
    ) -> Option<usize> {
        let candidates: Vec<&StreamDescriptor> =
            streams.iter().filter(|s| s.kind == MediaKind::Audio).collect();
        let infos: Vec<(u64, Option<String>)> = candidates
            .iter()
            .map(|s| (s.bit_rate, s.language.clone()))
            .collect();
        let wanted = self.config.wanted_audio(&infos).map(|i| candidates[i].index);
        demuxer.find_best_stream(streams, MediaKind::Audio, wanted, related)
    }

    fn create_track(
        &self,
        kind: MediaKind,
        stream_index: usize,
        streams: &Arc<Vec<StreamDescriptor>>,
    ) -> Result<Arc<Track>> {
        let delegate: Weak<dyn TrackDelegate> = self.weak_self.clone();
        Track::new(
            kind,
            stream_index,
            TrackContext {
                config: Arc::clone(&self.config),
                streams: Arc::clone(streams),
                provider: Arc::clone(&self.provider),
                pool: self.pool.clone(),
                clock: Arc::clone(&self.clock),
                delegate,
            },
        )
    }

    fn transition(&self, from: SourceState, to: SourceState) -> bool {
        let mut control = self.control.lock();
        if control.state == from {
            control.state = to;
            debug!("Source state {:?} -> {:?}", from, to);
            true
        } else {
            false
        }
    }

    fn read_loop(&self) {
        for track in self.all_tracks() {
            track.decode();
        }

        loop {
            let state = {
                let mut control = self.control.lock();
                while control.state == SourceState::Paused {
                    self.signal.wait(&mut control);
                }
                control.state
            };
            match state {
                SourceState::Seeking => self.perform_seek(),
                SourceState::Reading => {
                    if !self.read_once() {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    /// Read and route one unit; `false` when the read loop should exit
    fn read_once(&self) -> bool {
        let outcome = self.demuxer.lock().read_packet();
        match outcome {
            Ok(ReadOutcome::Packet(packet)) => {
                if packet.size > 0 {
                    self.route(packet);
                }
                true
            }
            Ok(ReadOutcome::EndOfFile) => self.handle_end_of_file(),
            Err(e) => {
                let e = match e {
                    Error::Read(_) => e,
                    other => Error::Read(other.to_string()),
                };
                self.fail(e);
                false
            }
        }
    }

    fn route(&self, packet: Packet) {
        let kind = {
            let media = self.media.read();
            if !media.enabled.get(packet.stream_index).copied().unwrap_or(false) {
                return;
            }
            match media.streams.get(packet.stream_index) {
                Some(stream) => stream.kind,
                None => return,
            }
        };
        if let Some(track) = self.track_for(kind) {
            track.put_packet(packet);
        }
    }

    fn handle_end_of_file(&self) -> bool {
        if !self.config.is_loop_play {
            for track in self.all_tracks() {
                track.set_end_of_file(true);
            }
            if self.transition(SourceState::Reading, SourceState::Finished) {
                info!("Source reached end of file");
                return false;
            }
            return true;
        }

        {
            let mut guard = self.loop_lock.lock();
            // The next pass was read before the current one finished playing
            while guard.swapping || self.all_tracks().iter().any(|t| t.is_loop_mode()) {
                if self.state() != SourceState::Reading {
                    return true;
                }
                self.loop_signal.wait_for(&mut guard, LOOP_SWAP_POLL);
            }
            for track in self.all_tracks() {
                track.enter_loop_mode();
            }
        }

        let start = self.start_time();
        if self.demuxer.lock().seek(start) {
            debug!("End of file, reading next loop pass");
            return true;
        }

        warn!("Loop rewind failed, finishing playback");
        for track in self.all_tracks() {
            track.set_end_of_file(true);
        }
        !self.transition(SourceState::Reading, SourceState::Finished)
    }

    /// Request a seek to `time` (seconds from the container start)
    pub fn seek(&self, time: f64, completion: SeekCompletion) {
        let target = time + self.start_time();
        let restart = {
            let mut control = self.control.lock();
            match control.state {
                SourceState::Reading | SourceState::Paused | SourceState::Finished => {
                    let restart = control.state == SourceState::Finished;
                    control.seek = Some(PendingSeek {
                        target,
                        completion: Some(completion),
                    });
                    control.state = SourceState::Seeking;
                    restart
                }
                state => {
                    drop(control);
                    debug!("Seek ignored in state {:?}", state);
                    completion(false);
                    return;
                }
            }
        };

        self.clock.advance_serial();
        // A finished audio track stalled the clock; the seek brings it back
        self.clock.set_audio_stalled(self.audio_track().is_none());
        debug!("Seek requested to {:.3}s", target);
        self.signal.notify_all();

        if restart {
            if let Err(e) = self.spawn_reader() {
                self.fail(e);
            }
        }
    }

    fn perform_seek(&self) {
        let Some(mut pending) = self.control.lock().seek.take() else {
            self.transition(SourceState::Seeking, SourceState::Reading);
            return;
        };

        let success = self.demuxer.lock().seek(pending.target);
        if self.state() == SourceState::Closed {
            if let Some(completion) = pending.completion.take() {
                completion(false);
            }
            return;
        }

        for track in self.all_tracks() {
            track.seek(pending.target);
        }
        self.drained_reported.store(false, Ordering::Release);
        self.gateway.reset(pending.target, self.clock.serial());
        self.capacity.lock().is_seek = true;
        self.transition(SourceState::Seeking, SourceState::Reading);

        info!("Seek to {:.3}s {}", pending.target, if success { "completed" } else { "failed" });
        if let Some(completion) = pending.completion.take() {
            completion(success);
        }
    }

    /// Stop reading (buffer full)
    pub fn pause(&self) {
        if self.transition(SourceState::Reading, SourceState::Paused) {
            debug!("Reading paused");
        }
    }

    /// Resume reading (buffer low)
    pub fn resume(&self) {
        if self.transition(SourceState::Paused, SourceState::Reading) {
            debug!("Reading resumed");
            self.signal.notify_all();
        }
    }

    /// Enable `stream_index` for its kind and decode it from the current time
    pub fn select(&self, stream_index: usize) -> Result<()> {
        let kind = {
            let mut media = self.media.write();
            let kind = media
                .streams
                .get(stream_index)
                .map(|s| s.kind)
                .ok_or_else(|| Error::InvalidState(format!("no stream {}", stream_index)))?;
            let streams = Arc::clone(&media.streams);
            for stream in streams.iter().filter(|s| s.kind == kind) {
                media.enabled[stream.index] = stream.index == stream_index;
            }
            kind
        };

        let track = self
            .track_for(kind)
            .ok_or_else(|| Error::InvalidState(format!("no {} track", kind)))?;
        track.set_active_stream(stream_index);
        info!("Selected {} stream {}", kind, stream_index);

        if matches!(kind, MediaKind::Audio | MediaKind::Video) {
            let time = self.current_playback_time();
            self.seek(
                time,
                Box::new(move |success| debug!("Reposition after stream select: {}", success)),
            );
        }
        Ok(())
    }

    fn fail(&self, error: Error) {
        {
            let mut control = self.control.lock();
            if control.state == SourceState::Closed {
                return;
            }
            control.state = SourceState::Failed;
        }
        self.signal.notify_all();
        if self.failure_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        error!("Source failed: {}", error);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.source_did_fail(&error);
        }
    }

    fn try_switch_bitrate(&self, capacity: &mut CapacityState, snapshot: &BufferSnapshot, now: Instant) {
        let Some(video) = self.video_track() else {
            return;
        };
        if video.is_end_of_file() {
            return;
        }
        let current_time = self.current_playback_time();
        let CapacityState { policy, adaptation, .. } = capacity;
        let Some(adaptation) = adaptation.as_mut() else {
            return;
        };
        adaptation.loaded_count = video.packet_count() + video.frame_count();
        adaptation.current_playback_time = current_time;
        adaptation.is_playable = snapshot.is_playable;

        let Some((old, new)) = policy.decide_bitrate_switch(adaptation, now) else {
            return;
        };

        let new_index = {
            let mut media = self.media.write();
            let streams = Arc::clone(&media.streams);
            let Some(new_index) = streams
                .iter()
                .find(|s| s.kind == MediaKind::Video && s.bit_rate == new)
                .map(|s| s.index)
            else {
                return;
            };
            for stream in streams.iter().filter(|s| s.kind == MediaKind::Video) {
                if stream.bit_rate == old {
                    media.enabled[stream.index] = false;
                }
            }
            media.enabled[new_index] = true;
            new_index
        };
        video.set_active_stream(new_index);

        if let Some(audio) = self.audio_track() {
            let streams = Arc::clone(&self.media.read().streams);
            let picked = {
                let demuxer = self.demuxer.lock();
                self.pick_audio(demuxer.as_ref(), &streams, Some(new_index))
            };
            if let Some(index) = picked.filter(|index| *index != audio.active_stream()) {
                {
                    let mut media = self.media.write();
                    for stream in streams.iter().filter(|s| s.kind == MediaKind::Audio) {
                        media.enabled[stream.index] = stream.index == index;
                    }
                }
                audio.set_active_stream(index);
            }
        }

        adaptation.record(new, now);
        info!("Video bitrate switched {} -> {}", old, new);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.source_did_switch_bitrate(old, new);
        }
    }

    /// Report `kind` finished and run the loop swap once everything drained
    fn evaluate_drained(&self, kind: MediaKind) {
        let all_drained = self.all_tracks().iter().all(|t| t.is_drained())
            && !self.drained_reported.swap(true, Ordering::AcqRel);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.source_did_finish_track(kind, all_drained);
        }
        if all_drained && self.config.is_loop_play {
            self.swap_loop_pass();
        }
    }

    fn swap_loop_pass(&self) {
        let tracks = {
            let mut loop_state = self.loop_lock.lock();
            let tracks = self.all_tracks();
            if loop_state.swapping
                || !tracks.iter().all(|t| t.is_drained())
                || !tracks.iter().any(|t| t.is_loop_mode())
            {
                return;
            }
            loop_state.swapping = true;
            self.drained_reported.store(false, Ordering::Release);

            let serial = self.gateway.begin_loop(self.start_time());
            self.clock.set_audio_stalled(self.audio_track().is_none());
            info!("Loop restart (serial {})", serial);
            tracks
        };

        for track in &tracks {
            track.leave_loop_mode();
        }

        self.loop_lock.lock().swapping = false;
        self.loop_signal.notify_all();
        self.signal.notify_all();

        if self.transition(SourceState::Finished, SourceState::Reading) {
            if let Err(e) = self.spawn_reader() {
                self.fail(e);
            }
        }
    }

    /// Stop reading, shut every Track down and close the demuxer
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pending = {
            let mut control = self.control.lock();
            control.state = SourceState::Closed;
            control.seek.take()
        };
        self.signal.notify_all();
        self.loop_signal.notify_all();

        let handle = self.reader.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        let tracks = std::mem::take(&mut *self.tracks.write());
        for track in tracks.all() {
            track.shutdown();
        }
        self.gateway.detach();
        self.demuxer.lock().close();
        self.pool.clear();

        if let Some(completion) = pending.and_then(|p| p.completion) {
            completion(false);
        }
        info!("Source closed ({})", self.locator);
    }
}

impl TrackDelegate for Source {
    fn codec_did_change_capacity(&self, _kind: MediaKind) {
        let loads: Vec<_> = self.all_tracks().iter().map(|t| t.load()).collect();
        if loads.is_empty() {
            return;
        }

        let mut capacity = self.capacity.lock();
        let now = Instant::now();
        let (is_first, is_seek) = (capacity.is_first, capacity.is_seek);
        let Some(snapshot) = capacity.policy.compute_snapshot(&loads, is_first, is_seek, now) else {
            return;
        };

        if let Some(delegate) = self.delegate.upgrade() {
            delegate.source_did_change_buffering(&snapshot);
        }

        let max_buffer = self.config.max_buffer_duration;
        if snapshot.is_playable {
            capacity.is_first = false;
            capacity.is_seek = false;
            if snapshot.loaded_time > max_buffer {
                self.try_switch_bitrate(&mut capacity, &snapshot, now);
                self.pause();
            } else if snapshot.loaded_time < max_buffer / 2.0 {
                self.resume();
            }
        } else {
            self.resume();
            self.try_switch_bitrate(&mut capacity, &snapshot, now);
        }
    }

    fn codec_did_finished(&self, kind: MediaKind) {
        if kind == MediaKind::Audio {
            self.clock.set_audio_stalled(true);
        }
        self.evaluate_drained(kind);
    }

    fn codec_did_fail(&self, kind: MediaKind, error: &Error) {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.source_did_fail_track(kind, error);
        }
        if kind == MediaKind::Audio {
            self.clock.set_audio_stalled(true);
        }

        let tracks = self.all_tracks();
        if tracks.iter().all(|t| t.state() == CodecState::Failed) {
            self.fail(Error::InvalidState(format!("every track failed, last: {}", error)));
            return;
        }
        if tracks.iter().all(|t| t.is_drained()) {
            self.evaluate_drained(kind);
        }
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("locator", &self.locator)
            .field("state", &self.state())
            .field("duration", &self.duration())
            .finish()
    }
}
