//! Track: per-stream decode pipeline
//!
//! ```text
//!   put_packet() ─► packet queue ─► decode thread ─► Decoder ─► frame queue ─► get_output_render()
//!                   (secondary queue while in loop mode)          (sorted for video)
//! ```
//!
//! One decode thread (`hplayer-decode-<kind>`) runs per Track at a time. It
//! exits when the Track finishes, fails or closes, and `decode()` restarts
//! it. Every change of packet or frame occupancy is reported to the
//! `TrackDelegate` (the Source), which drives buffering decisions.
//!
//! Locks are never held across delegate calls.

use crate::codec::{CodecProvider, Decoder, DecoderKind, Normalizer};
use crate::error::{Error, Result};
use crate::media::{Frame, Packet, PayloadPool, StreamDescriptor};
use crate::playback::buffer_policy::TrackLoad;
use crate::playback::clock::PositionClock;
use crate::playback::queue::{QueueOptions, Timed, TimedQueue};
use hplayer_common::{CodecState, MediaKind, PlayerConfig};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Callbacks from a Track to its owner
pub trait TrackDelegate: Send + Sync {
    /// Packet or frame occupancy changed
    fn codec_did_change_capacity(&self, kind: MediaKind);

    /// The track is finished and its frame queue is empty
    fn codec_did_finished(&self, kind: MediaKind);

    /// Terminal decode failure
    fn codec_did_fail(&self, kind: MediaKind, error: &Error);
}

/// Everything a Track needs from its Source
pub struct TrackContext {
    pub config: Arc<PlayerConfig>,
    /// Full stream table of the Source
    pub streams: Arc<Vec<StreamDescriptor>>,
    pub provider: Arc<dyn CodecProvider>,
    pub pool: PayloadPool,
    pub clock: Arc<PositionClock>,
    pub delegate: Weak<dyn TrackDelegate>,
}

/// A packet tagged with the seek epoch it was queued in
struct QueuedPacket {
    packet: Packet,
    epoch: u64,
}

impl Timed for QueuedPacket {
    fn position(&self) -> i64 {
        self.packet.position
    }
}

struct PacketQueues {
    primary: Arc<TimedQueue<QueuedPacket>>,
    /// Present only while in loop mode
    secondary: Option<Arc<TimedQueue<QueuedPacket>>>,
}

/// Seek epoch and accurate-seek target, changed together by `Track::seek`
#[derive(Default)]
struct SeekGate {
    epoch: u64,
    target: Option<f64>,
}

struct DecoderSlot {
    decoder: Decoder,
    normalizer: Box<dyn Normalizer>,
}

#[derive(Default)]
struct Worker {
    handle: Option<JoinHandle<()>>,
    running: bool,
}

/// Decode pipeline for one elementary stream kind
pub struct Track {
    kind: MediaKind,
    config: Arc<PlayerConfig>,
    streams: Arc<Vec<StreamDescriptor>>,
    provider: Arc<dyn CodecProvider>,
    pool: PayloadPool,
    clock: Arc<PositionClock>,
    delegate: Weak<dyn TrackDelegate>,

    active_stream: AtomicUsize,
    fps: AtomicU32,
    enabled: AtomicBool,

    packets: Mutex<PacketQueues>,
    frames: TimedQueue<Frame>,

    state: Mutex<CodecState>,
    end_of_file: AtomicBool,
    seek_gate: Mutex<SeekGate>,
    decoders: Mutex<HashMap<usize, DecoderSlot>>,

    worker: Mutex<Worker>,
    prepare_pending: AtomicBool,
    cancelled: AtomicBool,
    finish_reported: AtomicBool,
    failure_reported: AtomicBool,
    closed: AtomicBool,
}

impl Track {
    /// Create a Track for `stream_index` (must index into `context.streams`)
    pub fn new(kind: MediaKind, stream_index: usize, context: TrackContext) -> Result<Arc<Self>> {
        let stream = context
            .streams
            .get(stream_index)
            .ok_or_else(|| Error::InvalidState(format!("no stream {}", stream_index)))?;
        let fps = stream.fps();

        let frame_options = match kind {
            MediaKind::Audio => QueueOptions::bounded(context.config.audio_frame_max_count),
            MediaKind::Video => QueueOptions::sorted_bounded(context.config.video_frame_max_count),
            MediaKind::Subtitle => QueueOptions::default(),
        };
        let primary = Arc::new(TimedQueue::new(QueueOptions::expanding(
            context.config.packet_queue_capacity,
        )));

        debug!(
            "Creating {} track on stream {} ({}, {} fps)",
            kind, stream_index, stream.codec, fps
        );

        Ok(Arc::new(Self {
            kind,
            config: context.config,
            streams: context.streams,
            provider: context.provider,
            pool: context.pool,
            clock: context.clock,
            delegate: context.delegate,
            active_stream: AtomicUsize::new(stream_index),
            fps: AtomicU32::new(fps),
            enabled: AtomicBool::new(true),
            packets: Mutex::new(PacketQueues {
                primary,
                secondary: None,
            }),
            frames: TimedQueue::new(frame_options),
            state: Mutex::new(CodecState::Idle),
            end_of_file: AtomicBool::new(false),
            seek_gate: Mutex::new(SeekGate::default()),
            decoders: Mutex::new(HashMap::new()),
            worker: Mutex::new(Worker::default()),
            prepare_pending: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            finish_reported: AtomicBool::new(false),
            failure_reported: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn state(&self) -> CodecState {
        *self.state.lock()
    }

    pub fn active_stream(&self) -> usize {
        self.active_stream.load(Ordering::Acquire)
    }

    /// Switch decoding to another stream of the same kind
    ///
    /// The decoder for the new stream is created lazily on its first packet.
    pub fn set_active_stream(&self, stream_index: usize) {
        if let Some(stream) = self.streams.get(stream_index) {
            self.fps.store(stream.fps(), Ordering::Release);
        }
        let previous = self.active_stream.swap(stream_index, Ordering::AcqRel);
        if previous != stream_index {
            info!("{} track switched stream {} -> {}", self.kind, previous, stream_index);
        }
    }

    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_end_of_file(&self) -> bool {
        self.end_of_file.load(Ordering::Acquire)
    }

    pub fn is_loop_mode(&self) -> bool {
        self.packets.lock().secondary.is_some()
    }

    /// Packets buffered in both the primary and the loop queue
    pub fn packet_count(&self) -> usize {
        let queues = self.packets.lock();
        queues.primary.count() + queues.secondary.as_ref().map_or(0, |q| q.count())
    }

    pub fn frame_count(&self) -> usize {
        self.frames.count()
    }

    /// Rounded capacity of the frame queue
    pub fn frame_max_count(&self) -> usize {
        self.frames.capacity()
    }

    /// Occupancy snapshot fed to the buffering policy
    pub fn load(&self) -> TrackLoad {
        TrackLoad {
            kind: self.kind,
            packet_count: self.packet_count(),
            frame_count: self.frame_count(),
            frame_max_count: self.frame_max_count(),
            fps: self.fps(),
            is_end_of_file: self.is_end_of_file(),
        }
    }

    /// Finished with nothing left to render, or failed
    pub fn is_drained(&self) -> bool {
        match self.state() {
            CodecState::Failed => true,
            CodecState::Finished => self.frames.is_empty(),
            _ => false,
        }
    }

    /// Variant of the decoder serving a stream, once one was created
    pub fn decoder_kind(&self, stream_index: usize) -> Option<DecoderKind> {
        self.decoders
            .lock()
            .get(&stream_index)
            .map(|slot| slot.decoder.kind())
    }

    fn primary_queue(&self) -> Arc<TimedQueue<QueuedPacket>> {
        Arc::clone(&self.packets.lock().primary)
    }

    /// Queue a packet for decoding (the loop queue while in loop mode)
    pub fn put_packet(&self, packet: Packet) {
        let target = {
            let queues = self.packets.lock();
            match &queues.secondary {
                Some(secondary) => Arc::clone(secondary),
                None => Arc::clone(&queues.primary),
            }
        };
        let epoch = self.seek_gate.lock().epoch;
        target.push(QueuedPacket { packet, epoch });
        self.notify_capacity();
    }

    /// Start (or restart) the decode thread
    ///
    /// Clears end of file and re-arms the finish report. A thread that is
    /// still running picks the restart up on its next iteration.
    pub fn decode(self: &Arc<Self>) {
        self.end_of_file.store(false, Ordering::Release);
        self.finish_reported.store(false, Ordering::Release);
        self.prepare_pending.store(true, Ordering::Release);

        let mut worker = self.worker.lock();
        {
            let mut state = self.state.lock();
            match *state {
                CodecState::Closed | CodecState::Failed => return,
                CodecState::Flush => {}
                _ => *state = CodecState::Decoding,
            }
        }
        if worker.running {
            return;
        }
        if let Some(previous) = worker.handle.take() {
            if previous.thread().id() != thread::current().id() {
                let _ = previous.join();
            }
        }

        let track = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("hplayer-decode-{}", self.kind))
            .spawn(move || track.decode_loop());
        match spawned {
            Ok(handle) => {
                worker.handle = Some(handle);
                worker.running = true;
            }
            Err(e) => {
                drop(worker);
                self.fail(Error::Io(e));
            }
        }
    }

    fn decode_loop(self: Arc<Self>) {
        debug!("Decode thread started ({})", self.kind);
        loop {
            if self.step() {
                continue;
            }
            if self.retire() {
                break;
            }
        }
        debug!("Decode thread exited ({}, state {:?})", self.kind, self.state());
    }

    /// One decode-loop iteration; `false` when the loop wants to exit
    fn step(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        if self.prepare_pending.swap(false, Ordering::AcqRel) {
            self.prepare_decoders();
        }

        match self.state() {
            CodecState::Flush => {
                self.flush_decoders();
                return true;
            }
            CodecState::Decoding => {}
            _ => return false,
        }

        let queue = self.primary_queue();
        if self.is_end_of_file() && queue.is_empty() {
            if self.transition(CodecState::Decoding, CodecState::Finished) {
                debug!("{} track decoded to end of file", self.kind);
                if self.frames.is_empty() {
                    self.report_finished();
                }
            }
            return true;
        }

        let Some(queued) = queue.pop_wait_unless(|| self.is_end_of_file()) else {
            return true;
        };
        match self.state() {
            CodecState::Decoding => {}
            // A seek landed while waiting; the packet may already belong to it
            CodecState::Flush => self.flush_decoders(),
            _ => return true,
        }
        if queued.epoch != self.seek_gate.lock().epoch {
            trace!("{} packet at {} dropped (queued before seek)", self.kind, queued.packet.position);
            return true;
        }
        self.decode_packet(queued.packet, queued.epoch);
        true
    }

    /// Drop decoder references and position prediction for a seek
    ///
    /// Runs on the decode thread, so a stale packet decoded while the seek
    /// was landing cannot leave its position behind.
    fn flush_decoders(&self) {
        for slot in self.decoders.lock().values_mut() {
            slot.decoder.flush();
            slot.decoder.seek();
        }
        self.transition(CodecState::Flush, CodecState::Decoding);
    }

    /// Decide under the worker lock whether the loop may exit
    ///
    /// A restart that raced with the exit (state back to Decoding or Flush)
    /// keeps the loop alive instead.
    fn retire(&self) -> bool {
        let mut worker = self.worker.lock();
        let restarted = matches!(self.state(), CodecState::Decoding | CodecState::Flush);
        if restarted && !self.cancelled.load(Ordering::Acquire) {
            return false;
        }
        worker.running = false;
        true
    }

    fn transition(&self, from: CodecState, to: CodecState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn prepare_decoders(&self) {
        let mut decoders = self.decoders.lock();
        let created = self
            .ensure_decoder(&mut decoders, self.active_stream())
            .map(|_| ());
        let result = created.and_then(|()| {
            decoders
                .values_mut()
                .try_for_each(|slot| slot.decoder.prepare())
        });
        drop(decoders);
        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn ensure_decoder<'a>(
        &self,
        decoders: &'a mut HashMap<usize, DecoderSlot>,
        stream_index: usize,
    ) -> Result<&'a mut DecoderSlot> {
        if !decoders.contains_key(&stream_index) {
            let stream = self
                .streams
                .get(stream_index)
                .ok_or_else(|| Error::InvalidState(format!("no stream {}", stream_index)))?;
            let mut decoder = Decoder::create(stream, self.provider.as_ref(), &self.config)?;
            decoder.prepare()?;
            let normalizer = self.provider.normalizer(stream, &self.config, &self.pool);
            decoders.insert(stream_index, DecoderSlot { decoder, normalizer });
        }
        decoders
            .get_mut(&stream_index)
            .ok_or_else(|| Error::InvalidState(format!("decoder for stream {} missing", stream_index)))
    }

    fn decode_packet(&self, packet: Packet, epoch: u64) {
        let result = {
            let mut decoders = self.decoders.lock();
            let decoded = match self.ensure_decoder(&mut decoders, packet.stream_index) {
                Ok(slot) => self.decode_with_fallback(slot, &packet),
                Err(e) => Err(e),
            };
            decoded
        };
        match result {
            Ok(frames) => {
                for frame in frames {
                    self.accept_frame(frame, epoch);
                }
            }
            Err(e) => self.fail(e),
        }
    }

    /// Decode once; a hardware failure on a non-key unit swaps in a software
    /// decoder and retries the same packet
    fn decode_with_fallback(&self, slot: &mut DecoderSlot, packet: &Packet) -> Result<Vec<Frame>> {
        match slot.decoder.decode(packet, slot.normalizer.as_mut()) {
            Ok(frames) => Ok(frames),
            Err(e) if slot.decoder.kind() == DecoderKind::Hardware && !packet.is_key => {
                warn!(
                    "{} hardware decode failed on non-key unit (stream {}), switching to software: {}",
                    self.kind, packet.stream_index, e
                );
                let stream = self.streams.get(packet.stream_index).ok_or_else(|| {
                    Error::InvalidState(format!("no stream {}", packet.stream_index))
                })?;
                let mut software = Decoder::software(stream, self.provider.as_ref())?;
                software.prepare()?;
                let mut hardware = std::mem::replace(&mut slot.decoder, software);
                hardware.shutdown();
                slot.decoder.decode(packet, slot.normalizer.as_mut())
            }
            Err(e) => Err(e),
        }
    }

    /// Queue a decoded frame unless a seek superseded the packet it came from
    fn accept_frame(&self, mut frame: Frame, epoch: u64) {
        if matches!(self.state(), CodecState::Flush | CodecState::Closed) {
            return;
        }
        {
            let mut gate = self.seek_gate.lock();
            if gate.epoch != epoch {
                return;
            }
            if let Some(seconds) = gate.target.filter(|_| self.config.is_accurate_seek) {
                if frame.end_seconds() < seconds {
                    trace!(
                        "{} frame at {:.3}s dropped before seek target {:.3}s",
                        self.kind,
                        frame.seconds(),
                        seconds
                    );
                    return;
                }
                gate.target = None;
            }
        }
        frame.serial = self.clock.serial();
        if self.frames.push(frame) {
            // A seek that bumped the epoch during the push may have flushed
            // before the frame landed; this thread is the only producer
            if self.seek_gate.lock().epoch != epoch {
                self.frames.flush();
            }
            self.notify_capacity();
        }
    }

    /// Mark the Track failed and report it once
    fn fail(&self, error: Error) {
        {
            let mut state = self.state.lock();
            if *state == CodecState::Closed {
                return;
            }
            *state = CodecState::Failed;
        }
        if self.failure_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        error!("{} track failed: {}", self.kind, error);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.codec_did_fail(self.kind, &error);
        }
        self.notify_capacity();
    }

    fn report_finished(&self) {
        if self.finish_reported.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("{} track finished", self.kind);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.codec_did_finished(self.kind);
        }
    }

    fn notify_capacity(&self) {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.codec_did_change_capacity(self.kind);
        }
    }

    /// Mark (or clear) end of file for the current pass
    pub fn set_end_of_file(&self, value: bool) {
        self.end_of_file.store(value, Ordering::Release);
        if value {
            self.primary_queue().wake_waiters();
            if self.state() == CodecState::Finished && self.frames.is_empty() {
                self.report_finished();
            }
        }
        self.notify_capacity();
    }

    /// Divert new packets into a loop queue while the current pass drains
    pub fn enter_loop_mode(&self) {
        let primary = {
            let mut queues = self.packets.lock();
            if queues.secondary.is_none() {
                queues.secondary = Some(Arc::new(TimedQueue::new(QueueOptions::expanding(
                    self.config.packet_queue_capacity,
                ))));
            }
            Arc::clone(&queues.primary)
        };
        self.end_of_file.store(true, Ordering::Release);
        primary.wake_waiters();
        debug!("{} track entered loop mode", self.kind);
    }

    /// Promote the loop queue to primary and restart decoding
    pub fn leave_loop_mode(self: &Arc<Self>) {
        let drained = {
            let mut queues = self.packets.lock();
            match queues.secondary.take() {
                Some(secondary) => std::mem::replace(&mut queues.primary, secondary),
                None => return,
            }
        };
        drained.shutdown();
        self.end_of_file.store(false, Ordering::Release);
        debug!("{} track left loop mode", self.kind);
        self.decode();
    }

    /// Pop the next frame if `accept` approves it (never blocks)
    pub fn get_output_render<F>(&self, accept: F) -> Option<Frame>
    where
        F: FnOnce(&Frame) -> bool,
    {
        match self.frames.pop_if(false, accept) {
            Some(frame) => {
                self.notify_capacity();
                Some(frame)
            }
            None => {
                if self.state() == CodecState::Finished && self.frames.is_empty() {
                    self.report_finished();
                }
                None
            }
        }
    }

    /// Drop everything buffered and restart decoding toward `time` (seconds)
    pub fn seek(self: &Arc<Self>, time: f64) {
        self.end_of_file.store(false, Ordering::Release);
        {
            let mut gate = self.seek_gate.lock();
            gate.epoch += 1;
            gate.target = Some(time);
        }
        self.primary_queue().flush();
        {
            let mut state = self.state.lock();
            if !matches!(*state, CodecState::Closed | CodecState::Failed) {
                *state = CodecState::Flush;
            }
        }
        self.frames.flush();
        let secondary = self.packets.lock().secondary.take();
        if let Some(secondary) = secondary {
            secondary.shutdown();
        }
        self.notify_capacity();
        self.decode();
    }

    /// Terminal; blocks until the decode thread exits unless called from it
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = CodecState::Closed;
        self.cancelled.store(true, Ordering::Release);

        {
            let queues = self.packets.lock();
            queues.primary.shutdown();
            if let Some(secondary) = &queues.secondary {
                secondary.shutdown();
            }
        }
        self.frames.shutdown();

        let handle = self.worker.lock().handle.take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        for (_, mut slot) in self.decoders.lock().drain() {
            slot.decoder.shutdown();
        }
        debug!("{} track shut down", self.kind);
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("active_stream", &self.active_stream())
            .field("packets", &self.packet_count())
            .field("frames", &self.frame_count())
            .field("end_of_file", &self.is_end_of_file())
            .finish()
    }
}
