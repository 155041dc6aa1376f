//! Event types for the HPlayer event stream
//!
//! The engine broadcasts `PlayerEvent`s to any number of subscribers. Events
//! are plain serializable values so tools can log them as JSON lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Elementary stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
    Subtitle,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Subtitle => write!(f, "subtitle"),
        }
    }
}

/// Demux state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Idle,
    Opening,
    Opened,
    Reading,
    Seeking,
    Paused,
    Finished,
    Closed,
    Failed,
}

impl SourceState {
    /// States in which the read loop keeps running
    pub fn is_read_loop_active(&self) -> bool {
        matches!(
            self,
            SourceState::Reading | SourceState::Seeking | SourceState::Paused
        )
    }
}

/// Per-track decode states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecState {
    Idle,
    Decoding,
    Flush,
    Finished,
    Closed,
    Failed,
}

/// Player-level playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Seeking,
    Finished,
    Stopped,
}

/// Player-level load state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Idle,
    Loading,
    Playable,
}

/// Buffering snapshot as carried on the event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferingInfo {
    /// Seconds of media buffered ahead (packets plus decoded frames)
    pub loaded_time: f64,
    /// Percentage of the preferred forward buffer reached (may exceed 100)
    pub progress: f64,
    pub packet_count: usize,
    pub frame_count: usize,
    pub is_end_of_file: bool,
    pub is_playable: bool,
}

/// Player event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Source opened and streams selected
    Prepared {
        session_id: Uuid,
        duration: f64,
        timestamp: DateTime<Utc>,
    },

    /// A new buffering snapshot was computed
    BufferingChanged {
        session_id: Uuid,
        buffering: BufferingInfo,
        timestamp: DateTime<Utc>,
    },

    /// Load state changed (idle/loading/playable)
    LoadStateChanged {
        session_id: Uuid,
        state: LoadState,
        /// Buffering progress 0-100 reported alongside the change
        progress: u8,
        timestamp: DateTime<Utc>,
    },

    /// Playback state changed
    PlaybackStateChanged {
        session_id: Uuid,
        state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Adaptive switch between two video bitrates
    BitrateChanged {
        session_id: Uuid,
        old_bit_rate: u64,
        new_bit_rate: u64,
        timestamp: DateTime<Utc>,
    },

    /// A track ran out of frames; `all_finished` is set when every track did
    TrackFinished {
        session_id: Uuid,
        kind: MediaKind,
        all_finished: bool,
        timestamp: DateTime<Utc>,
    },

    /// Loop playback restarted from zero
    LoopCompleted {
        session_id: Uuid,
        loop_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// A seek request completed
    SeekCompleted {
        session_id: Uuid,
        position: f64,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A track hit a terminal decode failure
    TrackFailed {
        session_id: Uuid,
        kind: MediaKind,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The source failed (open or read failure)
    Failed {
        session_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            PlayerEvent::Prepared { session_id, .. }
            | PlayerEvent::BufferingChanged { session_id, .. }
            | PlayerEvent::LoadStateChanged { session_id, .. }
            | PlayerEvent::PlaybackStateChanged { session_id, .. }
            | PlayerEvent::BitrateChanged { session_id, .. }
            | PlayerEvent::TrackFinished { session_id, .. }
            | PlayerEvent::LoopCompleted { session_id, .. }
            | PlayerEvent::SeekCompleted { session_id, .. }
            | PlayerEvent::TrackFailed { session_id, .. }
            | PlayerEvent::Failed { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast channel carrying `PlayerEvent`s to any number of subscribers
///
/// Slow subscribers lose the oldest events (`RecvError::Lagged`); the engine
/// never blocks on delivery.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit to all subscribers; fails when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: PlayerEvent) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
