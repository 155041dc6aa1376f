//! Playback engine
//!
//! ```text
//!   Source (read thread) ─► Track (decode thread, one per kind) ─► SyncGateway ◄─ render threads
//!        │                        │                                   │
//!        └──── BufferPolicy ◄─────┘ capacity events                   └─► PositionClock
//! ```

pub mod buffer_policy;
pub mod clock;
pub mod queue;
pub mod source;
pub mod sync_gateway;
pub mod track;

pub use buffer_policy::{AdaptationState, BufferPolicy, BufferSnapshot, TrackLoad};
pub use clock::PositionClock;
pub use queue::{QueueOptions, Timed, TimedQueue};
pub use source::{SeekCompletion, Source, SourceDelegate};
pub use sync_gateway::SyncGateway;
pub use track::{Track, TrackContext, TrackDelegate};
