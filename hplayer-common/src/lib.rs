//! # HPlayer Common Library
//!
//! Shared code for the HPlayer engine and its tools including:
//! - Error types
//! - Player configuration (TOML, immutable once built)
//! - Media kinds, state enums and the `PlayerEvent` stream
//! - Rational timebase conversion

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use config::{LoggingConfig, PlayerConfig};
pub use error::{Error, Result};
pub use events::{CodecState, EventBus, LoadState, MediaKind, PlaybackState, PlayerEvent, SourceState};
pub use time::Timebase;
