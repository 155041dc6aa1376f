//! Error types for hplayer-core
//!
//! Seek failures never appear here: they are reported as `false` through the
//! seek completion. End of file is not an error either; demuxers report it
//! as `ReadOutcome::EndOfFile`.

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    /// Container open or stream probe failed (terminal for the Source)
    #[error("Open failed: {0}")]
    Open(String),

    /// Neither an audio nor a video stream could be selected
    #[error("No playable audio or video stream")]
    NoPlayableStreams,

    /// Non-EOF read error (terminal for the Source)
    #[error("Read failed: {0}")]
    Read(String),

    /// A decoding session could not be created
    #[error("Decoder init failed: {0}")]
    DecoderInit(String),

    /// A decode call failed
    #[error("Decode failed ({}): {message}", unit_label(.key_unit))]
    Decode { key_unit: bool, message: String },

    /// Converting decoder output into a frame failed
    #[error("Normalize failed: {0}")]
    Normalize(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Shared configuration or I/O error
    #[error(transparent)]
    Common(#[from] hplayer_common::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Decode error helper for codec backends
    pub fn decode(key_unit: bool, message: impl Into<String>) -> Self {
        Error::Decode {
            key_unit,
            message: message.into(),
        }
    }
}

fn unit_label(key_unit: &bool) -> &'static str {
    if *key_unit {
        "key unit"
    } else {
        "non-key unit"
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
