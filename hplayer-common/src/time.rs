//! Timebase and timestamp utilities
//!
//! Streams express positions as integer timestamps in a rational timebase
//! (`num/den` seconds per unit). The engine converts to seconds only at the
//! edges: buffering math, accurate-seek gating and clock publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rational timebase: one timestamp unit lasts `num / den` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    /// Default video timebase when a stream does not declare one
    pub const DEFAULT_VIDEO: Timebase = Timebase { num: 1, den: 25_000 };

    /// Microsecond timebase used for container-level durations
    pub const MICROSECONDS: Timebase = Timebase { num: 1, den: 1_000_000 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// Default audio timebase: one unit per sample
    pub fn for_sample_rate(sample_rate: u32) -> Self {
        Self {
            num: 1,
            den: sample_rate.max(1) as i32,
        }
    }

    /// A timebase is usable when both terms are positive
    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }

    /// Convert a timestamp in this timebase to seconds
    pub fn seconds(&self, timestamp: i64) -> f64 {
        if !self.is_valid() {
            return 0.0;
        }
        timestamp as f64 * self.num as f64 / self.den as f64
    }

    /// Convert seconds to a timestamp in this timebase (truncating)
    pub fn position(&self, seconds: f64) -> i64 {
        if !self.is_valid() {
            return 0;
        }
        (seconds * self.den as f64 / self.num as f64) as i64
    }

    /// Rescale a timestamp from this timebase into another one
    pub fn rescale(&self, timestamp: i64, to: Timebase) -> i64 {
        to.position(self.seconds(timestamp))
    }
}

impl Default for Timebase {
    fn default() -> Self {
        Self::DEFAULT_VIDEO
    }
}

impl std::fmt::Display for Timebase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
