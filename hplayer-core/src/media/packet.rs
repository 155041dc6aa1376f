//! Compressed access units

use crate::playback::queue::Timed;
use bytes::Bytes;

/// One compressed unit read from the container
///
/// A packet moves exactly once: from the demuxer, through the read loop, into
/// one Track's packet queue, and finally into that Track's decode loop.
#[derive(Debug)]
pub struct Packet {
    /// Index of the stream this unit belongs to
    pub stream_index: usize,

    /// Presentation position in stream timebase units (pts, or dts when pts is unset)
    pub position: i64,

    /// Duration in stream timebase units
    pub duration: i64,

    /// Payload size in bytes
    pub size: usize,

    /// Unit starts a decodable sequence
    pub is_key: bool,

    /// Container asked for this unit to be decoded but not shown
    pub is_discard: bool,

    /// Compressed payload
    pub data: Bytes,
}

impl Packet {
    pub fn new(
        stream_index: usize,
        pts: Option<i64>,
        dts: Option<i64>,
        duration: i64,
        data: Bytes,
    ) -> Self {
        Self {
            stream_index,
            position: pts.or(dts).unwrap_or(0),
            duration,
            size: data.len(),
            is_key: false,
            is_discard: false,
            data,
        }
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn with_discard(mut self, is_discard: bool) -> Self {
        self.is_discard = is_discard;
        self
    }
}

impl Timed for Packet {
    fn position(&self) -> i64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_falls_back_to_dts() {
        let packet = Packet::new(0, None, Some(42), 1, Bytes::from_static(b"abc"));
        assert_eq!(packet.position, 42);
        assert_eq!(packet.size, 3);

        let packet = Packet::new(0, Some(7), Some(42), 1, Bytes::new());
        assert_eq!(packet.position, 7);
        assert_eq!(packet.size, 0);
    }
}
