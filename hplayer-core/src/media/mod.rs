//! Media units flowing through the engine
//!
//! - `Packet`: compressed access unit produced by a demuxer
//! - `Frame`: decoded unit with a pooled or external payload
//! - `StreamDescriptor`: one probed elementary stream

pub mod frame;
pub mod packet;
pub mod pool;
pub mod stream;

pub use frame::{ExternalHandle, Frame, Payload};
pub use packet::Packet;
pub use pool::{PayloadPool, PayloadRole, Pooled};
pub use stream::{StreamDescriptor, StreamInfo};
