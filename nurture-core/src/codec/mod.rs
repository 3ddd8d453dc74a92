//! Wire codecs for the two audio directions.
//!
//! - [`pcm`]: captured f32 frames → 16-bit signed little-endian PCM packets.
//! - [`decode`]: inbound PCM payloads → playable buffers at the output device rate.

pub mod decode;
pub mod pcm;

pub use decode::{decode_chunk, InboundChunk, PlaybackBuffer};
pub use pcm::{encode_frame, OutboundPacket};
