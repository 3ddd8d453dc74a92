//! PCM frame encoder.
//!
//! Converts a captured [`AudioFrame`] into the integer PCM layout the remote
//! channel expects: mono, 16-bit signed, little-endian, one output sample per
//! input sample. Out-of-range input is clipped, never wrapped and never rejected.

use crate::buffering::frame::AudioFrame;

/// MIME prefix of the outbound encoding tag; the sample rate is appended.
pub const PCM_MIME_PREFIX: &str = "audio/pcm;rate=";

/// Bytes per encoded sample.
pub const BYTES_PER_SAMPLE: usize = 2;

/// One encoded frame, ready for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPacket {
    /// Interleaved little-endian i16 bytes (mono, so one sample per 2 bytes).
    pub data: Vec<u8>,
    /// Encoding tag, e.g. `audio/pcm;rate=16000`.
    pub mime_type: String,
    /// Sequence number of the frame this packet was derived from.
    pub sequence: u64,
}

impl OutboundPacket {
    pub fn sample_count(&self) -> usize {
        self.data.len() / BYTES_PER_SAMPLE
    }

    /// Iterate over the encoded samples.
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }
}

/// Build the encoding tag for a sample rate.
pub fn mime_type_for_rate(sample_rate: u32) -> String {
    format!("{PCM_MIME_PREFIX}{sample_rate}")
}

/// Convert one f32 sample to i16, saturating at the format bounds.
///
/// Scaling uses 32768 so that -1.0 maps exactly to `i16::MIN`; +1.0 clips to
/// `i16::MAX`. NaN encodes as silence.
#[inline]
pub fn sample_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample * 32_768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a frame. Consumes the frame; the output buffer is allocated once.
pub fn encode_frame(frame: AudioFrame) -> OutboundPacket {
    let mut data = Vec::with_capacity(frame.samples.len() * BYTES_PER_SAMPLE);
    for &s in &frame.samples {
        data.extend_from_slice(&sample_to_i16(s).to_le_bytes());
    }
    OutboundPacket {
        data,
        mime_type: mime_type_for_rate(frame.sample_rate),
        sequence: frame.sequence,
    }
}
