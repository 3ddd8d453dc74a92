//! Inbound audio decoder.
//!
//! The remote model delivers mono 16-bit signed little-endian PCM at a declared
//! sample rate. [`decode_chunk`] turns one payload into a [`PlaybackBuffer`] at
//! the output device rate, resampling when the two differ.
//!
//! Duration is preserved: the output sample count is the input count scaled by
//! the rate ratio (rounded to the nearest sample), so `samples / rate` of the
//! result equals `samples / rate` of the payload to within one output sample.

use crate::audio::resample::resample_exact;
use crate::error::{Result, VoiceError};

use super::pcm::BYTES_PER_SAMPLE;

/// One model-generated audio payload as it arrived from the remote channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChunk {
    /// Opaque encoded bytes (i16 LE mono PCM).
    pub data: Vec<u8>,
    /// Declared sample rate of `data` in Hz.
    pub sample_rate: u32,
}

impl InboundChunk {
    pub fn new(data: Vec<u8>, sample_rate: u32) -> Self {
        Self { data, sample_rate }
    }
}

/// Decoded, schedulable audio at the output device rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Duration in seconds (`sample count / rate`).
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode one chunk to a buffer at `output_rate`.
///
/// # Errors
/// `VoiceError::Decode` when the payload is empty, has an odd byte length, or
/// declares a zero sample rate. Callers drop the chunk and keep the session.
pub fn decode_chunk(chunk: &InboundChunk, output_rate: u32) -> Result<PlaybackBuffer> {
    if chunk.data.is_empty() {
        return Err(VoiceError::Decode("empty payload".into()));
    }
    if chunk.data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(VoiceError::Decode(format!(
            "payload length {} is not a whole number of 16-bit samples",
            chunk.data.len()
        )));
    }
    if chunk.sample_rate == 0 || output_rate == 0 {
        return Err(VoiceError::Decode("sample rate must be non-zero".into()));
    }

    let samples: Vec<f32> = chunk
        .data
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32_768.0)
        .collect();

    let samples = if chunk.sample_rate == output_rate {
        samples
    } else {
        resample_exact(&samples, chunk.sample_rate, output_rate)?
    };

    Ok(PlaybackBuffer::new(samples, output_rate))
}
