//! Audio sample-rate conversion using rubato `FastFixedIn` resamplers.
//!
//! ## Design
//!
//! Two directions need conversion:
//!
//! - **Capture**: `cpal` captures at the device's native rate (commonly
//!   48 kHz), the remote channel expects 16 kHz mono. [`RateConverter`] is a
//!   streaming converter that accumulates partial input between calls.
//!   When capture rate == target rate it is a passthrough and no rubato
//!   session is created at all.
//! - **Playback**: each decoded chunk is converted in one shot by
//!   [`resample_exact`], which trims the filter delay and pads/truncates so
//!   the output length is exactly `round(n * to / from)`. The playback
//!   scheduler relies on that length for its timing.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, VoiceError};

/// Flush passes allowed when draining the resampler delay line.
const MAX_FLUSH_PASSES: usize = 4;

/// Converts f32 mono audio from one fixed sample rate to another, streaming.
pub struct RateConverter {
    /// `None` when capture rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer holding partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Parameters
    /// - `capture_rate`: Sample rate of the incoming audio (Hz).
    /// - `target_rate`: Sample rate sent to the remote channel (Hz).
    /// - `chunk_size`: Input frame count per rubato call (e.g. `960`).
    ///
    /// # Errors
    /// Returns `VoiceError::AudioDevice` if rubato fails to initialise.
    pub fn new(capture_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| VoiceError::AudioDevice(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::info!(
            capture_rate,
            target_rate,
            chunk_size,
            max_out,
            "capture resampling enabled"
        );

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();

        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];

            match resampler.process_into_buffer(&[input_slice], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => {
                    error!("resampler process error: {e}");
                }
            }

            self.input_buf.drain(..self.chunk_size);
        }

        result
    }

    /// Returns `true` when capture rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Drop buffered input and the filter state.
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(ref mut resampler) = self.resampler {
            resampler.reset();
        }
    }
}

/// Expected output length when converting `len` samples from `from` to `to` Hz.
pub fn resampled_len(len: usize, from: u32, to: u32) -> usize {
    if from == 0 {
        return 0;
    }
    ((len as f64) * (to as f64) / (from as f64)).round() as usize
}

/// Resample a complete mono buffer, returning exactly [`resampled_len`] samples.
///
/// # Errors
/// `VoiceError::Decode` if rubato rejects the conversion.
pub fn resample_exact(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    let expected = resampled_len(samples.len(), from, to);
    if from == to || samples.is_empty() {
        let mut out = samples.to_vec();
        out.resize(expected, 0.0);
        return Ok(out);
    }

    let ratio = to as f64 / from as f64;
    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, samples.len(), 1)
            .map_err(|e| VoiceError::Decode(format!("resampler init: {e}")))?;
    let delay = resampler.output_delay();

    let mut out = resampler
        .process(&[samples], None)
        .map_err(|e| VoiceError::Decode(format!("resample: {e}")))?
        .into_iter()
        .next()
        .unwrap_or_default();

    let mut passes = 0;
    while out.len() < delay + expected && passes < MAX_FLUSH_PASSES {
        let tail = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| VoiceError::Decode(format!("resample flush: {e}")))?
            .into_iter()
            .next()
            .unwrap_or_default();
        if tail.is_empty() {
            break;
        }
        out.extend_from_slice(&tail);
        passes += 1;
    }

    out.drain(..delay.min(out.len()));
    out.resize(expected, 0.0);
    Ok(out)
}
