//! Fixed-size capture frames.

use std::time::Instant;

/// A fixed-size block of mono f32 samples cut from the microphone stream.
///
/// Produced by [`FrameAssembler`], consumed immediately by the encoder.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono f32 samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Capture order within the session, starting at 0.
    pub sequence: u64,
    /// When the last sample of the frame was handed to the assembler.
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32, sequence: u64) -> Self {
        Self {
            samples,
            sample_rate,
            sequence,
            captured_at: Instant::now(),
        }
    }

    /// Duration of this frame in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Cuts an arbitrary-length sample stream into frames of exactly `frame_size`.
///
/// At most one partial frame is held between calls.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            sample_rate,
            pending: Vec::with_capacity(frame_size),
            next_sequence: 0,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for the next frame boundary.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append samples, calling `emit` once per completed frame in capture order.
    ///
    /// Returns the number of frames emitted.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioFrame)) -> usize {
        let mut emitted = 0;
        while !samples.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                emit(AudioFrame::new(full, self.sample_rate, self.next_sequence));
                self.next_sequence += 1;
                emitted += 1;
            }
        }
        emitted
    }

    /// Drop the partial frame and restart sequence numbering.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_complete_frames() {
        let mut asm = FrameAssembler::new(4, 16_000);
        let mut frames = Vec::new();

        assert_eq!(asm.push(&[0.1; 3], |f| frames.push(f)), 0);
        assert_eq!(asm.pending_len(), 3);

        assert_eq!(asm.push(&[0.2; 6], |f| frames.push(f)), 2);
        assert_eq!(asm.pending_len(), 1);

        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 4));
        assert_eq!(frames[0].samples, vec![0.1, 0.1, 0.1, 0.2]);
    }

    #[test]
    fn sequence_numbers_follow_capture_order() {
        let mut asm = FrameAssembler::new(2, 16_000);
        let mut seqs = Vec::new();
        asm.push(&[0.0; 7], |f| seqs.push(f.sequence));
        assert_eq!(seqs, vec![0, 1, 2]);

        asm.reset();
        asm.push(&[0.0; 2], |f| seqs.push(f.sequence));
        assert_eq!(seqs, vec![0, 1, 2, 0]);
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn frame_duration_uses_sample_rate() {
        let frame = AudioFrame::new(vec![0.0; 4096], 16_000, 0);
        assert!((frame.duration_secs() - 0.256).abs() < 1e-9);
    }
}
