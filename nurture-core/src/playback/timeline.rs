//! Sample-accurate playback timeline.
//!
//! [`Timeline`] is what the output callback renders from: a queue of buffers,
//! each pinned to an absolute start frame. Its frame counter doubles as the
//! output clock: [`SampleClock`] reports `frames rendered / rate`, which only
//! ever grows.

use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use super::OutputClock;

/// Output clock derived from the number of frames the device has consumed.
#[derive(Debug)]
pub struct SampleClock {
    frames: AtomicU64,
    sample_rate: u32,
}

impl SampleClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// Count frames the device consumed. The output callback calls this
    /// directly when it could not render from the timeline.
    pub(crate) fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

impl OutputClock for SampleClock {
    fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }
}

#[derive(Debug)]
struct Entry {
    start_frame: u64,
    /// Frame the first sample actually went out on.
    origin: u64,
    samples: Vec<f32>,
    played: usize,
}

/// Queue of scheduled mono buffers rendered against a shared [`SampleClock`].
#[derive(Debug)]
pub struct Timeline {
    clock: Arc<SampleClock>,
    sample_rate: u32,
    queue: VecDeque<Entry>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            clock: Arc::new(SampleClock::new(sample_rate)),
            sample_rate: sample_rate.max(1),
            queue: VecDeque::new(),
        }
    }

    pub fn clock(&self) -> Arc<SampleClock> {
        Arc::clone(&self.clock)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Buffers queued or currently playing.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue `samples` to start at `start_secs`. A start in the past plays immediately.
    pub fn schedule(&mut self, start_secs: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let start_frame = (start_secs.max(0.0) * self.sample_rate as f64).round() as u64;
        let idx = self
            .queue
            .iter()
            .position(|e| e.start_frame > start_frame)
            .unwrap_or(self.queue.len());
        self.queue.insert(
            idx,
            Entry {
                start_frame,
                origin: start_frame,
                samples,
                played: 0,
            },
        );
    }

    /// Drop everything that has not finished playing.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Render the next `out.len()` mono frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let pos = self.clock.frames();
        let end = pos + out.len() as u64;

        for entry in self.queue.iter_mut() {
            let begin = if entry.played == 0 {
                entry.start_frame.max(pos)
            } else {
                // Frames the clock skipped past are lost, not delayed.
                let expected = entry.origin + entry.played as u64;
                if expected < pos {
                    entry.played = (entry.played + (pos - expected) as usize).min(entry.samples.len());
                }
                pos
            };
            if begin >= end {
                break;
            }
            if entry.played == 0 {
                entry.origin = begin;
            }
            let out_off = (begin - pos) as usize;
            let n = (out.len() - out_off).min(entry.samples.len() - entry.played);
            for (dst, src) in out[out_off..out_off + n]
                .iter_mut()
                .zip(&entry.samples[entry.played..entry.played + n])
            {
                *dst += *src;
            }
            entry.played += n;
        }

        self.queue.retain(|e| e.played < e.samples.len());
        self.clock.advance(out.len() as u64);
    }
}
