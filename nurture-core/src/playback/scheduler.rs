//! Gap-free playback scheduling.
//!
//! ## Algorithm
//!
//! ```text
//! start      = max(clock.now(), next_start)
//! play_at(buffer, start)
//! next_start = start + duration(buffer)
//! ```
//!
//! Buffers therefore play back-to-back in the order they are handed in, and
//! never overlap. When playback has fallen behind the live clock (network
//! gap), `max` snaps the next buffer to "now": a short silence instead of
//! audio scheduled into the past. `next_start == 0.0` means nothing has been
//! scheduled yet in this session.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{AudioSink, OutputClock};
use crate::codec::PlaybackBuffer;
use crate::error::Result;

/// Where a buffer landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSlot {
    pub start: f64,
    pub end: f64,
    /// Playback had fallen behind and the start snapped to the live clock.
    pub caught_up: bool,
}

/// Outcome of offering one buffer to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScheduleOutcome {
    Scheduled(ScheduledSlot),
    /// Refused because the queue already reaches further ahead than allowed.
    DroppedBacklog { ahead: f64 },
}

pub struct PlaybackScheduler {
    clock: Arc<dyn OutputClock>,
    next_start: f64,
    /// Optional bound on how far ahead of the clock audio may be queued.
    max_ahead: Option<f64>,
}

impl PlaybackScheduler {
    pub fn new(clock: Arc<dyn OutputClock>) -> Self {
        Self {
            clock,
            next_start: 0.0,
            max_ahead: None,
        }
    }

    /// Refuse buffers once the queue reaches `limit` ahead of the clock.
    pub fn with_max_ahead(mut self, limit: Option<Duration>) -> Self {
        self.max_ahead = limit.map(|d| d.as_secs_f64());
        self
    }

    /// End time of the last scheduled buffer (0 when unscheduled).
    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    /// Place a span of `duration` seconds on the clock without playing anything.
    #[cfg(test)]
    pub(crate) fn reserve(&mut self, duration: f64) -> ScheduleOutcome {
        let now = self.clock.now();
        match self.plan(now, duration) {
            ScheduleOutcome::Scheduled(slot) => {
                self.next_start = slot.end;
                ScheduleOutcome::Scheduled(slot)
            }
            dropped => dropped,
        }
    }

    /// Schedule `buffer` on `sink`.
    ///
    /// `next_start` only advances when the sink accepted the buffer.
    ///
    /// # Errors
    /// Propagates the sink failure (device gone).
    pub fn schedule(
        &mut self,
        buffer: PlaybackBuffer,
        sink: &mut dyn AudioSink,
    ) -> Result<ScheduleOutcome> {
        let now = self.clock.now();
        let duration = buffer.duration();
        let outcome = self.plan(now, duration);
        match outcome {
            ScheduleOutcome::Scheduled(slot) => {
                sink.play_at(buffer, slot.start)?;
                self.next_start = slot.end;
                trace!(
                    start = slot.start,
                    end = slot.end,
                    caught_up = slot.caught_up,
                    "buffer scheduled"
                );
            }
            ScheduleOutcome::DroppedBacklog { ahead } => {
                debug!(ahead, duration, "buffer dropped: playback backlog limit");
            }
        }
        Ok(outcome)
    }

    /// Forget the session's bookkeeping. The clock itself keeps running.
    pub fn reset(&mut self) {
        self.next_start = 0.0;
    }

    fn plan(&self, now: f64, duration: f64) -> ScheduleOutcome {
        let ahead = self.next_start - now;
        if let Some(limit) = self.max_ahead {
            if ahead > limit {
                return ScheduleOutcome::DroppedBacklog { ahead };
            }
        }
        let start = now.max(self.next_start);
        ScheduleOutcome::Scheduled(ScheduledSlot {
            start,
            end: start + duration.max(0.0),
            caught_up: self.next_start > 0.0 && now > self.next_start,
        })
    }
}
