//! Speaker-side playback.
//!
//! The scheduler never talks to hardware directly: it reads time from an
//! injected [`OutputClock`] and hands buffers to an [`AudioSink`], so the
//! timing logic runs unchanged against the cpal backend or a manual test clock.

pub mod reorder;
pub mod scheduler;
pub mod timeline;

use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::PlaybackBuffer;
use crate::error::Result;

pub use reorder::ReorderBuffer;
pub use scheduler::{PlaybackScheduler, ScheduledSlot};
pub use timeline::{SampleClock, Timeline};

/// Monotonic time reference of the output device, in seconds.
pub trait OutputClock: Send + Sync {
    fn now(&self) -> f64;
}

/// An open output device that can start buffers at absolute clock times.
pub trait AudioSink: Send {
    /// Operating rate of the device; decoded buffers must match it.
    fn sample_rate(&self) -> u32;

    /// The clock `play_at` start times refer to.
    fn clock(&self) -> Arc<dyn OutputClock>;

    /// Start `buffer` at `start` seconds on [`AudioSink::clock`].
    ///
    /// # Errors
    /// Fails when the device is gone; callers treat that like a transport error.
    fn play_at(&mut self, buffer: PlaybackBuffer, start: f64) -> Result<()>;

    /// Discard buffers that were scheduled but have not finished playing.
    fn cancel_pending(&mut self) -> Result<()>;
}

/// Capability to open the output device.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn open(&self) -> Result<Box<dyn AudioSink>>;
}
