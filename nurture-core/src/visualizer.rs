//! Loudness sampler for the live visualizer.
//!
//! Polls the analysis tap once per display refresh and publishes the mean
//! spectrum level on a `watch` channel. The loop runs for as long as the
//! session state channel is alive, connected or not; outside `Connected` it
//! publishes 0 without touching the analyser, so the display decays to
//! silence within one refresh no matter what the analyser still holds.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::capture::AnalysisHandle;
use crate::session::SessionState;

pub struct VisualizerSampler {
    analysis: AnalysisHandle,
    level_tx: watch::Sender<f32>,
}

impl VisualizerSampler {
    pub fn new(analysis: AnalysisHandle) -> Self {
        let (level_tx, _) = watch::channel(0.0);
        Self { analysis, level_tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.level_tx.subscribe()
    }

    /// Sample once and publish. Returns the published value, in `[0, 1]`.
    pub fn tick(&self, connected: bool) -> f32 {
        let level = if connected {
            self.analysis.mean_level().clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.level_tx.send_if_modified(|current| {
            if *current == level {
                return false;
            }
            *current = level;
            true
        });
        level
    }

    /// Poll every `refresh` until the state sender is dropped.
    pub async fn run(self, mut state: watch::Receiver<SessionState>, refresh: Duration) {
        let mut interval = tokio::time::interval(refresh);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if state.has_changed().is_err() {
                break;
            }
            let connected = *state.borrow_and_update() == SessionState::Connected;
            self.tick(connected);
        }
        self.tick(false);
        debug!("visualizer stopped");
    }
}
