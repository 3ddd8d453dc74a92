use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Per-session counters, reset when a session starts.
#[derive(Debug, Default)]
pub struct SessionDiagnostics {
    pub frames_captured: AtomicUsize,
    pub packets_sent: AtomicUsize,
    pub chunks_received: AtomicUsize,
    pub chunks_decoded: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub buffers_scheduled: AtomicUsize,
    pub catch_ups: AtomicUsize,
    pub chunks_dropped_backlog: AtomicUsize,
    pub stale_decodes_discarded: AtomicUsize,
    pub teardown_errors: AtomicUsize,
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            chunks_decoded: self.chunks_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            buffers_scheduled: self.buffers_scheduled.load(Ordering::Relaxed),
            catch_ups: self.catch_ups.load(Ordering::Relaxed),
            chunks_dropped_backlog: self.chunks_dropped_backlog.load(Ordering::Relaxed),
            stale_decodes_discarded: self.stale_decodes_discarded.load(Ordering::Relaxed),
            teardown_errors: self.teardown_errors.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn counters(&self) -> [&AtomicUsize; 10] {
        [
            &self.frames_captured,
            &self.packets_sent,
            &self.chunks_received,
            &self.chunks_decoded,
            &self.decode_errors,
            &self.buffers_scheduled,
            &self.catch_ups,
            &self.chunks_dropped_backlog,
            &self.stale_decodes_discarded,
            &self.teardown_errors,
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_captured: usize,
    pub packets_sent: usize,
    pub chunks_received: usize,
    pub chunks_decoded: usize,
    pub decode_errors: usize,
    pub buffers_scheduled: usize,
    pub catch_ups: usize,
    pub chunks_dropped_backlog: usize,
    pub stale_decodes_discarded: usize,
    pub teardown_errors: usize,
}
