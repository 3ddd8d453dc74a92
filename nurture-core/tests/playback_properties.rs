use std::sync::Arc;

use approx::assert_abs_diff_eq;
use nurture_core::buffering::frame::AudioFrame;
use nurture_core::codec::{decode_chunk, encode_frame, InboundChunk, PlaybackBuffer};
use nurture_core::playback::scheduler::ScheduleOutcome;
use nurture_core::playback::{PlaybackScheduler, SampleClock, Timeline};
use nurture_core::{AudioSink, OutputClock};
use parking_lot::Mutex;

struct SteppedClock(Mutex<f64>);

impl OutputClock for SteppedClock {
    fn now(&self) -> f64 {
        *self.0.lock()
    }
}

/// Sink that renders into a real `Timeline` so the sample clock advances.
struct TimelineSink {
    timeline: Timeline,
    starts: Vec<(f64, f64)>,
}

impl AudioSink for TimelineSink {
    fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate()
    }

    fn clock(&self) -> Arc<dyn OutputClock> {
        self.timeline.clock()
    }

    fn play_at(&mut self, buffer: PlaybackBuffer, start: f64) -> nurture_core::error::Result<()> {
        self.starts.push((start, buffer.duration()));
        self.timeline.schedule(start, buffer.samples);
        Ok(())
    }

    fn cancel_pending(&mut self) -> nurture_core::error::Result<()> {
        self.timeline.clear();
        Ok(())
    }
}

/// Sink that only records where buffers landed.
struct RecordingSink {
    clock: Arc<SteppedClock>,
    slots: Vec<(f64, f64)>,
}

impl AudioSink for RecordingSink {
    fn sample_rate(&self) -> u32 {
        1_000
    }

    fn clock(&self) -> Arc<dyn OutputClock> {
        self.clock.clone()
    }

    fn play_at(&mut self, buffer: PlaybackBuffer, start: f64) -> nurture_core::error::Result<()> {
        self.slots.push((start, start + buffer.duration()));
        Ok(())
    }

    fn cancel_pending(&mut self) -> nurture_core::error::Result<()> {
        self.slots.clear();
        Ok(())
    }
}

/// Silent buffer lasting `seconds` at 1 kHz.
fn silence(seconds: f64) -> PlaybackBuffer {
    PlaybackBuffer::new(vec![0.0; (seconds * 1_000.0).round() as usize], 1_000)
}

/// Deterministic pseudo-random sequence (LCG) so the property runs are stable.
fn lcg(seed: &mut u64) -> f64 {
    *seed = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (*seed >> 11) as f64 / (1u64 << 53) as f64
}

#[test]
fn scheduled_intervals_never_overlap_and_start_in_order() {
    for run in 0..20u64 {
        let mut seed = run + 1;
        let clock = Arc::new(SteppedClock(Mutex::new(0.0)));
        let mut scheduler = PlaybackScheduler::new(clock.clone());
        let mut sink = RecordingSink {
            clock: clock.clone(),
            slots: Vec::new(),
        };

        for _ in 0..200 {
            // Jittered arrivals: bursts, stalls, and gaps longer than the queue.
            *clock.0.lock() += lcg(&mut seed) * 0.4;
            let duration = 0.01 + lcg(&mut seed) * 0.3;
            match scheduler.schedule(silence(duration), &mut sink).unwrap() {
                ScheduleOutcome::Scheduled(slot) => {
                    assert!(slot.start >= clock.now(), "scheduled into the past");
                    assert_abs_diff_eq!(scheduler.next_start(), slot.end);
                }
                other => panic!("no backlog limit configured, got {other:?}"),
            }
        }

        assert_eq!(sink.slots.len(), 200);
        for pair in sink.slots.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(a.0 <= b.0);
            assert!(b.0 >= a.1 - 1e-12, "run {run}: {a:?} overlaps {b:?}");
        }
    }
}

#[test]
fn late_buffer_starts_at_the_live_clock() {
    let clock = Arc::new(SteppedClock(Mutex::new(0.0)));
    let mut scheduler = PlaybackScheduler::new(clock.clone());
    let mut sink = RecordingSink {
        clock: clock.clone(),
        slots: Vec::new(),
    };
    scheduler.schedule(silence(0.25), &mut sink).unwrap();
    scheduler.schedule(silence(0.25), &mut sink).unwrap();

    *clock.0.lock() = 3.0;
    match scheduler.schedule(silence(0.1), &mut sink).unwrap() {
        ScheduleOutcome::Scheduled(slot) => {
            assert_abs_diff_eq!(slot.start, 3.0);
            assert!(slot.caught_up);
        }
        other => panic!("expected scheduled, got {other:?}"),
    }
    assert_abs_diff_eq!(sink.slots[2].0, 3.0);
}

#[test]
fn sample_clock_drives_back_to_back_playback() {
    let mut sink = TimelineSink {
        timeline: Timeline::new(100),
        starts: Vec::new(),
    };
    let clock: Arc<SampleClock> = sink.timeline.clock();
    let mut scheduler = PlaybackScheduler::new(clock.clone());

    let first = PlaybackBuffer::new(vec![0.5; 50], 100);
    let second = PlaybackBuffer::new(vec![-0.5; 30], 100);
    scheduler.schedule(first, &mut sink).unwrap();

    let mut out = vec![0.0f32; 20];
    sink.timeline.render(&mut out);
    assert_abs_diff_eq!(clock.now(), 0.2);

    scheduler.schedule(second, &mut sink).unwrap();
    assert_abs_diff_eq!(sink.starts[1].0, 0.5);

    let mut rest = vec![0.0f32; 70];
    sink.timeline.render(&mut rest);
    assert!(rest[..30].iter().all(|&s| s == 0.5));
    assert!(rest[30..60].iter().all(|&s| s == -0.5));
    assert!(rest[60..].iter().all(|&s| s == 0.0));
}

#[test]
fn silent_frame_encodes_to_zeros() {
    let packet = encode_frame(AudioFrame::new(vec![0.0; 4096], 16_000, 0));
    assert_eq!(packet.sample_count(), 4096);
    assert!(packet.samples().all(|s| s == 0));
}

#[test]
fn full_scale_frame_clips_to_integer_bounds() {
    let packet = encode_frame(AudioFrame::new(vec![1.0, -1.0, 3.5, -7.0], 16_000, 0));
    let samples: Vec<i16> = packet.samples().collect();
    assert_eq!(samples, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
}

#[test]
fn decode_preserves_duration_across_rates() {
    let data: Vec<u8> = (0..16_000i32)
        .flat_map(|i| (((i % 100) - 50) as i16 * 300).to_le_bytes())
        .collect();
    let buffer = decode_chunk(&InboundChunk::new(data, 16_000), 24_000).unwrap();
    assert_eq!(buffer.sample_rate, 24_000);
    assert_eq!(buffer.len(), 24_000);
    assert_abs_diff_eq!(buffer.duration(), 1.0);
}
