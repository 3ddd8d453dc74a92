use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use approx::assert_abs_diff_eq;
use async_trait::async_trait;
use nurture_core::codec::{InboundChunk, OutboundPacket, PlaybackBuffer};
use nurture_core::error::Result;
use nurture_core::ipc::events::NoticeKind;
use nurture_core::{
    AudioSink, InputStream, LiveConfig, LoopbackConnector, Microphone, OutputClock,
    RemoteConnector, RemoteEvent, RemoteSession, SessionState, Speaker, VoiceConfig,
    VoiceController, VoiceError,
};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::mpsc;

const OUTPUT_RATE: u32 = 24_000;

// ── Fakes ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ManualClock(Mutex<f64>);

impl ManualClock {
    fn set(&self, t: f64) {
        *self.0.lock() = t;
    }
}

impl OutputClock for ManualClock {
    fn now(&self) -> f64 {
        *self.0.lock()
    }
}

#[derive(Default)]
struct SpeakerState {
    clock: Arc<ManualClock>,
    /// `(start, duration)` of every scheduled buffer.
    played: Mutex<Vec<(f64, f64)>>,
    opened: AtomicUsize,
    cancels: AtomicUsize,
    broken: AtomicBool,
}

struct FakeSink(Arc<SpeakerState>);

impl AudioSink for FakeSink {
    fn sample_rate(&self) -> u32 {
        OUTPUT_RATE
    }

    fn clock(&self) -> Arc<dyn OutputClock> {
        self.0.clock.clone()
    }

    fn play_at(&mut self, buffer: PlaybackBuffer, start: f64) -> Result<()> {
        if self.0.broken.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioStream("device unplugged".into()));
        }
        self.0.played.lock().push((start, buffer.duration()));
        Ok(())
    }

    fn cancel_pending(&mut self) -> Result<()> {
        self.0.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeSpeaker(Arc<SpeakerState>);

#[async_trait]
impl Speaker for FakeSpeaker {
    async fn open(&self) -> Result<Box<dyn AudioSink>> {
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSink(Arc::clone(&self.0))))
    }
}

#[derive(Default)]
struct MicState {
    deny: AtomicBool,
    lost: AtomicBool,
    feed: Mutex<VecDeque<f32>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MicState {
    fn speak(&self, samples: &[f32]) {
        self.feed.lock().extend(samples.iter().copied());
    }
}

struct FakeInput(Arc<MicState>);

impl InputStream for FakeInput {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        let mut feed = self.0.feed.lock();
        let n = buf.len().min(feed.len());
        for (slot, s) in buf.iter_mut().zip(feed.drain(..n)) {
            *slot = s;
        }
        n
    }

    fn is_live(&self) -> bool {
        !self.0.lost.load(Ordering::SeqCst)
    }

    fn release(&mut self) -> Result<()> {
        self.0.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeMic(Arc<MicState>);

#[async_trait]
impl Microphone for FakeMic {
    async fn acquire(&self) -> Result<Box<dyn InputStream>> {
        if self.0.deny.load(Ordering::SeqCst) {
            return Err(VoiceError::PermissionDenied("NotAllowedError".into()));
        }
        self.0.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeInput(Arc::clone(&self.0))))
    }
}

#[derive(Default)]
struct RemoteState {
    connects: AtomicUsize,
    events: Mutex<Option<mpsc::UnboundedSender<RemoteEvent>>>,
    sent: Mutex<Vec<OutboundPacket>>,
    closes: AtomicUsize,
}

struct FakeRemote(Arc<RemoteState>);

impl RemoteSession for FakeRemote {
    fn send_realtime_input(&mut self, packet: OutboundPacket) -> Result<()> {
        self.0.sent.lock().push(packet);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeConnector(Arc<RemoteState>);

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<RemoteEvent>,
    ) -> Result<Box<dyn RemoteSession>> {
        assert_eq!(config.outbound_sample_rate, 16_000);
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        *self.0.events.lock() = Some(events);
        Ok(Box::new(FakeRemote(Arc::clone(&self.0))))
    }
}

struct Rig {
    speaker: Arc<SpeakerState>,
    mic: Arc<MicState>,
    remote: Arc<RemoteState>,
}

fn rig() -> (VoiceController, Rig) {
    let rig = Rig {
        speaker: Arc::new(SpeakerState::default()),
        mic: Arc::new(MicState::default()),
        remote: Arc::new(RemoteState::default()),
    };
    let controller = VoiceController::new(
        VoiceConfig::default(),
        Arc::new(FakeMic(Arc::clone(&rig.mic))),
        Arc::new(FakeSpeaker(Arc::clone(&rig.speaker))),
        Arc::new(FakeConnector(Arc::clone(&rig.remote))),
    )
    .expect("default config is valid");
    (controller, rig)
}

async fn connected() -> (VoiceController, Rig) {
    let (mut controller, rig) = rig();
    controller.start().await.expect("session starts");
    controller.handle_remote(RemoteEvent::Open);
    assert_eq!(controller.state(), SessionState::Connected);
    (controller, rig)
}

/// An i16 LE payload lasting `secs` at the output rate.
fn chunk(secs: f64) -> InboundChunk {
    let samples = (secs * OUTPUT_RATE as f64).round() as usize;
    let data = (0..samples)
        .flat_map(|i| (((i % 64) as i16 - 32) * 256).to_le_bytes())
        .collect();
    InboundChunk::new(data, OUTPUT_RATE)
}

async fn receive(controller: &mut VoiceController, chunk: InboundChunk) {
    controller.handle_remote(RemoteEvent::Message(chunk));
    controller.flush_decodes().await;
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_round_trip() {
    let (mut controller, rig) = rig();

    controller.start().await.unwrap();
    assert_eq!(controller.state(), SessionState::Connecting);
    assert_eq!(rig.mic.acquired.load(Ordering::SeqCst), 1);
    assert_eq!(rig.remote.connects.load(Ordering::SeqCst), 1);

    controller.handle_remote(RemoteEvent::Open);
    assert_eq!(controller.state(), SessionState::Connected);

    rig.mic.speak(&[0.25; 4096]);
    controller.pump_capture();
    {
        let sent = rig.remote.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sample_count(), 4096);
        assert_eq!(sent[0].mime_type, "audio/pcm;rate=16000");
        assert!(sent[0].samples().all(|s| s == 8192));
    }

    rig.speaker.clock.set(0.0);
    receive(&mut controller, chunk(0.5)).await;
    assert_abs_diff_eq!(rig.speaker.played.lock()[0].0, 0.0);
    assert_abs_diff_eq!(controller.next_start().unwrap(), 0.5, epsilon = 1e-9);

    rig.speaker.clock.set(0.2);
    receive(&mut controller, chunk(0.3)).await;
    assert_abs_diff_eq!(rig.speaker.played.lock()[1].0, 0.5, epsilon = 1e-9);
    assert_abs_diff_eq!(controller.next_start().unwrap(), 0.8, epsilon = 1e-9);

    let diag = controller.diagnostics_snapshot();
    assert_eq!(diag.packets_sent, 1);
    assert_eq!(diag.buffers_scheduled, 2);
    assert_eq!(diag.catch_ups, 0);
}

#[tokio::test]
async fn permission_denied_returns_to_idle_with_one_notice() {
    let (mut controller, rig) = rig();
    rig.mic.deny.store(true, Ordering::SeqCst);
    let mut notices = controller.subscribe_notices();
    let mut status = controller.subscribe_status();

    let err = controller.start().await.unwrap_err();
    assert!(matches!(err, VoiceError::PermissionDenied(_)));
    assert_eq!(controller.state(), SessionState::Idle);

    let notice = notices.try_recv().expect("one notice");
    assert_eq!(notice.kind, NoticeKind::Microphone);
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(status.try_recv().unwrap().state, SessionState::Connecting);
    assert_eq!(status.try_recv().unwrap().state, SessionState::Idle);

    assert_eq!(rig.speaker.opened.load(Ordering::SeqCst), 0);
    assert_eq!(rig.remote.connects.load(Ordering::SeqCst), 0);
    assert!(controller.next_start().is_none());
}

#[tokio::test]
async fn malformed_chunk_is_dropped_and_session_continues() {
    let (mut controller, rig) = connected().await;
    let mut notices = controller.subscribe_notices();

    receive(&mut controller, chunk(0.5)).await;
    receive(&mut controller, InboundChunk::new(Vec::new(), OUTPUT_RATE)).await;

    assert_eq!(controller.state(), SessionState::Connected);
    assert_eq!(rig.speaker.played.lock().len(), 1);
    assert_eq!(controller.diagnostics_snapshot().decode_errors, 1);
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));

    rig.speaker.clock.set(0.1);
    receive(&mut controller, chunk(0.3)).await;
    assert_abs_diff_eq!(rig.speaker.played.lock()[1].0, 0.5, epsilon = 1e-9);
}

#[tokio::test]
async fn stop_is_idempotent_from_every_state() {
    let (mut controller, rig) = rig();

    controller.stop();
    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);

    controller.start().await.unwrap();
    controller.stop();
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(rig.mic.released.load(Ordering::SeqCst), 1);
    assert_eq!(rig.remote.closes.load(Ordering::SeqCst), 1);

    controller.stop();
    assert_eq!(controller.state(), SessionState::Closed);
    assert_eq!(rig.mic.released.load(Ordering::SeqCst), 1);
    assert_eq!(rig.remote.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stop_resets_scheduling_for_the_next_session() {
    let (mut controller, rig) = connected().await;
    rig.speaker.clock.set(1.0);
    receive(&mut controller, chunk(0.5)).await;
    assert_abs_diff_eq!(controller.next_start().unwrap(), 1.5, epsilon = 1e-9);

    controller.stop();
    assert!(controller.next_start().is_none());
    assert!(rig.speaker.cancels.load(Ordering::SeqCst) >= 1);

    controller.start().await.unwrap();
    assert_eq!(controller.next_start(), Some(0.0));
    assert_eq!(rig.speaker.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn remote_error_tears_down_with_a_transport_notice() {
    let (mut controller, rig) = connected().await;
    let mut notices = controller.subscribe_notices();

    controller.handle_remote(RemoteEvent::Error("socket reset".into()));

    assert_eq!(controller.state(), SessionState::Error);
    assert_eq!(notices.try_recv().unwrap().kind, NoticeKind::Transport);
    assert_eq!(rig.mic.released.load(Ordering::SeqCst), 1);

    rig.mic.speak(&[0.5; 8192]);
    controller.pump_capture();
    assert!(rig.remote.sent.lock().is_empty());

    controller.start().await.unwrap();
    assert_eq!(controller.state(), SessionState::Connecting);
}

#[tokio::test]
async fn close_before_open_is_a_connect_failure() {
    let (mut controller, _rig) = rig();
    let mut notices = controller.subscribe_notices();
    controller.start().await.unwrap();

    controller.handle_remote(RemoteEvent::Close { reason: None });

    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(notices.try_recv().unwrap().kind, NoticeKind::Connection);
}

#[tokio::test]
async fn messages_outside_connected_are_ignored() {
    let (mut controller, rig) = rig();
    controller.start().await.unwrap();
    receive(&mut controller, chunk(0.5)).await;
    assert!(rig.speaker.played.lock().is_empty());
    assert_eq!(controller.diagnostics_snapshot().chunks_received, 0);
}

#[tokio::test]
async fn output_failure_is_treated_like_a_transport_error() {
    let (mut controller, rig) = connected().await;
    let mut notices = controller.subscribe_notices();
    rig.speaker.broken.store(true, Ordering::SeqCst);

    receive(&mut controller, chunk(0.2)).await;

    assert_eq!(controller.state(), SessionState::Error);
    assert_eq!(notices.try_recv().unwrap().kind, NoticeKind::Transport);

    rig.speaker.broken.store(false, Ordering::SeqCst);
    controller.start().await.unwrap();
    assert_eq!(rig.speaker.opened.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lost_microphone_ends_the_session_with_a_transport_notice() {
    let (mut controller, rig) = connected().await;
    let mut notices = controller.subscribe_notices();

    rig.mic.lost.store(true, Ordering::SeqCst);
    controller.pump_capture();

    assert_eq!(controller.state(), SessionState::Error);
    assert_eq!(notices.try_recv().unwrap().kind, NoticeKind::Transport);
    assert_eq!(rig.mic.released.load(Ordering::SeqCst), 1);
    assert_eq!(rig.remote.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn starting_while_active_stops_the_old_session_first() {
    let (mut controller, rig) = connected().await;
    controller.start().await.unwrap();

    assert_eq!(controller.state(), SessionState::Connecting);
    assert_eq!(rig.remote.closes.load(Ordering::SeqCst), 1);
    assert_eq!(rig.mic.released.load(Ordering::SeqCst), 1);
    assert_eq!(rig.mic.acquired.load(Ordering::SeqCst), 2);
}

// ── Event loop ───────────────────────────────────────────────────────────

#[tokio::test]
async fn event_loop_echoes_audio_and_visualizer_decays_after_stop() {
    let speaker = Arc::new(SpeakerState::default());
    let mic = Arc::new(MicState::default());
    let config = VoiceConfig {
        frame_size: 1024,
        display_refresh: Duration::from_millis(5),
        capture_poll_interval: Duration::from_millis(2),
        ..VoiceConfig::default()
    };
    let controller = VoiceController::new(
        config,
        Arc::new(FakeMic(Arc::clone(&mic))),
        Arc::new(FakeSpeaker(Arc::clone(&speaker))),
        Arc::new(LoopbackConnector::new()),
    )
    .unwrap();
    let handle = controller.handle();
    let task = tokio::spawn(controller.run());

    handle.start().await.unwrap();
    let mut state = handle.watch_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == SessionState::Connected),
    )
    .await
    .expect("connected in time")
    .unwrap();

    let tone: Vec<f32> = (0..4096)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.5)
        .collect();
    mic.speak(&tone);

    let loudness = handle.loudness();
    tokio::time::timeout(Duration::from_secs(2), async {
        while speaker.played.lock().len() < 4 || *loudness.borrow() == 0.0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("echoed audio scheduled and loudness published");

    let played = speaker.played.lock().clone();
    for pair in played.windows(2) {
        assert!(pair[1].0 >= pair[0].0 + pair[0].1 - 1e-9);
    }
    assert_abs_diff_eq!(played[0].1, 1024.0 / 16_000.0, epsilon = 1.0 / OUTPUT_RATE as f64);

    handle.stop().await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == SessionState::Closed),
    )
    .await
    .expect("closed in time")
    .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*loudness.borrow(), 0.0);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(mic.released.load(Ordering::SeqCst), 1);
}

struct HangingConnector;

#[async_trait]
impl RemoteConnector for HangingConnector {
    async fn connect(
        &self,
        _config: &LiveConfig,
        _events: mpsc::UnboundedSender<RemoteEvent>,
    ) -> Result<Box<dyn RemoteSession>> {
        std::future::pending::<Result<Box<dyn RemoteSession>>>().await
    }
}

#[tokio::test]
async fn stop_is_served_while_connect_hangs() {
    let speaker = Arc::new(SpeakerState::default());
    let mic = Arc::new(MicState::default());
    let controller = VoiceController::new(
        VoiceConfig::default(),
        Arc::new(FakeMic(Arc::clone(&mic))),
        Arc::new(FakeSpeaker(Arc::clone(&speaker))),
        Arc::new(HangingConnector),
    )
    .unwrap();
    let handle = controller.handle();
    let task = tokio::spawn(controller.run());
    let mut state = handle.watch_state();

    handle.start().await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == SessionState::Connecting),
    )
    .await
    .expect("connecting in time")
    .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while mic.acquired.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("microphone acquired");

    handle.stop().await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == SessionState::Closed),
    )
    .await
    .expect("stop handled while connect is pending")
    .unwrap();
    assert!(speaker.played.lock().is_empty());

    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("event loop exits")
        .unwrap();
}
