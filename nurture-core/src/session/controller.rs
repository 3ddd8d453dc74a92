//! `VoiceController`: owner of every resource a voice session holds.
//!
//! ## Event loop
//!
//! ```text
//!                ┌──────────── VoiceCommand (mpsc) ◄── VoiceHandle
//!                │┌─────────── StartDone (mpsc)    ◄── spawned start attempt (mic, speaker, connect)
//!                ││┌────────── RemoteEvent (mpsc)  ◄── RemoteSession
//! VoiceController::run ◄────── DecodeDone (mpsc)   ◄── spawn_blocking(decode_chunk)
//!                │└─────────── capture tick        ──► CaptureGraph::pump ──► send_realtime_input
//!                └──► status / notice (broadcast), state (watch) ──► VisualizerSampler
//! ```
//!
//! All state mutation happens on the task running [`VoiceController::run`],
//! one event at a time. Nothing the loop awaits can hold it up: acquiring
//! the microphone, opening the speaker and connecting the remote channel run
//! in a spawned attempt that reports back as a `StartDone`, and decoding runs
//! on the blocking pool. Both are tagged with the session generation.
//! Teardown bumps the generation and aborts a pending attempt, so results
//! that still arrive from a finished session are released, never installed.
//!
//! ## Teardown
//!
//! [`VoiceController::stop`] and every failure path funnel into one routine
//! that releases whatever the session managed to acquire: remote channel,
//! microphone, both taps, scheduler bookkeeping, and audio queued on the
//! output timeline. A failure releasing one handle is logged and counted;
//! the remaining handles are still released. Running it twice is a no-op.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use super::{
    diagnostics::{DiagnosticsSnapshot, SessionDiagnostics},
    SessionState,
};
use crate::{
    audio::{InputStream, Microphone},
    capture::{AnalysisHandle, CaptureGraph},
    codec::{decode_chunk, InboundChunk, PlaybackBuffer},
    config::VoiceConfig,
    error::{Result, VoiceError},
    ipc::events::{NoticeEvent, SessionStatusEvent},
    playback::{scheduler::ScheduleOutcome, AudioSink, PlaybackScheduler, ReorderBuffer, Speaker},
    remote::{LiveConfig, RemoteConnector, RemoteEvent, RemoteSession},
    visualizer::VisualizerSampler,
};

/// Broadcast capacity for status and notice events.
const BROADCAST_CAP: usize = 64;

/// Pending commands before `VoiceHandle` calls wait.
const COMMAND_CAP: usize = 16;

/// Requests accepted by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceCommand {
    Start,
    Stop,
    /// Tear down and leave the event loop.
    Shutdown,
}

/// Result of one background decode.
#[derive(Debug)]
struct DecodeDone {
    generation: u64,
    seq: u64,
    result: Result<PlaybackBuffer>,
}

/// Handles gathered by a start attempt that succeeded.
struct Opened {
    input: Box<dyn InputStream>,
    remote: Box<dyn RemoteSession>,
    events: mpsc::UnboundedReceiver<RemoteEvent>,
}

/// Outcome of one start attempt. A sink opened along the way is returned
/// even when a later step failed; the output device outlives sessions.
struct StartDone {
    generation: u64,
    sink: Option<Box<dyn AudioSink>>,
    result: Result<Opened>,
}

/// Everything a start attempt needs, detached from the controller so it can
/// run while the event loop keeps serving commands and events.
struct StartAttempt {
    generation: u64,
    microphone: Arc<dyn Microphone>,
    /// `None` when the output device is already open.
    speaker: Option<Arc<dyn Speaker>>,
    connector: Arc<dyn RemoteConnector>,
    live: LiveConfig,
}

impl StartAttempt {
    async fn run(self) -> StartDone {
        let mut sink = None;
        let result = self.open(&mut sink).await;
        StartDone {
            generation: self.generation,
            sink,
            result,
        }
    }

    async fn open(&self, sink: &mut Option<Box<dyn AudioSink>>) -> Result<Opened> {
        info!("requesting microphone");
        let mut input = self.microphone.acquire().await.map_err(|e| match e {
            VoiceError::PermissionDenied(_) | VoiceError::NoInputDevice => e,
            other => VoiceError::PermissionDenied(other.to_string()),
        })?;

        if let Some(speaker) = &self.speaker {
            match speaker.open().await {
                Ok(opened) => {
                    info!(sample_rate = opened.sample_rate(), "output device opened");
                    *sink = Some(opened);
                }
                Err(e) => {
                    release_input(input.as_mut());
                    return Err(VoiceError::Transport(format!("output device unavailable: {e}")));
                }
            }
        }

        let (events_tx, events) = mpsc::unbounded_channel();
        info!(
            model = self.live.model.as_str(),
            voice = self.live.voice.as_str(),
            "connecting remote channel"
        );
        match self.connector.connect(&self.live, events_tx).await {
            Ok(remote) => Ok(Opened {
                input,
                remote,
                events,
            }),
            Err(e) => {
                release_input(input.as_mut());
                Err(match e {
                    VoiceError::Connect(_) => e,
                    other => VoiceError::Connect(other.to_string()),
                })
            }
        }
    }
}

fn release_input(input: &mut dyn InputStream) {
    if let Err(e) = input.release() {
        warn!("microphone release failed: {e}");
    }
}

/// Resources of one session. Every field is optional so a half-built
/// session can be torn down the same way as a complete one.
struct ActiveSession {
    id: u64,
    span: Span,
    input: Option<Box<dyn InputStream>>,
    graph: Option<CaptureGraph>,
    remote: Option<Box<dyn RemoteSession>>,
    scheduler: Option<PlaybackScheduler>,
    reorder: ReorderBuffer<PlaybackBuffer>,
    next_seq: u64,
    in_flight: usize,
}

impl ActiveSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            span: info_span!("voice_session", session_id = id),
            input: None,
            graph: None,
            remote: None,
            scheduler: None,
            reorder: ReorderBuffer::new(),
            next_seq: 0,
            in_flight: 0,
        }
    }
}

pub struct VoiceController {
    config: VoiceConfig,
    microphone: Arc<dyn Microphone>,
    speaker: Arc<dyn Speaker>,
    connector: Arc<dyn RemoteConnector>,
    /// Opened on first use and kept across sessions; dropped if it fails.
    sink: Option<Box<dyn AudioSink>>,
    session: Option<ActiveSession>,
    state: SessionState,
    /// Bumped on every start and every teardown.
    generation: u64,
    analysis: AnalysisHandle,
    visualizer: Option<VisualizerSampler>,
    level_rx: watch::Receiver<f32>,
    state_tx: watch::Sender<SessionState>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    notice_tx: broadcast::Sender<NoticeEvent>,
    remote_rx: Option<mpsc::UnboundedReceiver<RemoteEvent>>,
    start_tx: mpsc::UnboundedSender<StartDone>,
    start_rx: mpsc::UnboundedReceiver<StartDone>,
    /// Start attempt spawned by the event loop and not yet reported.
    pending_start: Option<JoinHandle<()>>,
    decode_tx: mpsc::UnboundedSender<DecodeDone>,
    decode_rx: mpsc::UnboundedReceiver<DecodeDone>,
    commands_tx: mpsc::Sender<VoiceCommand>,
    commands_rx: Option<mpsc::Receiver<VoiceCommand>>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl VoiceController {
    /// # Errors
    /// `VoiceError::Config` if `config` fails validation.
    pub fn new(
        config: VoiceConfig,
        microphone: Arc<dyn Microphone>,
        speaker: Arc<dyn Speaker>,
        connector: Arc<dyn RemoteConnector>,
    ) -> Result<Self> {
        config.validate()?;

        let analysis = AnalysisHandle::new(&config.analyser);
        let visualizer = VisualizerSampler::new(analysis.clone());
        let level_rx = visualizer.subscribe();
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (notice_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (start_tx, start_rx) = mpsc::unbounded_channel();
        let (decode_tx, decode_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CAP);

        Ok(Self {
            config,
            microphone,
            speaker,
            connector,
            sink: None,
            session: None,
            state: SessionState::Idle,
            generation: 0,
            analysis,
            visualizer: Some(visualizer),
            level_rx,
            state_tx,
            status_tx,
            notice_tx,
            remote_rx: None,
            start_tx,
            start_rx,
            pending_start: None,
            decode_tx,
            decode_rx,
            commands_tx,
            commands_rx: Some(commands_rx),
            diagnostics: Arc::new(SessionDiagnostics::default()),
        })
    }

    /// A cloneable handle for driving [`VoiceController::run`]. Create every
    /// handle you need before calling `run`.
    pub fn handle(&self) -> VoiceHandle {
        VoiceHandle {
            commands: self.commands_tx.clone(),
            state: self.state_tx.subscribe(),
            status_tx: self.status_tx.clone(),
            notice_tx: self.notice_tx.clone(),
            loudness: self.level_rx.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<NoticeEvent> {
        self.notice_tx.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn loudness(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }

    /// Shared analyser the capture graph writes into.
    pub fn analysis(&self) -> AnalysisHandle {
        self.analysis.clone()
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// `next_start` of the current session's scheduler, if one exists.
    pub fn next_start(&self) -> Option<f64> {
        self.session
            .as_ref()
            .and_then(|s| s.scheduler.as_ref())
            .map(PlaybackScheduler::next_start)
    }

    /// Drive the controller until a `Shutdown` command arrives or every
    /// [`VoiceHandle`] is dropped.
    pub async fn run(mut self) {
        let Some(mut commands) = self.commands_rx.take() else {
            error!("voice controller event loop already ran");
            return;
        };
        // From here on only the handles keep the command channel open.
        let (detached, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.commands_tx, detached));

        if let Some(visualizer) = self.visualizer.take() {
            tokio::spawn(visualizer.run(self.state_tx.subscribe(), self.config.display_refresh));
        }

        let mut capture_tick = tokio::time::interval(self.config.capture_poll_interval);
        capture_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("voice controller running");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(VoiceCommand::Start) => self.spawn_start(),
                    Some(VoiceCommand::Stop) => self.stop(),
                    Some(VoiceCommand::Shutdown) | None => break,
                },
                event = next_remote(&mut self.remote_rx) => match event {
                    Some(event) => self.handle_remote(event),
                    None => {
                        self.remote_rx = None;
                        if self.state.is_active() {
                            self.handle_remote(RemoteEvent::Close {
                                reason: Some("remote event channel dropped".into()),
                            });
                        }
                    }
                },
                Some(done) = self.start_rx.recv() => {
                    if let Err(e) = self.finish_start(done) {
                        debug!("start did not complete: {e}");
                    }
                }
                Some(done) = self.decode_rx.recv() => self.on_decoded(done),
                _ = capture_tick.tick() => self.pump_capture(),
            }
        }

        self.shutdown();
        info!("voice controller stopped");
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Begin a new session: acquire the microphone, make sure the output
    /// device is open, build the capture graph and ask the remote channel
    /// to connect. The session is `Connecting` until the channel reports
    /// [`RemoteEvent::Open`].
    ///
    /// An active session is torn down first. This awaits the whole attempt;
    /// [`VoiceController::run`] instead spawns it and keeps serving events.
    ///
    /// # Errors
    /// The failure that ended the attempt. The controller is already back
    /// in `Idle` and any user notice has been published.
    pub async fn start(&mut self) -> Result<()> {
        let attempt = self.begin_start();
        let done = attempt.run().instrument(self.session_span()).await;
        self.finish_start(done)
    }

    fn spawn_start(&mut self) {
        let attempt = self.begin_start();
        let tx = self.start_tx.clone();
        let task = async move {
            // Receiver lives as long as the controller.
            let _ = tx.send(attempt.run().await);
        };
        self.pending_start = Some(tokio::spawn(task.instrument(self.session_span())));
    }

    fn begin_start(&mut self) -> StartAttempt {
        if self.state.is_active() {
            info!(state = ?self.state, "stopping active session before restart");
            self.teardown();
        }

        self.generation += 1;
        self.session = Some(ActiveSession::new(self.generation));
        self.diagnostics.reset();
        self.set_state(SessionState::Connecting, None);

        StartAttempt {
            generation: self.generation,
            microphone: Arc::clone(&self.microphone),
            speaker: self.sink.is_none().then(|| Arc::clone(&self.speaker)),
            connector: Arc::clone(&self.connector),
            live: self.config.live.clone(),
        }
    }

    /// Install what a start attempt gathered, or fail the session with its
    /// error. Results of an abandoned attempt are released.
    fn finish_start(&mut self, done: StartDone) -> Result<()> {
        let StartDone {
            generation,
            sink,
            result,
        } = done;
        if self.sink.is_none() {
            self.sink = sink;
        }

        if generation != self.generation || self.state != SessionState::Connecting {
            debug!(generation, "releasing resources of an abandoned start");
            if let Ok(opened) = result {
                self.release_opened(opened);
            }
            return Ok(());
        }
        self.pending_start = None;

        let span = self.session_span();
        let _enter = span.enter();
        match result.and_then(|opened| self.install(opened)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(&e, SessionState::Idle);
                Err(e)
            }
        }
    }

    fn install(&mut self, opened: Opened) -> Result<()> {
        if self.session.is_none() {
            self.release_opened(opened);
            return Err(VoiceError::NotActive);
        }
        let Opened {
            input,
            remote,
            events,
        } = opened;
        let device_rate = input.sample_rate();
        let session = self.session_mut()?;
        session.input = Some(input);
        session.remote = Some(remote);
        self.remote_rx = Some(events);

        let clock = match self.sink.as_ref() {
            Some(sink) => sink.clock(),
            None => return Err(VoiceError::Transport("output device unavailable".into())),
        };
        let scheduler =
            PlaybackScheduler::new(clock).with_max_ahead(self.config.max_schedule_ahead);
        let graph = CaptureGraph::new(device_rate, &self.config, self.analysis.clone())?;
        let session = self.session_mut()?;
        session.scheduler = Some(scheduler);
        session.graph = Some(graph);
        Ok(())
    }

    fn release_opened(&self, opened: Opened) {
        let Opened {
            mut input,
            mut remote,
            ..
        } = opened;
        if let Err(e) = remote.close() {
            self.teardown_failed("remote channel", e);
        }
        if let Err(e) = input.release() {
            self.teardown_failed("microphone", e);
        }
    }

    /// User stop. Idempotent, valid in every state.
    pub fn stop(&mut self) {
        let was = self.state;
        self.teardown();
        if was != SessionState::Idle && was != SessionState::Closed {
            self.set_state(SessionState::Closed, None);
        }
    }

    /// Stop any session and release the output device.
    pub fn shutdown(&mut self) {
        self.stop();
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.cancel_pending() {
                warn!("output device release failed: {e}");
            }
        }
    }

    // ── Event handlers ───────────────────────────────────────────────────

    /// Single dispatch point for everything the remote channel reports.
    pub fn handle_remote(&mut self, event: RemoteEvent) {
        let span = self.session_span();
        let _enter = span.enter();

        match (event, self.state) {
            (RemoteEvent::Open, SessionState::Connecting) => {
                let wired = self
                    .session
                    .as_mut()
                    .and_then(|s| s.graph.as_mut())
                    .map(CaptureGraph::wire_frame_tap)
                    .unwrap_or(false);
                if !wired {
                    warn!("remote opened without a capture graph");
                }
                info!("remote channel open, streaming");
                self.set_state(SessionState::Connected, None);
            }
            (RemoteEvent::Message(chunk), SessionState::Connected) => {
                SessionDiagnostics::bump(&self.diagnostics.chunks_received);
                self.dispatch_decode(chunk);
            }
            (RemoteEvent::Close { reason }, SessionState::Connecting) => {
                let reason = reason.unwrap_or_else(|| "closed before open".into());
                self.fail(&VoiceError::Connect(reason), SessionState::Idle);
            }
            (RemoteEvent::Error(message), SessionState::Connecting) => {
                self.fail(&VoiceError::Connect(message), SessionState::Idle);
            }
            (RemoteEvent::Close { reason }, SessionState::Connected) => {
                let reason = reason.unwrap_or_else(|| "closed by remote".into());
                self.fail(&VoiceError::Transport(reason), SessionState::Closed);
            }
            (RemoteEvent::Error(message), SessionState::Connected) => {
                self.fail(&VoiceError::Transport(message), SessionState::Error);
            }
            (event, state) => debug!(?state, ?event, "ignoring remote event"),
        }
    }

    /// Drain the microphone through the capture graph and send every
    /// completed frame.
    pub fn pump_capture(&mut self) {
        let microphone_lost = self
            .session
            .as_ref()
            .and_then(|s| s.input.as_ref())
            .is_some_and(|input| !input.is_live());
        if microphone_lost {
            self.fail(
                &VoiceError::Transport("microphone stopped delivering audio".into()),
                SessionState::Error,
            );
            return;
        }

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let ActiveSession {
            input,
            graph,
            remote,
            ..
        } = session;
        let (Some(input), Some(graph)) = (input.as_mut(), graph.as_mut()) else {
            return;
        };

        let diagnostics = &self.diagnostics;
        let mut failure = None;
        graph.pump(input.as_mut(), |packet| {
            SessionDiagnostics::bump(&diagnostics.frames_captured);
            if failure.is_some() {
                return;
            }
            let Some(remote) = remote.as_mut() else {
                return;
            };
            match remote.send_realtime_input(packet) {
                Ok(()) => SessionDiagnostics::bump(&diagnostics.packets_sent),
                Err(e) => failure = Some(e),
            }
        });

        if let Some(e) = failure {
            let e = match e {
                VoiceError::Transport(_) => e,
                other => VoiceError::Transport(other.to_string()),
            };
            self.fail(&e, SessionState::Error);
        }
    }

    fn dispatch_decode(&mut self, chunk: InboundChunk) {
        let Some(output_rate) = self.sink.as_ref().map(|s| s.sample_rate()) else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let seq = session.next_seq;
        session.next_seq += 1;
        session.in_flight += 1;

        let generation = self.generation;
        let tx = self.decode_tx.clone();
        tokio::task::spawn_blocking(move || {
            let result = decode_chunk(&chunk, output_rate);
            // Receiver lives as long as the controller.
            let _ = tx.send(DecodeDone {
                generation,
                seq,
                result,
            });
        });
    }

    /// Accept one finished decode and schedule everything now in order.
    fn on_decoded(&mut self, done: DecodeDone) {
        if done.generation != self.generation || self.session.is_none() {
            SessionDiagnostics::bump(&self.diagnostics.stale_decodes_discarded);
            debug!(seq = done.seq, "discarding decode from a finished session");
            return;
        }
        let span = self.session_span();
        let _enter = span.enter();

        let ready = match self.session.as_mut() {
            Some(session) => {
                session.in_flight = session.in_flight.saturating_sub(1);
                let buffer = match done.result {
                    Ok(buffer) => {
                        SessionDiagnostics::bump(&self.diagnostics.chunks_decoded);
                        Some(buffer)
                    }
                    Err(e) => {
                        SessionDiagnostics::bump(&self.diagnostics.decode_errors);
                        warn!(seq = done.seq, "dropping inbound chunk: {e}");
                        None
                    }
                };
                session.reorder.insert(done.seq, buffer);
                session.reorder.drain_ready()
            }
            None => return,
        };

        for buffer in ready {
            if let Err(e) = self.schedule(buffer) {
                // The device is gone; reopen it on the next start.
                self.sink = None;
                self.fail(&e, SessionState::Error);
                return;
            }
        }
    }

    /// Wait until every decode dispatched by the current session has been
    /// handled.
    pub async fn flush_decodes(&mut self) {
        while self.session.as_ref().is_some_and(|s| s.in_flight > 0) {
            match self.decode_rx.recv().await {
                Some(done) => self.on_decoded(done),
                None => break,
            }
        }
    }

    fn schedule(&mut self, buffer: PlaybackBuffer) -> Result<()> {
        let scheduler = self.session.as_mut().and_then(|s| s.scheduler.as_mut());
        let (Some(scheduler), Some(sink)) = (scheduler, self.sink.as_mut()) else {
            return Err(VoiceError::Transport("no output device".into()));
        };
        let outcome = scheduler
            .schedule(buffer, sink.as_mut())
            .map_err(|e| VoiceError::Transport(format!("playback failed: {e}")))?;
        match outcome {
            ScheduleOutcome::Scheduled(slot) => {
                SessionDiagnostics::bump(&self.diagnostics.buffers_scheduled);
                if slot.caught_up {
                    SessionDiagnostics::bump(&self.diagnostics.catch_ups);
                    debug!(start = slot.start, "playback caught up with the live clock");
                }
            }
            ScheduleOutcome::DroppedBacklog { .. } => {
                SessionDiagnostics::bump(&self.diagnostics.chunks_dropped_backlog);
            }
        }
        Ok(())
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn session_mut(&mut self) -> Result<&mut ActiveSession> {
        self.session.as_mut().ok_or(VoiceError::NotActive)
    }

    fn session_span(&self) -> Span {
        self.session
            .as_ref()
            .map(|s| s.span.clone())
            .unwrap_or_else(Span::none)
    }

    /// End the session because of `err`, then move to `next`.
    fn fail(&mut self, err: &VoiceError, next: SessionState) {
        match err {
            VoiceError::Transport(_) => error!("voice session failed: {err}"),
            _ => warn!("voice session failed: {err}"),
        }
        self.teardown();
        self.set_state(next, Some(err.to_string()));
        if let Some(notice) = NoticeEvent::from_error(err) {
            let _ = self.notice_tx.send(notice);
        }
    }

    /// Release everything the current session holds. Safe in every state.
    fn teardown(&mut self) {
        self.generation += 1;
        self.remote_rx = None;
        if let Some(attempt) = self.pending_start.take() {
            // Dropping the attempt drops whatever it acquired so far.
            attempt.abort();
        }
        let Some(mut session) = self.session.take() else {
            return;
        };
        let _enter = session.span.enter();

        if let Some(mut remote) = session.remote.take() {
            if let Err(e) = remote.close() {
                self.teardown_failed("remote channel", e);
            }
        }
        if let Some(mut input) = session.input.take() {
            if let Err(e) = input.release() {
                self.teardown_failed("microphone", e);
            }
        }
        if let Some(mut graph) = session.graph.take() {
            graph.disconnect();
        }
        if let Some(mut scheduler) = session.scheduler.take() {
            scheduler.reset();
        }
        if let Some(Err(e)) = self.sink.as_mut().map(|sink| sink.cancel_pending()) {
            self.teardown_failed("pending playback", e);
        }
        session.reorder.reset();

        let d = self.diagnostics.snapshot();
        info!(
            frames_captured = d.frames_captured,
            packets_sent = d.packets_sent,
            chunks_received = d.chunks_received,
            decode_errors = d.decode_errors,
            buffers_scheduled = d.buffers_scheduled,
            catch_ups = d.catch_ups,
            teardown_errors = d.teardown_errors,
            "voice session torn down"
        );
    }

    fn teardown_failed(&self, resource: &'static str, err: VoiceError) {
        SessionDiagnostics::bump(&self.diagnostics.teardown_errors);
        let err = match err {
            VoiceError::ResourceTeardown { .. } => err,
            other => VoiceError::ResourceTeardown {
                resource,
                reason: other.to_string(),
            },
        };
        warn!("{err}");
    }

    fn set_state(&mut self, state: SessionState, detail: Option<String>) {
        self.state = state;
        self.state_tx.send_replace(state);
        let session_id = self.session.as_ref().map(|s| s.id).or(match self.generation {
            0 => None,
            _ => Some(self.generation),
        });
        let _ = self.status_tx.send(SessionStatusEvent {
            state,
            session_id,
            detail,
        });
    }
}

impl Drop for VoiceController {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn next_remote(rx: &mut Option<mpsc::UnboundedReceiver<RemoteEvent>>) -> Option<RemoteEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable front end to a running [`VoiceController`].
#[derive(Clone)]
pub struct VoiceHandle {
    commands: mpsc::Sender<VoiceCommand>,
    state: watch::Receiver<SessionState>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    notice_tx: broadcast::Sender<NoticeEvent>,
    loudness: watch::Receiver<f32>,
    diagnostics: Arc<SessionDiagnostics>,
}

impl VoiceHandle {
    pub async fn start(&self) -> Result<()> {
        self.send(VoiceCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(VoiceCommand::Stop).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(VoiceCommand::Shutdown).await
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<NoticeEvent> {
        self.notice_tx.subscribe()
    }

    pub fn loudness(&self) -> watch::Receiver<f32> {
        self.loudness.clone()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    async fn send(&self, command: VoiceCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| VoiceError::Other(anyhow::anyhow!("voice controller has stopped")))
    }
}
