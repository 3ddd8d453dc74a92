//! Nurture terminal host.
//!
//! Drives a [`VoiceController`] from stdin line commands and forwards its
//! status, notice and loudness streams to stdout as JSON lines, each prefixed
//! with its channel name.

mod commands;
mod settings;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use nurture_core::{
    ipc::events::{LoudnessEvent, LOUDNESS_CHANNEL, NOTICE_CHANNEL, STATUS_CHANNEL},
    CpalMicrophone, CpalSpeaker, LoopbackConnector, VoiceController,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use commands::{execute, Command};
use settings::{default_settings_path, load_settings};
use state::AppState;

/// How often the loudness level is sampled for stdout.
const LOUDNESS_EMIT_INTERVAL: Duration = Duration::from_millis(250);

fn emit<T: Serialize>(channel: &str, payload: &T) {
    match serde_json::to_string(payload) {
        Ok(json) => println!("{channel} {json}"),
        Err(e) => warn!("emit {channel}: {e}"),
    }
}

fn forward<T>(channel: &'static str, mut rx: broadcast::Receiver<T>)
where
    T: Serialize + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => emit(channel, &event),
                Err(RecvError::Lagged(n)) => warn!("{channel} receiver lagged by {n} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("nurture=info,nurture_core=info"))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_path = default_settings_path();
    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    info!(path = %settings_path.display(), voice = %settings.voice, "Nurture starting");

    let config = settings.voice_config();
    let connector = LoopbackConnector::for_config(&config)
        .with_echo_delay(Duration::from_millis(settings.echo_delay_ms));
    let controller = VoiceController::new(
        config.clone(),
        Arc::new(CpalMicrophone::from_config(&config)),
        Arc::new(CpalSpeaker::from_config(&config)),
        Arc::new(connector),
    )
    .context("voice configuration rejected")?;
    let voice = controller.handle();
    let engine = tokio::spawn(controller.run());

    forward(STATUS_CHANNEL, voice.subscribe_status());
    forward(NOTICE_CHANNEL, voice.subscribe_notices());

    let mut loudness = voice.loudness();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(LOUDNESS_EMIT_INTERVAL);
        let mut seq = 0u64;
        loop {
            tick.tick().await;
            match loudness.has_changed() {
                Ok(true) => {
                    let level = *loudness.borrow_and_update();
                    emit(LOUDNESS_CHANNEL, &LoudnessEvent { seq, level });
                    seq += 1;
                }
                Ok(false) => {}
                Err(_) => break,
            }
        }
    });

    let state = AppState::new(voice, settings, settings_path);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("type 'help' for commands");

    loop {
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => {
                state.voice.shutdown().await?;
                break;
            }
        };
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{message}");
                continue;
            }
        };
        match execute(command, &state).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => warn!("command failed: {e:#}"),
        }
    }

    engine.await.context("voice engine task panicked")?;
    info!("Nurture stopped");
    Ok(())
}
