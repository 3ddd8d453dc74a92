//! In-process echo channel.
//!
//! Confirms open right away and plays every outbound packet back as an
//! inbound chunk. Packets make the trip in their wire form: each is encoded
//! as a `RealtimeInput` message, its media blob is returned inside a server
//! model turn, and that turn is parsed back into chunks. Useful for
//! exercising the whole capture → playback path without network access.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    message::{RealtimeInput, ServerMessage},
    LiveConfig, RemoteConnector, RemoteEvent, RemoteSession,
};
use crate::codec::OutboundPacket;
use crate::config::VoiceConfig;
use crate::error::{Result, VoiceError};

#[derive(Debug, Clone)]
pub struct LoopbackConnector {
    /// Delay before each echo is delivered.
    echo_delay: Duration,
    /// Rate assumed for echoed blobs that do not declare one.
    inbound_rate: u32,
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::for_config(&VoiceConfig::default())
    }
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_config(config: &VoiceConfig) -> Self {
        Self {
            echo_delay: Duration::ZERO,
            inbound_rate: config.inbound_sample_rate,
        }
    }

    pub fn with_echo_delay(mut self, delay: Duration) -> Self {
        self.echo_delay = delay;
        self
    }
}

#[async_trait]
impl RemoteConnector for LoopbackConnector {
    async fn connect(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<RemoteEvent>,
    ) -> Result<Box<dyn RemoteSession>> {
        info!(
            model = config.model.as_str(),
            voice = config.voice.as_str(),
            "loopback session opened"
        );
        events
            .send(RemoteEvent::Open)
            .map_err(|_| VoiceError::Connect("event receiver dropped".into()))?;
        Ok(Box::new(LoopbackSession {
            events,
            echo_delay: self.echo_delay,
            inbound_rate: self.inbound_rate,
            closed: false,
        }))
    }
}

struct LoopbackSession {
    events: mpsc::UnboundedSender<RemoteEvent>,
    echo_delay: Duration,
    inbound_rate: u32,
    closed: bool,
}

impl LoopbackSession {
    /// The JSON a server would answer `packet` with.
    fn reply_for(packet: &OutboundPacket) -> Result<String> {
        let wire = serde_json::to_string(&RealtimeInput::from(packet))
            .map_err(|e| VoiceError::Transport(format!("encode realtime input: {e}")))?;
        let received: RealtimeInput = serde_json::from_str(&wire)
            .map_err(|e| VoiceError::Transport(format!("bad realtime input: {e}")))?;
        serde_json::to_string(&ServerMessage::with_audio(received.media))
            .map_err(|e| VoiceError::Transport(format!("encode server message: {e}")))
    }
}

impl RemoteSession for LoopbackSession {
    fn send_realtime_input(&mut self, packet: OutboundPacket) -> Result<()> {
        if self.closed {
            return Err(VoiceError::Transport("loopback session is closed".into()));
        }
        let reply = Self::reply_for(&packet)?;
        let chunks = ServerMessage::parse(&reply)?.audio_chunks(self.inbound_rate);
        debug!(sequence = packet.sequence, chunks = chunks.len(), "loopback echo");

        let events = self.events.clone();
        if self.echo_delay.is_zero() {
            for chunk in chunks {
                events
                    .send(RemoteEvent::Message(chunk))
                    .map_err(|_| VoiceError::Transport("event receiver dropped".into()))?;
            }
            return Ok(());
        }

        let delay = self.echo_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for chunk in chunks {
                // Receiver may be gone if the session stopped meanwhile.
                let _ = events.send(RemoteEvent::Message(chunk));
            }
        });
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
