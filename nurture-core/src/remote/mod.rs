//! Contract of the remote generative-audio channel.
//!
//! A [`RemoteConnector`] is an explicit factory: every `connect` call returns
//! a fresh [`RemoteSession`] and shares no client state with earlier calls.
//! Everything the channel reports back arrives as a [`RemoteEvent`] on the
//! sender handed to `connect`, so the session controller has exactly one
//! place where remote activity mutates its state.

pub mod loopback;
pub mod message;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::codec::{InboundChunk, OutboundPacket};
use crate::error::Result;

pub use loopback::LoopbackConnector;
pub use message::{RealtimeInput, ServerMessage};

/// Default persona for the conversational model.
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a calming, expert parenting coach named \
Nurture. Listen to the parent and the baby. Offer soothing advice in real-time. Keep responses \
concise and very calm.";

pub const DEFAULT_VOICE: &str = "Kore";

pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";

/// Kind of output requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

/// Parameters for opening a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveConfig {
    pub model: String,
    /// Rate of the PCM the client will stream (Hz).
    pub outbound_sample_rate: u32,
    pub response_modality: Modality,
    /// Prebuilt voice identifier.
    pub voice: String,
    pub system_instruction: String,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LIVE_MODEL.into(),
            outbound_sample_rate: 16_000,
            response_modality: Modality::Audio,
            voice: DEFAULT_VOICE.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
        }
    }
}

/// Everything the remote channel can report.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// The channel is ready for realtime input.
    Open,
    /// One inbound audio payload. A model turn may produce any number.
    Message(InboundChunk),
    /// The remote side closed the channel.
    Close { reason: Option<String> },
    Error(String),
}

/// Factory for remote sessions.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Open a new session. Resolves once the request is issued; the channel
    /// confirms readiness later with [`RemoteEvent::Open`].
    ///
    /// # Errors
    /// `VoiceError::Connect` if the channel cannot be established.
    async fn connect(
        &self,
        config: &LiveConfig,
        events: mpsc::UnboundedSender<RemoteEvent>,
    ) -> Result<Box<dyn RemoteSession>>;
}

/// A live session handle. Sends are fire-and-forget.
pub trait RemoteSession: Send {
    /// # Errors
    /// `VoiceError::Transport` if the channel is no longer writable.
    fn send_realtime_input(&mut self, packet: OutboundPacket) -> Result<()>;

    /// Close the channel. Idempotent; does not wait for in-flight sends.
    fn close(&mut self) -> Result<()>;
}
