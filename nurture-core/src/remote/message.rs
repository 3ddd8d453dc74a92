//! JSON message shapes of the live channel.
//!
//! Outbound audio travels as a base64 media blob:
//!
//! ```json
//! { "media": { "data": "<base64 i16 LE>", "mimeType": "audio/pcm;rate=16000" } }
//! ```
//!
//! Inbound audio is nested in the model turn:
//!
//! ```json
//! { "serverContent": { "modelTurn": { "parts": [
//!     { "inlineData": { "data": "<base64>", "mimeType": "audio/pcm;rate=24000" } }
//! ] } } }
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{InboundChunk, OutboundPacket};
use crate::error::{Result, VoiceError};

/// Base64 payload plus its encoding tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub data: String,
    pub mime_type: String,
}

/// Outbound realtime input message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: MediaBlob,
}

impl From<&OutboundPacket> for RealtimeInput {
    fn from(packet: &OutboundPacket) -> Self {
        Self {
            media: MediaBlob {
                data: STANDARD.encode(&packet.data),
                mime_type: packet.mime_type.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<MediaBlob>,
}

/// Sample rate declared by a `audio/pcm;rate=N` tag.
pub fn declared_rate(mime_type: &str) -> Option<u32> {
    let params = mime_type.strip_prefix("audio/pcm")?;
    params
        .split(';')
        .filter_map(|p| p.trim().strip_prefix("rate="))
        .find_map(|r| r.trim().parse().ok())
}

impl ServerMessage {
    /// # Errors
    /// `VoiceError::Transport` if `json` is not a server message.
    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| VoiceError::Transport(format!("bad message: {e}")))
    }

    /// Audio chunks carried by this message, in part order.
    ///
    /// Text parts and non-PCM blobs are skipped. A blob whose base64 does not
    /// decode becomes an empty chunk so the decoder reports it and the
    /// arrival sequence stays intact.
    pub fn audio_chunks(&self, default_rate: u32) -> Vec<InboundChunk> {
        let Some(turn) = self
            .server_content
            .as_ref()
            .and_then(|c| c.model_turn.as_ref())
        else {
            return Vec::new();
        };

        turn.parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.mime_type.is_empty() || blob.mime_type.starts_with("audio/pcm"))
            .map(|blob| {
                let rate = declared_rate(&blob.mime_type).unwrap_or(default_rate);
                let data = STANDARD.decode(&blob.data).unwrap_or_else(|e| {
                    warn!("inline audio is not valid base64: {e}");
                    Vec::new()
                });
                InboundChunk::new(data, rate)
            })
            .collect()
    }
}

impl ServerMessage {
    /// A model turn with `blob` as its only part.
    pub fn with_audio(blob: MediaBlob) -> Self {
        Self {
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![Part {
                        text: None,
                        inline_data: Some(blob),
                    }],
                }),
                turn_complete: false,
                interrupted: false,
            }),
        }
    }
}
