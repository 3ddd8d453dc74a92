//! Events published by the voice controller.
//!
//! ## Channel names
//!
//! | Event | Channel |
//! |-------|---------|
//! | `SessionStatusEvent` | `"nurture://status"` |
//! | `NoticeEvent` | `"nurture://notice"` |
//! | `LoudnessEvent` | `"nurture://loudness"` |

use serde::{Deserialize, Serialize};

use crate::error::VoiceError;
use crate::session::SessionState;

pub const STATUS_CHANNEL: &str = "nurture://status";
pub const NOTICE_CHANNEL: &str = "nurture://notice";
pub const LOUDNESS_CHANNEL: &str = "nurture://loudness";

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Emitted on every session state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Session the transition belongs to; `None` before the first session.
    pub session_id: Option<u64>,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------------
// User notices
// ---------------------------------------------------------------------------

/// What a notice is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Microphone,
    Connection,
    Transport,
}

/// A one-line message for the user. Only session-level failures produce one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticeEvent {
    pub kind: NoticeKind,
    pub message: String,
}

impl NoticeEvent {
    /// Notice for `err`, or `None` for failures that are only logged.
    pub fn from_error(err: &VoiceError) -> Option<Self> {
        if !err.is_user_visible() {
            return None;
        }
        let kind = match err {
            VoiceError::PermissionDenied(_) | VoiceError::NoInputDevice => NoticeKind::Microphone,
            VoiceError::Connect(_) => NoticeKind::Connection,
            _ => NoticeKind::Transport,
        };
        Some(Self {
            kind,
            message: err.notice(),
        })
    }
}

// ---------------------------------------------------------------------------
// Loudness
// ---------------------------------------------------------------------------

/// One visualizer sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoudnessEvent {
    /// Monotonically increasing sample number.
    pub seq: u64,
    /// Mean spectrum level in [0.0, 1.0]; 0 whenever no session is connected.
    pub level: f32,
}
