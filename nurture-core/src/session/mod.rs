//! Voice session lifecycle.
//!
//! ```text
//! Idle ──start──► Connecting ──Open──► Connected ──stop / Close / Error──► Closed | Error
//!  ▲                  │                                                      │
//!  └──── mic denied / connect failed                     start again ───────┘
//! ```

pub mod controller;
pub mod diagnostics;

use serde::{Deserialize, Serialize};

pub use controller::{VoiceCommand, VoiceController, VoiceHandle};
pub use diagnostics::{DiagnosticsSnapshot, SessionDiagnostics};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closed,
    Error,
}

impl SessionState {
    /// `Connecting` or `Connected`: a session holds resources.
    pub fn is_active(self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connecting_and_connected_are_active() {
        assert!(SessionState::Connecting.is_active());
        assert!(SessionState::Connected.is_active());
        assert!(!SessionState::Idle.is_active());
        assert!(!SessionState::Closed.is_active());
        assert!(!SessionState::Error.is_active());
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionState::Connecting).unwrap(),
            r#""connecting""#
        );
    }
}
