use thiserror::Error;

/// All errors produced by nurture-core.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("no input device found")]
    NoInputDevice,

    #[error("remote channel failed to open: {0}")]
    Connect(String),

    #[error("audio chunk could not be decoded: {0}")]
    Decode(String),

    #[error("remote channel failed: {0}")]
    Transport(String),

    #[error("failed to release {resource}: {reason}")]
    ResourceTeardown {
        resource: &'static str,
        reason: String,
    },

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no voice session is active")]
    NotActive,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VoiceError {
    /// Whether this failure warrants a notification to the user.
    ///
    /// Decode and teardown failures are logged only.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied(_)
                | VoiceError::NoInputDevice
                | VoiceError::Connect(_)
                | VoiceError::Transport(_)
        )
    }

    /// One-line notice text shown to the user.
    pub fn notice(&self) -> String {
        match self {
            VoiceError::PermissionDenied(_) | VoiceError::NoInputDevice => {
                "Could not access microphone. Please ensure permissions are granted.".into()
            }
            VoiceError::Connect(_) => "Could not connect to the voice assistant.".into(),
            VoiceError::Transport(_) => "The voice session ended unexpectedly.".into(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_session_level_failures_are_user_visible() {
        assert!(VoiceError::PermissionDenied("denied".into()).is_user_visible());
        assert!(VoiceError::NoInputDevice.is_user_visible());
        assert!(VoiceError::Connect("refused".into()).is_user_visible());
        assert!(VoiceError::Transport("reset".into()).is_user_visible());

        assert!(!VoiceError::Decode("empty payload".into()).is_user_visible());
        assert!(!VoiceError::ResourceTeardown {
            resource: "microphone",
            reason: "detached".into(),
        }
        .is_user_visible());
    }

    #[test]
    fn permission_notice_is_single_line() {
        let notice = VoiceError::PermissionDenied("NotAllowedError".into()).notice();
        assert!(!notice.contains('\n'));
        assert!(notice.contains("microphone"));
    }
}
