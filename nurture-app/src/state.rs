//! Shared application state handed to command handlers.

use std::path::PathBuf;

use nurture_core::VoiceHandle;
use parking_lot::Mutex;

use crate::settings::AppSettings;

pub struct AppState {
    pub voice: VoiceHandle,
    pub settings: Mutex<AppSettings>,
    pub settings_path: PathBuf,
}

impl AppState {
    pub fn new(voice: VoiceHandle, settings: AppSettings, settings_path: PathBuf) -> Self {
        Self {
            voice,
            settings: Mutex::new(settings),
            settings_path,
        }
    }
}
