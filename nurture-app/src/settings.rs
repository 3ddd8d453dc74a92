//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nurture_core::{
    remote::{DEFAULT_LIVE_MODEL, DEFAULT_SYSTEM_INSTRUCTION, DEFAULT_VOICE},
    LiveConfig, VoiceConfig,
};
use serde::{Deserialize, Serialize};

const MIN_FRAME_SIZE: usize = 256;
const MAX_FRAME_SIZE: usize = 16_384;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub preferred_input_device: Option<String>,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Samples per outbound frame.
    pub frame_size: usize,
    /// Requested output device rate (Hz).
    pub output_sample_rate: u32,
    /// Drop inbound audio once playback is queued this far ahead. `None` never drops.
    pub max_schedule_ahead_ms: Option<u64>,
    /// Delay applied by the loopback channel before echoing audio.
    pub echo_delay_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            model: DEFAULT_LIVE_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            frame_size: 4096,
            output_sample_rate: 24_000,
            max_schedule_ahead_ms: None,
            echo_delay_ms: 250,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model = non_empty_or(&self.model, DEFAULT_LIVE_MODEL);
        self.voice = non_empty_or(&self.voice, DEFAULT_VOICE);
        self.system_instruction = non_empty_or(&self.system_instruction, DEFAULT_SYSTEM_INSTRUCTION);
        self.frame_size = self
            .frame_size
            .clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE)
            .next_power_of_two()
            .min(MAX_FRAME_SIZE);
        self.output_sample_rate = self.output_sample_rate.clamp(8_000, 192_000);
        self.max_schedule_ahead_ms = self.max_schedule_ahead_ms.filter(|&ms| ms > 0);
        self.echo_delay_ms = self.echo_delay_ms.min(10_000);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }

    /// Environment variables win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(voice) = std::env::var("NURTURE_VOICE") {
            self.voice = voice;
        }
        if let Ok(instruction) = std::env::var("NURTURE_SYSTEM_INSTRUCTION") {
            self.system_instruction = instruction;
        }
        if let Some(size) = std::env::var("NURTURE_FRAME_SIZE")
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
        {
            self.frame_size = size;
        }
        self.normalize();
    }

    pub fn voice_config(&self) -> VoiceConfig {
        let defaults = VoiceConfig::default();
        VoiceConfig {
            frame_size: self.frame_size,
            output_sample_rate: self.output_sample_rate,
            max_schedule_ahead: self.max_schedule_ahead_ms.map(Duration::from_millis),
            preferred_input_device: self.preferred_input_device.clone(),
            live: LiveConfig {
                model: self.model.clone(),
                outbound_sample_rate: defaults.capture_sample_rate,
                voice: self.voice.clone(),
                system_instruction: self.system_instruction.clone(),
                ..LiveConfig::default()
            },
            ..defaults
        }
    }
}

fn non_empty_or(raw: &str, fallback: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        fallback.into()
    } else {
        trimmed.into()
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Nurture")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("nurture")
            .join("settings.json")
    }
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
