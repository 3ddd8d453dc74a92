//! Engine configuration.

use std::time::Duration;

use crate::error::{Result, VoiceError};
use crate::remote::LiveConfig;

/// Spectrum analyser settings for the visualizer tap.
#[derive(Debug, Clone)]
pub struct AnalyserConfig {
    /// FFT window length (power of two). Default: 256.
    pub fft_size: usize,
    /// Temporal smoothing in [0, 1]; higher is smoother. Default: 0.8.
    pub smoothing: f32,
    /// Level mapped to 0. Default: -100 dB.
    pub min_decibels: f32,
    /// Level mapped to 1. Default: -30 dB.
    pub max_decibels: f32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
        }
    }
}

/// Configuration for `VoiceController`.
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Samples per outbound frame. Fixed for a session's lifetime. Default: 4096.
    pub frame_size: usize,
    /// Rate of outbound audio (Hz). Microphone audio is resampled to it. Default: 16000.
    pub capture_sample_rate: u32,
    /// Rate requested from the output device (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// Rate assumed for inbound chunks that do not declare one (Hz). Default: 24000.
    pub inbound_sample_rate: u32,
    pub analyser: AnalyserConfig,
    /// Visualizer polling period. Default: 16 ms (~60 Hz).
    pub display_refresh: Duration,
    /// How often the event loop drains the microphone ring. Default: 10 ms.
    pub capture_poll_interval: Duration,
    /// Refuse inbound audio once playback is queued this far ahead.
    /// `None` (default) never drops; late audio only ever produces a gap.
    pub max_schedule_ahead: Option<Duration>,
    /// Input device to prefer; `None` uses the system default.
    pub preferred_input_device: Option<String>,
    /// Parameters passed to the remote channel on connect.
    pub live: LiveConfig,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            capture_sample_rate: 16_000,
            output_sample_rate: 24_000,
            inbound_sample_rate: 24_000,
            analyser: AnalyserConfig::default(),
            display_refresh: Duration::from_millis(16),
            capture_poll_interval: Duration::from_millis(10),
            max_schedule_ahead: None,
            preferred_input_device: None,
            live: LiveConfig::default(),
        }
    }
}

impl VoiceConfig {
    /// # Errors
    /// `VoiceError::Config` for zero sizes/rates or a non-power-of-two FFT size.
    pub fn validate(&self) -> Result<()> {
        if self.frame_size == 0 {
            return Err(VoiceError::Config("frame_size must be non-zero".into()));
        }
        if self.capture_sample_rate == 0
            || self.output_sample_rate == 0
            || self.inbound_sample_rate == 0
        {
            return Err(VoiceError::Config("sample rates must be non-zero".into()));
        }
        if !self.analyser.fft_size.is_power_of_two() || self.analyser.fft_size < 32 {
            return Err(VoiceError::Config(format!(
                "fft_size {} must be a power of two >= 32",
                self.analyser.fft_size
            )));
        }
        if self.analyser.min_decibels >= self.analyser.max_decibels {
            return Err(VoiceError::Config(
                "min_decibels must be below max_decibels".into(),
            ));
        }
        if self.display_refresh.is_zero() || self.capture_poll_interval.is_zero() {
            return Err(VoiceError::Config("poll intervals must be non-zero".into()));
        }
        if self.live.outbound_sample_rate != self.capture_sample_rate {
            return Err(VoiceError::Config(format!(
                "live outbound rate {} differs from capture rate {}",
                self.live.outbound_sample_rate, self.capture_sample_rate
            )));
        }
        Ok(())
    }
}
