//! Audio device enumeration.

use serde::{Deserialize, Serialize};

/// Which side of the audio host a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default device for its direction.
    pub is_default: bool,
    /// Input that looks like a real microphone rather than a capture of the
    /// system output mix. Always false for outputs.
    pub is_recommended: bool,
}

/// Name fragments used by hosts for output-mix capture devices.
const OUTPUT_MIX_HINTS: &[&str] = &["stereo mix", "loopback", "monitor of", "what u hear", "wave out"];

pub fn captures_output_mix(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    OUTPUT_MIX_HINTS.iter().any(|hint| lowered.contains(hint))
}

/// Sort defaults first, then alphabetically (case-insensitive).
pub fn sort_devices(list: &mut [DeviceInfo]) {
    list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    match host.input_devices() {
        Ok(devices) => collect(devices, default_name, DeviceDirection::Input),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            Vec::new()
        }
    }
}

/// List all available audio output devices on the system.
#[cfg(feature = "audio-cpal")]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    match host.output_devices() {
        Ok(devices) => collect(devices, default_name, DeviceDirection::Output),
        Err(e) => {
            tracing::warn!("failed to enumerate output devices: {e}");
            Vec::new()
        }
    }
}

#[cfg(feature = "audio-cpal")]
fn collect(
    devices: impl Iterator<Item = cpal::Device>,
    default_name: Option<String>,
    direction: DeviceDirection,
) -> Vec<DeviceInfo> {
    use cpal::traits::DeviceTrait;

    let mut list = devices
        .enumerate()
        .map(|(idx, device)| {
            let name = device
                .name()
                .unwrap_or_else(|_| format!("Device {}", idx + 1));
            let is_default = default_name.as_deref() == Some(name.as_str());
            let is_recommended =
                direction == DeviceDirection::Input && !captures_output_mix(&name);
            DeviceInfo {
                name,
                direction,
                is_default,
                is_recommended,
            }
        })
        .collect::<Vec<_>>();
    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_output_devices() -> Vec<DeviceInfo> {
    vec![]
}
