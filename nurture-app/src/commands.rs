//! Line commands read from stdin.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `start` | begin a voice session |
//! | `stop` | end the current session |
//! | `status` | print the session state |
//! | `devices` | list input and output devices |
//! | `device [name]` | persist the preferred input device (applies on next launch) |
//! | `voice <name>` | persist the voice for the next launch |
//! | `diag` | print session counters |
//! | `quit` | tear down and exit |

use anyhow::Result;
use nurture_core::audio::device::{list_input_devices, list_output_devices};
use tracing::info;

use crate::settings::save_settings;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Devices,
    Device(Option<String>),
    Voice(String),
    Diagnostics,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let command = match word.to_ascii_lowercase().as_str() {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "status" => Command::Status,
            "devices" => Command::Devices,
            "device" => Command::Device(Some(rest.to_string()).filter(|r| !r.is_empty())),
            "voice" if !rest.is_empty() => Command::Voice(rest.to_string()),
            "voice" => return Err("usage: voice <name>".into()),
            "diag" | "diagnostics" => Command::Diagnostics,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command '{other}' (try 'help')")),
        };
        Ok(Some(command))
    }
}

/// Run one command. Returns `false` when the app should exit.
pub async fn execute(command: Command, state: &AppState) -> Result<bool> {
    match command {
        Command::Start => state.voice.start().await?,
        Command::Stop => state.voice.stop().await?,
        Command::Status => println!("state: {}", serde_json::to_string(&state.voice.state())?),
        Command::Devices => {
            for device in list_input_devices().into_iter().chain(list_output_devices()) {
                println!("{}", serde_json::to_string(&device)?);
            }
        }
        Command::Device(name) => {
            let mut settings = state.settings.lock();
            settings.preferred_input_device = name;
            settings.normalize();
            save_settings(&state.settings_path, &settings)?;
            info!(
                device = settings.preferred_input_device.as_deref().unwrap_or("default"),
                "preferred input device saved; applies on next launch"
            );
        }
        Command::Voice(voice) => {
            let mut settings = state.settings.lock();
            settings.voice = voice;
            settings.normalize();
            save_settings(&state.settings_path, &settings)?;
            info!(voice = settings.voice.as_str(), "voice saved; applies on next launch");
        }
        Command::Diagnostics => {
            println!("{}", serde_json::to_string_pretty(&state.voice.diagnostics())?);
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {
            state.voice.shutdown().await?;
            return Ok(false);
        }
    }
    Ok(true)
}

const HELP: &str = "commands: start | stop | status | devices | device [name] | voice <name> | diag | quit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands_case_insensitively() {
        assert_eq!(Command::parse("START").unwrap(), Some(Command::Start));
        assert_eq!(Command::parse("  stop ").unwrap(), Some(Command::Stop));
        assert_eq!(Command::parse("exit").unwrap(), Some(Command::Quit));
        assert_eq!(Command::parse("").unwrap(), None);
    }

    #[test]
    fn device_name_keeps_inner_spaces() {
        assert_eq!(
            Command::parse("device  USB Audio Device ").unwrap(),
            Some(Command::Device(Some("USB Audio Device".into())))
        );
        assert_eq!(Command::parse("device").unwrap(), Some(Command::Device(None)));
    }

    #[test]
    fn voice_requires_a_name() {
        assert!(Command::parse("voice").is_err());
        assert_eq!(
            Command::parse("voice Puck").unwrap(),
            Some(Command::Voice("Puck".into()))
        );
    }

    #[test]
    fn unknown_commands_are_rejected() {
        let err = Command::parse("dance").unwrap_err();
        assert!(err.contains("dance"));
    }
}
