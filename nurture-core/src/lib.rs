//! # nurture-core
//!
//! Real-time voice conversation engine: microphone in, model audio out.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → cpal callback → SPSC RingBuffer → CaptureGraph ─┬─► SpectrumAnalyser ─► VisualizerSampler
//!                                                              └─► FrameAssembler ─► encode_frame ─► RemoteSession
//!
//! RemoteEvent::Message → spawn_blocking(decode_chunk) → ReorderBuffer → PlaybackScheduler → Timeline → speaker
//! ```
//!
//! `VoiceController` owns every handle above and runs the whole graph from
//! one async task. The audio callbacks are zero-alloc; decoding is the only
//! work done off that task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod capture;
pub mod codec;
pub mod config;
pub mod error;
pub mod ipc;
pub mod playback;
pub mod remote;
pub mod session;
pub mod visualizer;

// Convenience re-exports for downstream crates
pub use audio::{CpalMicrophone, InputStream, Microphone};
pub use audio::output::CpalSpeaker;
pub use config::{AnalyserConfig, VoiceConfig};
pub use error::VoiceError;
pub use ipc::events::{LoudnessEvent, NoticeEvent, NoticeKind, SessionStatusEvent};
pub use playback::{AudioSink, OutputClock, Speaker};
pub use remote::{LiveConfig, LoopbackConnector, RemoteConnector, RemoteEvent, RemoteSession};
pub use session::{SessionState, VoiceController, VoiceHandle};
