//! Microphone acquisition via the cpal backend.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not**:
//! - Allocate heap memory (after the first callback sizes its mix buffer)
//! - Block on a mutex or condvar
//! - Perform I/O
//!
//! This module satisfies that contract by writing directly into an SPSC ring buffer
//! producer whose `push_slice` is lock-free and allocation-free. The session event
//! loop drains the consumer half through [`InputStream::read`].
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on macOS).
//! [`CpalMicrophone::acquire`] therefore opens the stream on a dedicated thread that
//! also drops it, and hands back a `Send` [`RingInputStream`] whose `release` flips
//! the shared running flag so the callback no-ops from its next invocation.

pub mod device;
pub mod output;
pub mod resample;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;

use crate::{
    buffering::{AudioConsumer, Consumer},
    config::VoiceConfig,
    error::Result,
};

#[cfg(feature = "audio-cpal")]
use crate::{
    buffering::{create_audio_ring, AudioProducer, Producer},
    error::VoiceError,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

/// Poll period of the thread that keeps a cpal stream alive.
#[cfg(feature = "audio-cpal")]
const STREAM_KEEPALIVE_MS: u64 = 20;

/// An acquired microphone stream (mono f32 at [`InputStream::sample_rate`]).
pub trait InputStream: Send {
    /// Native rate of the samples returned by [`InputStream::read`].
    fn sample_rate(&self) -> u32;

    /// Copy up to `buf.len()` captured samples into `buf`. Never blocks.
    fn read(&mut self, buf: &mut [f32]) -> usize;

    /// False once the device has stopped delivering audio.
    fn is_live(&self) -> bool {
        true
    }

    /// Stop capture. Idempotent.
    ///
    /// # Errors
    /// `VoiceError::ResourceTeardown` if the device could not be released cleanly;
    /// the stream is still considered released.
    fn release(&mut self) -> Result<()>;
}

/// Capability to acquire the microphone. Acquisition may be refused.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// # Errors
    /// `VoiceError::PermissionDenied` / `VoiceError::NoInputDevice` when access is refused.
    async fn acquire(&self) -> Result<Box<dyn InputStream>>;
}

/// Input stream backed by the SPSC ring that the device callback fills.
pub struct RingInputStream {
    consumer: AudioConsumer,
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

impl RingInputStream {
    pub fn new(consumer: AudioConsumer, running: Arc<AtomicBool>, sample_rate: u32) -> Self {
        Self {
            consumer,
            running,
            sample_rate,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl InputStream for RingInputStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [f32]) -> usize {
        if !self.is_running() {
            return 0;
        }
        self.consumer.pop_slice(buf)
    }

    fn is_live(&self) -> bool {
        self.is_running()
    }

    fn release(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        self.consumer.clear();
        Ok(())
    }
}

impl Drop for RingInputStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Handle to an open cpal input stream. Not `Send`; lives on its keep-alive thread.
#[cfg(feature = "audio-cpal")]
struct AudioCapture {
    /// Kept alive so the stream is not dropped prematurely.
    _stream: Stream,
    /// Actual capture sample rate reported by the device (Hz).
    sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl AudioCapture {
    /// Open an input device by preferred name, otherwise fall back to
    /// default input device and then first available device.
    fn open_with_preference(
        mut producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device_name: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::HostTrait;

        let host = cpal::default_host();
        let mut selected_device = None;

        if let Some(preferred_name) = preferred_device_name {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected_device = devices.find(|device| {
                        device
                            .name()
                            .map(|name| name == preferred_name)
                            .unwrap_or(false)
                    });

                    if selected_device.is_none() {
                        warn!(
                            "preferred input device '{}' not found, falling back",
                            preferred_name
                        );
                    }
                }
                Err(e) => {
                    warn!("failed to list input devices while resolving preference: {e}");
                }
            }
        }

        let device = if let Some(device) = selected_device {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| VoiceError::AudioDevice(e.to_string()))?;
            let fallback = devices.next().ok_or(VoiceError::NoInputDevice)?;
            warn!("no default input device, falling back to first available input");
            fallback
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| VoiceError::PermissionDenied(e.to_string()))?;

        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let ch = channels.max(1) as usize;

        info!(sample_rate, channels, "input config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running_f32 = Arc::clone(&running);
        let running_i16 = Arc::clone(&running);
        let running_u16 = Arc::clone(&running);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _info| {
                        if !running_f32.load(Ordering::Relaxed) {
                            return;
                        }
                        if ch == 1 {
                            push_or_warn(&mut producer, data);
                            return;
                        }
                        downmix_into(&mut mix_buf, data, ch, |s| s);
                        push_or_warn(&mut producer, &mix_buf);
                    },
                    stream_error_handler("input", Arc::clone(&running)),
                    None,
                )
            }

            SampleFormat::I16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _info| {
                        if !running_i16.load(Ordering::Relaxed) {
                            return;
                        }
                        downmix_into(&mut mix_buf, data, ch, |s| s as f32 / 32_768.0);
                        push_or_warn(&mut producer, &mix_buf);
                    },
                    stream_error_handler("input", Arc::clone(&running)),
                    None,
                )
            }

            SampleFormat::U16 => {
                let mut mix_buf: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &config,
                    move |data: &[u16], _info| {
                        if !running_u16.load(Ordering::Relaxed) {
                            return;
                        }
                        downmix_into(&mut mix_buf, data, ch, |s| {
                            (s as f32 - 32_768.0) / 32_768.0
                        });
                        push_or_warn(&mut producer, &mix_buf);
                    },
                    stream_error_handler("input", Arc::clone(&running)),
                    None,
                )
            }

            fmt => {
                return Err(VoiceError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }
        .map_err(|e| VoiceError::PermissionDenied(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VoiceError::PermissionDenied(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }
}

/// Error callback shared by input and output streams. A device error stops
/// the stream for good: the handle's `running` flag drops, so reads return
/// nothing and playback requests fail.
#[cfg(feature = "audio-cpal")]
pub(crate) fn stream_error_handler(
    side: &'static str,
    running: Arc<AtomicBool>,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        error!(side, "audio stream error: {err}");
        running.store(false, Ordering::Release);
    }
}

/// Average interleaved frames down to mono into `out`, resizing it as needed.
#[cfg(feature = "audio-cpal")]
fn downmix_into<T: Copy>(out: &mut Vec<f32>, data: &[T], ch: usize, to_f32: impl Fn(T) -> f32) {
    let frames = data.len() / ch;
    out.resize(frames, 0.0);
    for (f, slot) in out.iter_mut().enumerate() {
        let base = f * ch;
        let mut sum = 0f32;
        for c in 0..ch {
            sum += to_f32(data[base + c]);
        }
        *slot = sum / ch as f32;
    }
}

#[cfg(feature = "audio-cpal")]
fn push_or_warn(producer: &mut AudioProducer, samples: &[f32]) {
    let written = producer.push_slice(samples);
    if written < samples.len() {
        warn!("ring buffer full: dropped {} samples", samples.len() - written);
    }
}

/// Microphone backed by the system audio host.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    preferred_device: Option<String>,
}

impl CpalMicrophone {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self { preferred_device }
    }

    /// Microphone that opens `config.preferred_input_device`, if any.
    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(config.preferred_input_device.clone())
    }

    pub fn preferred_device(&self) -> Option<&str> {
        self.preferred_device.as_deref()
    }
}

#[cfg(feature = "audio-cpal")]
#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn InputStream>> {
        let (producer, consumer) = create_audio_ring();
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) = tokio::sync::oneshot::channel::<Result<u32>>();

        let thread_running = Arc::clone(&running);
        let preferred = self.preferred_device.clone();
        std::thread::Builder::new()
            .name("nurture-mic".into())
            .spawn(move || {
                // ── Open device (on this thread, cpal::Stream is !Send) ──
                let capture = match AudioCapture::open_with_preference(
                    producer,
                    Arc::clone(&thread_running),
                    preferred.as_deref(),
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        thread_running.store(false, Ordering::SeqCst);
                        let _ = open_tx.send(Err(e));
                        return;
                    }
                };

                if open_tx.send(Ok(capture.sample_rate)).is_err() {
                    // Caller went away before the device opened.
                    thread_running.store(false, Ordering::SeqCst);
                }

                while thread_running.load(Ordering::Acquire) {
                    std::thread::sleep(std::time::Duration::from_millis(STREAM_KEEPALIVE_MS));
                }

                // Stream drops here, releasing the device on this thread.
                drop(capture);
                info!("microphone stream closed");
            })
            .map_err(VoiceError::Io)?;

        match open_rx.await {
            Ok(Ok(sample_rate)) => Ok(Box::new(RingInputStream::new(
                consumer,
                running,
                sample_rate,
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(VoiceError::AudioStream(
                    "microphone thread exited before reporting".into(),
                ))
            }
        }
    }
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self) -> Result<Box<dyn InputStream>> {
        Err(crate::error::VoiceError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}
