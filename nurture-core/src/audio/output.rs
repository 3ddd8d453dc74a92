//! Speaker output via the cpal backend.
//!
//! The output callback renders a shared [`Timeline`]: buffers pinned to
//! absolute frame positions, mixed into silence. The number of frames the
//! callback has consumed is the output clock the playback scheduler reads.
//!
//! Like the input side, the `!Send` `cpal::Stream` lives on its own thread;
//! [`CpalSink`] is the `Send` handle the session controller owns.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    codec::PlaybackBuffer,
    config::VoiceConfig,
    error::{Result, VoiceError},
    playback::{AudioSink, OutputClock, SampleClock, Speaker, Timeline},
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    SampleFormat, SampleRate, Stream, StreamConfig,
};

#[cfg(feature = "audio-cpal")]
use tracing::{info, warn};

#[cfg(feature = "audio-cpal")]
use super::stream_error_handler;

/// Handle to a running output stream.
pub struct CpalSink {
    timeline: Arc<Mutex<Timeline>>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
}

impl CpalSink {
    fn new(timeline: Arc<Mutex<Timeline>>, running: Arc<AtomicBool>) -> Self {
        let sample_rate = timeline.lock().sample_rate();
        Self {
            timeline,
            running,
            sample_rate,
        }
    }
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn clock(&self) -> Arc<dyn OutputClock> {
        self.timeline.lock().clock()
    }

    fn play_at(&mut self, buffer: PlaybackBuffer, start: f64) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            return Err(VoiceError::AudioStream("output stream has stopped".into()));
        }
        if buffer.sample_rate != self.sample_rate {
            return Err(VoiceError::AudioStream(format!(
                "buffer rate {} does not match device rate {}",
                buffer.sample_rate, self.sample_rate
            )));
        }
        self.timeline.lock().schedule(start, buffer.samples);
        Ok(())
    }

    fn cancel_pending(&mut self) -> Result<()> {
        self.timeline.lock().clear();
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Speaker backed by the system default output device.
#[derive(Debug, Clone)]
pub struct CpalSpeaker {
    /// Rate to request from the device; the device default is used if unsupported.
    preferred_rate: u32,
}

impl CpalSpeaker {
    pub fn new(preferred_rate: u32) -> Self {
        Self { preferred_rate }
    }

    pub fn from_config(config: &VoiceConfig) -> Self {
        Self::new(config.output_sample_rate)
    }

    pub fn preferred_rate(&self) -> u32 {
        self.preferred_rate
    }
}

/// Open the default output device, preferring `preferred_rate` mono/stereo.
#[cfg(feature = "audio-cpal")]
fn open_output_stream(
    preferred_rate: u32,
    running: Arc<AtomicBool>,
) -> Result<(Stream, Arc<Mutex<Timeline>>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| VoiceError::AudioDevice("no default output device".into()))?;

    info!(
        device = device.name().unwrap_or_default().as_str(),
        "opening output device"
    );

    let supported = pick_output_config(&device, preferred_rate)?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels().max(1) as usize;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    info!(sample_rate, channels, ?sample_format, "output config selected");

    let timeline = Arc::new(Mutex::new(Timeline::new(sample_rate)));
    let clock = timeline.lock().clock();

    let stream = match sample_format {
        SampleFormat::F32 => {
            let timeline = Arc::clone(&timeline);
            let clock = Arc::clone(&clock);
            let live = Arc::clone(&running);
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _info| {
                    render_interleaved(&timeline, &clock, &live, &mut mono, data, channels, |s| s);
                },
                stream_error_handler("output", Arc::clone(&running)),
                None,
            )
        }
        SampleFormat::I16 => {
            let timeline = Arc::clone(&timeline);
            let clock = Arc::clone(&clock);
            let live = Arc::clone(&running);
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _info| {
                    render_interleaved(&timeline, &clock, &live, &mut mono, data, channels, |s| {
                        crate::codec::pcm::sample_to_i16(s)
                    });
                },
                stream_error_handler("output", Arc::clone(&running)),
                None,
            )
        }
        SampleFormat::U16 => {
            let timeline = Arc::clone(&timeline);
            let clock = Arc::clone(&clock);
            let live = Arc::clone(&running);
            let mut mono: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [u16], _info| {
                    render_interleaved(&timeline, &clock, &live, &mut mono, data, channels, |s| {
                        (crate::codec::pcm::sample_to_i16(s) as i32 + 32_768) as u16
                    });
                },
                stream_error_handler("output", Arc::clone(&running)),
                None,
            )
        }
        fmt => {
            return Err(VoiceError::AudioStream(format!(
                "unsupported output sample format: {fmt:?}"
            )))
        }
    }
    .map_err(|e| VoiceError::AudioStream(e.to_string()))?;

    stream
        .play()
        .map_err(|e| VoiceError::AudioStream(e.to_string()))?;

    Ok((stream, timeline))
}

#[cfg(feature = "audio-cpal")]
fn pick_output_config(
    device: &cpal::Device,
    preferred_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    if let Ok(configs) = device.supported_output_configs() {
        let mut best: Option<cpal::SupportedStreamConfig> = None;
        for cfg in configs {
            if cfg.min_sample_rate().0 <= preferred_rate && cfg.max_sample_rate().0 >= preferred_rate
            {
                let candidate = cfg.with_sample_rate(SampleRate(preferred_rate));
                let better = match &best {
                    None => true,
                    Some(current) => {
                        candidate.sample_format() == SampleFormat::F32
                            && current.sample_format() != SampleFormat::F32
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
        }
        if let Some(best) = best {
            return Ok(best);
        }
    }

    warn!(
        preferred_rate,
        "output device does not support preferred rate, using its default"
    );
    device
        .default_output_config()
        .map_err(|e| VoiceError::AudioDevice(e.to_string()))
}

/// Output callback body: render mono from the timeline, fan out to all channels.
///
/// Never waits for the timeline lock. When the event loop holds it, the
/// callback plays silence and only advances the clock.
#[cfg(any(feature = "audio-cpal", test))]
fn render_interleaved<T: Copy>(
    timeline: &Mutex<Timeline>,
    clock: &SampleClock,
    running: &AtomicBool,
    mono: &mut Vec<f32>,
    data: &mut [T],
    channels: usize,
    from_f32: impl Fn(f32) -> T,
) {
    let frames = data.len() / channels;
    mono.resize(frames, 0.0);
    match timeline.try_lock() {
        Some(mut timeline) if running.load(Ordering::Relaxed) => timeline.render(mono),
        Some(_) => mono.fill(0.0),
        None => {
            mono.fill(0.0);
            clock.advance(frames as u64);
        }
    }
    for (frame, &s) in data.chunks_exact_mut(channels).zip(mono.iter()) {
        let v = from_f32(s);
        for slot in frame {
            *slot = v;
        }
    }
}

#[cfg(feature = "audio-cpal")]
#[async_trait]
impl Speaker for CpalSpeaker {
    async fn open(&self) -> Result<Box<dyn AudioSink>> {
        let running = Arc::new(AtomicBool::new(true));
        let (open_tx, open_rx) =
            tokio::sync::oneshot::channel::<Result<Arc<Mutex<Timeline>>>>();

        let thread_running = Arc::clone(&running);
        let preferred_rate = self.preferred_rate;
        std::thread::Builder::new()
            .name("nurture-speaker".into())
            .spawn(move || {
                let (stream, timeline) =
                    match open_output_stream(preferred_rate, Arc::clone(&thread_running)) {
                        Ok(opened) => opened,
                        Err(e) => {
                            thread_running.store(false, Ordering::SeqCst);
                            let _ = open_tx.send(Err(e));
                            return;
                        }
                    };

                if open_tx.send(Ok(timeline)).is_err() {
                    thread_running.store(false, Ordering::SeqCst);
                }

                while thread_running.load(Ordering::Acquire) {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                drop(stream);
                info!("output stream closed");
            })
            .map_err(VoiceError::Io)?;

        match open_rx.await {
            Ok(Ok(timeline)) => Ok(Box::new(CpalSink::new(timeline, running))),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                running.store(false, Ordering::SeqCst);
                Err(VoiceError::AudioStream(
                    "speaker thread exited before reporting".into(),
                ))
            }
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
#[async_trait]
impl Speaker for CpalSpeaker {
    async fn open(&self) -> Result<Box<dyn AudioSink>> {
        Err(VoiceError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_schedules_onto_shared_timeline() {
        let timeline = Arc::new(Mutex::new(Timeline::new(10)));
        let running = Arc::new(AtomicBool::new(true));
        let mut sink = CpalSink::new(Arc::clone(&timeline), Arc::clone(&running));

        sink.play_at(PlaybackBuffer::new(vec![0.5; 3], 10), 0.2).unwrap();
        assert_eq!(timeline.lock().pending(), 1);

        sink.cancel_pending().unwrap();
        assert_eq!(timeline.lock().pending(), 0);
    }

    #[test]
    fn speaker_from_config_requests_the_output_rate() {
        let config = VoiceConfig {
            output_sample_rate: 48_000,
            ..VoiceConfig::default()
        };
        assert_eq!(CpalSpeaker::from_config(&config).preferred_rate(), 48_000);
    }

    #[test]
    fn sink_rejects_buffers_after_stream_stopped() {
        let timeline = Arc::new(Mutex::new(Timeline::new(10)));
        let running = Arc::new(AtomicBool::new(false));
        let mut sink = CpalSink::new(timeline, running);
        let err = sink
            .play_at(PlaybackBuffer::new(vec![0.5; 3], 10), 0.0)
            .unwrap_err();
        assert!(matches!(err, VoiceError::AudioStream(_)));
    }

    #[test]
    fn render_plays_silence_while_the_timeline_is_locked() {
        let timeline = Mutex::new(Timeline::new(10));
        let clock = timeline.lock().clock();
        let running = AtomicBool::new(true);
        timeline.lock().schedule(0.0, vec![0.5; 8]);
        let mut mono = Vec::new();

        let mut data = [1.0f32; 8];
        {
            let _held = timeline.lock();
            render_interleaved(&timeline, &clock, &running, &mut mono, &mut data, 2, |s| s);
        }
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(clock.frames(), 4);

        render_interleaved(&timeline, &clock, &running, &mut mono, &mut data, 2, |s| s);
        assert!(data.iter().all(|&s| s == 0.5));
        assert_eq!(clock.frames(), 8);
    }

    #[cfg(feature = "audio-cpal")]
    #[test]
    fn device_error_makes_the_sink_reject_playback() {
        let timeline = Arc::new(Mutex::new(Timeline::new(10)));
        let running = Arc::new(AtomicBool::new(true));
        let mut sink = CpalSink::new(timeline, Arc::clone(&running));
        let mut on_error = stream_error_handler("output", Arc::clone(&running));

        on_error(cpal::StreamError::DeviceNotAvailable);

        let err = sink
            .play_at(PlaybackBuffer::new(vec![0.5; 3], 10), 0.0)
            .unwrap_err();
        assert!(matches!(err, VoiceError::AudioStream(_)));
    }

    #[test]
    fn sink_rejects_rate_mismatch() {
        let timeline = Arc::new(Mutex::new(Timeline::new(24_000)));
        let running = Arc::new(AtomicBool::new(true));
        let mut sink = CpalSink::new(timeline, running);
        assert!(sink
            .play_at(PlaybackBuffer::new(vec![0.0; 3], 16_000), 0.0)
            .is_err());
    }
}
