//! The capture graph as data.
//!
//! ```text
//! device audio ─► resample ─┬─► analysis   (spectrum, visualizer)
//!                           └─► frame ─► encode ─► OutboundPacket
//! ```
//!
//! The graph is an ordered list of taps fed from one resampled signal.
//! [`CaptureGraph::stages`] describes the current wiring so it can be
//! asserted on without audio hardware, and [`CaptureGraph::process`] accepts
//! synthetic samples the same way it accepts device samples.

use tracing::{debug, trace};

use super::analysis::AnalysisHandle;
use crate::{
    audio::{resample::RateConverter, InputStream},
    buffering::frame::FrameAssembler,
    codec::pcm::{encode_frame, OutboundPacket},
    config::VoiceConfig,
    error::{Result, VoiceError},
};

/// Input frames per rubato call (10 ms at 48 kHz).
const RESAMPLE_CHUNK: usize = 480;

/// Scratch size for draining an input stream.
const READ_CHUNK: usize = 2_048;

/// Signal types flowing between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Mono f32 at the microphone's native rate.
    DeviceAudio,
    /// Mono f32 at the outbound capture rate.
    CaptureAudio,
    /// Frequency-domain snapshot for the visualizer.
    Spectrum,
    /// Fixed-size `AudioFrame`s.
    Frames,
    /// Encoded `OutboundPacket`s.
    Packets,
}

/// One named stage with its declared input and output types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStage {
    pub name: &'static str,
    pub input: SignalKind,
    pub output: SignalKind,
}

impl PipelineStage {
    const fn new(name: &'static str, input: SignalKind, output: SignalKind) -> Self {
        Self {
            name,
            input,
            output,
        }
    }
}

/// A consumer of the resampled capture signal.
pub enum Tap {
    Analysis(AnalysisHandle),
    /// Cuts fixed-size frames and hands each to the encoder.
    Frames(FrameAssembler),
}

impl Tap {
    fn stages(&self) -> &'static [PipelineStage] {
        const ANALYSIS: &[PipelineStage] = &[PipelineStage::new(
            "analysis",
            SignalKind::CaptureAudio,
            SignalKind::Spectrum,
        )];
        const FRAMES: &[PipelineStage] = &[
            PipelineStage::new("frame", SignalKind::CaptureAudio, SignalKind::Frames),
            PipelineStage::new("encode", SignalKind::Frames, SignalKind::Packets),
        ];
        match self {
            Tap::Analysis(_) => ANALYSIS,
            Tap::Frames(_) => FRAMES,
        }
    }
}

pub struct CaptureGraph {
    device_rate: u32,
    capture_rate: u32,
    frame_size: usize,
    converter: RateConverter,
    taps: Vec<Tap>,
    scratch: Vec<f32>,
}

impl CaptureGraph {
    /// Build the graph for a microphone running at `device_rate`, with the
    /// analysis tap wired. The frame tap is wired later by
    /// [`CaptureGraph::wire_frame_tap`].
    ///
    /// # Errors
    /// `VoiceError::AudioDevice` if the resampler cannot be created.
    pub fn new(device_rate: u32, config: &VoiceConfig, analysis: AnalysisHandle) -> Result<Self> {
        if device_rate == 0 {
            return Err(VoiceError::AudioDevice("device reported a 0 Hz rate".into()));
        }
        let converter = RateConverter::new(device_rate, config.capture_sample_rate, RESAMPLE_CHUNK)?;
        debug!(
            device_rate,
            capture_rate = config.capture_sample_rate,
            passthrough = converter.is_passthrough(),
            "capture graph built"
        );
        Ok(Self {
            device_rate,
            capture_rate: config.capture_sample_rate,
            frame_size: config.frame_size,
            converter,
            taps: vec![Tap::Analysis(analysis)],
            scratch: vec![0.0; READ_CHUNK],
        })
    }

    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Current wiring, source first.
    pub fn stages(&self) -> Vec<PipelineStage> {
        let mut stages = vec![PipelineStage::new(
            "resample",
            SignalKind::DeviceAudio,
            SignalKind::CaptureAudio,
        )];
        for tap in &self.taps {
            stages.extend_from_slice(tap.stages());
        }
        stages
    }

    /// Attach the frame tap. Returns `false` if it was already attached.
    pub fn wire_frame_tap(&mut self) -> bool {
        if self.is_streaming() {
            return false;
        }
        self.taps
            .push(Tap::Frames(FrameAssembler::new(self.frame_size, self.capture_rate)));
        debug!(frame_size = self.frame_size, "frame tap wired");
        true
    }

    /// `true` once the frame tap is attached.
    pub fn is_streaming(&self) -> bool {
        self.taps.iter().any(|t| matches!(t, Tap::Frames(_)))
    }

    /// Feed device-rate samples through every tap.
    ///
    /// `emit` is called once per completed frame, in capture order. Returns
    /// the number of packets emitted.
    pub fn process(&mut self, samples: &[f32], mut emit: impl FnMut(OutboundPacket)) -> usize {
        if self.taps.is_empty() || samples.is_empty() {
            return 0;
        }
        let converted = self.converter.process(samples);
        if converted.is_empty() {
            return 0;
        }

        let mut emitted = 0;
        for tap in &mut self.taps {
            match tap {
                Tap::Analysis(handle) => handle.write(&converted),
                Tap::Frames(assembler) => {
                    emitted += assembler.push(&converted, |frame| {
                        trace!(sequence = frame.sequence, "frame captured");
                        emit(encode_frame(frame));
                    });
                }
            }
        }
        emitted
    }

    /// Drain everything currently buffered in `input` through the graph.
    pub fn pump(&mut self, input: &mut dyn InputStream, mut emit: impl FnMut(OutboundPacket)) -> usize {
        let mut scratch = std::mem::take(&mut self.scratch);
        let mut emitted = 0;
        loop {
            let n = input.read(&mut scratch);
            if n == 0 {
                break;
            }
            emitted += self.process(&scratch[..n], &mut emit);
        }
        self.scratch = scratch;
        emitted
    }

    /// Detach every tap and drop partial frames and resampler state.
    ///
    /// The analysis handle is cleared so no residual spectrum survives.
    pub fn disconnect(&mut self) {
        for tap in self.taps.drain(..) {
            if let Tap::Analysis(handle) = tap {
                handle.clear();
            }
        }
        self.converter.reset();
    }
}
