//! Capture graph: microphone → resample → {analysis tap, frame tap → encoder}.

pub mod analysis;
pub mod graph;

pub use analysis::{AnalysisHandle, SpectrumAnalyser};
pub use graph::{CaptureGraph, PipelineStage, SignalKind, Tap};
