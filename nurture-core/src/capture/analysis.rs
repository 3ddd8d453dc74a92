//! Spectrum analyser behind the visualizer tap.
//!
//! Keeps the most recent `fft_size` samples. On read it computes a
//! Hann-windowed magnitude spectrum, applies exponential smoothing across
//! reads, converts to decibels and maps `[min_db, max_db]` onto `[0, 1]`.

use std::sync::Arc;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::AnalyserConfig;

pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Circular buffer of the latest time-domain samples.
    history: Vec<f32>,
    write_pos: usize,
    /// Smoothed linear magnitudes, one per bin.
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

impl SpectrumAnalyser {
    pub fn new(config: &AnalyserConfig) -> Self {
        let size = config.fft_size.max(2);
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        let window = (0..size)
            .map(|i| {
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()
            })
            .collect();
        Self {
            fft,
            window,
            history: vec![0.0; size],
            write_pos: 0,
            smoothed: vec![0.0; size / 2],
            scratch: vec![Complex::new(0.0, 0.0); size],
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_db: config.min_decibels,
            max_db: config.max_decibels,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.history.len()
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Append time-domain samples; only the newest `fft_size` are kept.
    pub fn write(&mut self, samples: &[f32]) {
        let size = self.history.len();
        let tail = if samples.len() > size {
            &samples[samples.len() - size..]
        } else {
            samples
        };
        for &s in tail {
            self.history[self.write_pos] = s;
            self.write_pos = (self.write_pos + 1) % size;
        }
    }

    /// Fill `out` (length `bin_count`) with per-bin levels in `[0, 1]`.
    pub fn frequency_data(&mut self, out: &mut [f32]) {
        let size = self.history.len();
        for i in 0..size {
            let s = self.history[(self.write_pos + i) % size];
            self.scratch[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let range = (self.max_db - self.min_db).max(f32::EPSILON);
        for (k, level) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() / size as f32;
            *level = self.smoothing * *level + (1.0 - self.smoothing) * magnitude;
            if let Some(slot) = out.get_mut(k) {
                let db = if *level > 0.0 {
                    20.0 * level.log10()
                } else {
                    f32::NEG_INFINITY
                };
                *slot = ((db - self.min_db) / range).clamp(0.0, 1.0);
            }
        }
    }

    /// Mean of the per-bin levels, in `[0, 1]`.
    pub fn mean_level(&mut self) -> f32 {
        let mut bins = vec![0.0f32; self.bin_count()];
        self.frequency_data(&mut bins);
        if bins.is_empty() {
            return 0.0;
        }
        bins.iter().sum::<f32>() / bins.len() as f32
    }

    /// Forget all history and smoothing state.
    pub fn clear(&mut self) {
        self.history.fill(0.0);
        self.smoothed.fill(0.0);
        self.write_pos = 0;
    }
}

/// Shared handle: the capture graph writes, the visualizer reads.
#[derive(Clone)]
pub struct AnalysisHandle(Arc<Mutex<SpectrumAnalyser>>);

impl AnalysisHandle {
    pub fn new(config: &AnalyserConfig) -> Self {
        Self(Arc::new(Mutex::new(SpectrumAnalyser::new(config))))
    }

    pub fn write(&self, samples: &[f32]) {
        self.0.lock().write(samples);
    }

    pub fn mean_level(&self) -> f32 {
        self.0.lock().mean_level()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl std::fmt::Debug for AnalysisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisHandle").finish_non_exhaustive()
    }
}
