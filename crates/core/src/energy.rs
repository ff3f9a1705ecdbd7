//! Audio energy math for the speaking pulse.
//!
//! [`FrequencyAnalyzer`] reproduces the byte-scaled spectrum of a browser
//! `AnalyserNode` (Blackman window, temporal smoothing, decibel clamping) so the
//! same thresholds that looked right in a web page look right here.
//! [`EnergyConfig::scale_for`] maps the average of that spectrum onto a
//! cosmetic scale factor.

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use serde::Deserialize;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;

/// Output when no stream is attached or the analyzer is unavailable.
pub const NEUTRAL_SCALE: f32 = 1.0;

pub const DEFAULT_FFT_SIZE: usize = 256;
const DEFAULT_SMOOTHING: f32 = 0.8;
const DEFAULT_MIN_DECIBELS: f32 = -100.0;
const DEFAULT_MAX_DECIBELS: f32 = -30.0;

/// Thresholds and output range for mapping raw energy to a scale.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnergyConfig {
    /// Average byte energy at or below which the output is `min_scale`.
    pub min: f32,
    /// Average byte energy at or above which the output is `max_scale`.
    pub max: f32,
    pub min_scale: f32,
    pub max_scale: f32,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            min: 20.0,
            max: 160.0,
            min_scale: 1.0,
            max_scale: 1.2,
        }
    }
}

impl EnergyConfig {
    pub fn with_thresholds(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_scale_range(mut self, min_scale: f32, max_scale: f32) -> Self {
        self.min_scale = min_scale;
        self.max_scale = max_scale;
        self
    }

    /// Linearly maps `energy` from `[min, max]` (clamped) onto `[min_scale, max_scale]`.
    pub fn scale_for(&self, energy: f32) -> f32 {
        if !energy.is_finite() {
            return self.min_scale;
        }
        let span = self.max - self.min;
        let t = if span <= f32::EPSILON {
            if energy >= self.max { 1.0 } else { 0.0 }
        } else {
            ((energy - self.min) / span).clamp(0.0, 1.0)
        };
        self.min_scale + (self.max_scale - self.min_scale) * t
    }
}

/// Average of a byte-scaled frequency snapshot.
pub fn average_energy(bins: &[u8]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    bins.iter().map(|&b| b as f32).sum::<f32>() / bins.len() as f32
}

/// A sliding-window spectrum analyzer over mono PCM samples in `[-1.0, 1.0]`.
pub struct FrequencyAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    samples: VecDeque<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
}

impl FrequencyAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft,
            fft_size,
            window: blackman_window(fft_size),
            samples: VecDeque::from(vec![0.0; fft_size]),
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
            smoothing: DEFAULT_SMOOTHING,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
        }
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self
    }

    /// Number of frequency bins produced per snapshot.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Appends samples, keeping only the most recent `fft_size`.
    pub fn push_samples(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.fft_size);
        for &s in &samples[skip..] {
            if self.samples.len() == self.fft_size {
                self.samples.pop_front();
            }
            self.samples.push_back(if s.is_finite() { s } else { 0.0 });
        }
    }

    /// Computes the current spectrum scaled to bytes, updating the smoothing state.
    pub fn byte_frequency_data(&mut self) -> Vec<u8> {
        for (slot, (&sample, &w)) in self
            .buffer
            .iter_mut()
            .zip(self.samples.iter().zip(self.window.iter()))
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let (smoothing, min_db) = (self.smoothing, self.min_decibels);
        let range = self.max_decibels - min_db;
        let norm = 1.0 / self.fft_size as f32;
        self.smoothed
            .iter_mut()
            .zip(self.buffer.iter())
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * norm;
                *smoothed = smoothing * *smoothed + (1.0 - smoothing) * magnitude;
                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (255.0 * (db - min_db) / range).clamp(0.0, 255.0) as u8
            })
            .collect()
    }

    /// Average byte energy of the current snapshot.
    pub fn average_energy(&mut self) -> f32 {
        average_energy(&self.byte_frequency_data())
    }

    /// Clears the sample window and smoothing state.
    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
    }
}

impl Default for FrequencyAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_FFT_SIZE)
    }
}

fn blackman_window(n: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42, 0.5, 0.08);
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
