//! Analysis tap at the end of the signal chain.

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Samples kept by the tap; also the FFT size.
pub const TAP_SIZE: usize = 2048;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Ring buffer of the most recent output samples.
#[derive(Debug, Clone)]
pub struct AnalysisTap {
    ring: Vec<f32>,
    pos: usize,
}

impl Default for AnalysisTap {
    fn default() -> Self {
        Self {
            ring: vec![0.0; TAP_SIZE],
            pos: 0,
        }
    }
}

impl AnalysisTap {
    pub fn push(&mut self, sample: f32) {
        self.ring[self.pos] = sample;
        self.pos = (self.pos + 1) % self.ring.len();
    }

    /// Oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.ring.len());
        out.extend_from_slice(&self.ring[self.pos..]);
        out.extend_from_slice(&self.ring[..self.pos]);
        out
    }

    pub fn clear(&mut self) {
        self.ring.fill(0.0);
        self.pos = 0;
    }
}

/// Turns a tap snapshot into normalized spectrum bars.
pub struct SpectrumAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new(TAP_SIZE)
    }
}

impl SpectrumAnalyser {
    pub fn new(size: usize) -> Self {
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);
        let window = (0..size)
            .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size as f32).cos())
            .collect();
        Self { fft, window }
    }

    /// Magnitudes in 0-1, mapped from -100..-30 dBFS, averaged into `bars` equal groups.
    pub fn bars(&self, samples: &[f32], bars: usize) -> Vec<f32> {
        let size = self.window.len();
        if bars == 0 {
            return Vec::new();
        }
        let mut buffer: Vec<Complex<f32>> = self
            .window
            .iter()
            .enumerate()
            .map(|(i, w)| Complex::new(samples.get(i).copied().unwrap_or(0.0) * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        let bins = size / 2;
        let per_bar = (bins / bars).max(1);
        (0..bars)
            .map(|bar| {
                let start = (bar * per_bar).min(bins);
                let end = ((bar + 1) * per_bar).min(bins);
                if start == end {
                    return 0.0;
                }
                let mean = buffer[start..end]
                    .iter()
                    .map(|c| c.norm() / size as f32)
                    .sum::<f32>()
                    / (end - start) as f32;
                let db = 20.0 * mean.max(1e-12).log10();
                ((db - MIN_DECIBELS) / (MAX_DECIBELS - MIN_DECIBELS)).clamp(0.0, 1.0)
            })
            .collect()
    }
}
