//! Analysis tap on the playback output
//!
//! Keeps the most recent `fft_size` samples and produces byte snapshots in the
//! same ranges a browser analyser node uses, so the renderers can map bytes
//! straight to pixels.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

/// Exponential smoothing applied to magnitudes between snapshots
pub const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
/// dB mapped to byte 0
pub const MIN_DECIBELS: f32 = -100.0;
/// dB mapped to byte 255
pub const MAX_DECIBELS: f32 = -30.0;

pub struct Analyser {
    fft_size: usize,
    history: VecDeque<f32>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
}

impl Analyser {
    pub fn new(fft_size: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        Self {
            fft_size,
            history: VecDeque::from(vec![0.0; fft_size]),
            window: blackman(fft_size),
            smoothed: vec![0.0; fft_size / 2],
            fft,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Feed output samples (already gain-adjusted, mono)
    pub fn push(&mut self, samples: &[f32]) {
        let skip = samples.len().saturating_sub(self.fft_size);
        for &sample in &samples[skip..] {
            self.history.pop_front();
            self.history.push_back(sample);
        }
    }

    /// `fft_size` bytes, silence at 128
    pub fn time_domain_bytes(&self) -> Vec<u8> {
        self.history
            .iter()
            .map(|&s| (128.0 * (1.0 + s)).clamp(0.0, 255.0) as u8)
            .collect()
    }

    /// `fft_size / 2` magnitude bytes, smoothed across calls
    pub fn frequency_bytes(&mut self) -> Vec<u8> {
        let mut buffer: Vec<Complex<f32>> = self
            .history
            .iter()
            .zip(&self.window)
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let scale = 1.0 / self.fft_size as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;

        self.smoothed
            .iter_mut()
            .zip(&buffer)
            .map(|(smoothed, bin)| {
                let magnitude = bin.norm() * scale;
                *smoothed = SMOOTHING_TIME_CONSTANT * *smoothed
                    + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;

                if *smoothed <= 0.0 {
                    return 0;
                }
                let db = 20.0 * smoothed.log10();
                (255.0 / range * (db - MIN_DECIBELS)).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

fn blackman(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * std::f32::consts::PI * x).cos()
                + a2 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq_bin: usize, fft_size: usize, amplitude: f32) -> Vec<f32> {
        (0..fft_size)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq_bin as f32 * i as f32 / fft_size as f32).sin()
                    * amplitude
            })
            .collect()
    }

    #[test]
    fn test_silence_is_centred() {
        let analyser = Analyser::new(64);
        let bytes = analyser.time_domain_bytes();
        assert_eq!(bytes.len(), 64);
        assert!(bytes.iter().all(|&b| b == 128));
    }

    #[test]
    fn test_time_domain_clamps() {
        let mut analyser = Analyser::new(32);
        analyser.push(&[1.5, -1.5, 0.5]);
        let bytes = analyser.time_domain_bytes();
        assert_eq!(&bytes[29..], &[255, 0, 192]);
    }

    #[test]
    fn test_keeps_latest_window() {
        let mut analyser = Analyser::new(4);
        analyser.push(&[0.0, 0.0, 0.0, 0.0, 0.5, 0.5]);
        assert_eq!(analyser.time_domain_bytes(), vec![128, 128, 192, 192]);
    }

    #[test]
    fn test_silence_spectrum_is_zero() {
        let mut analyser = Analyser::new(256);
        let bytes = analyser.frequency_bytes();
        assert_eq!(bytes.len(), 128);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sine_peaks_at_its_bin() {
        let mut analyser = Analyser::new(512);
        analyser.push(&sine(40, 512, 0.8));
        let bytes = analyser.frequency_bytes();
        let (peak, _) = bytes
            .iter()
            .enumerate()
            .max_by_key(|(_, &b)| b)
            .unwrap();
        assert!(peak.abs_diff(40) <= 1);
        assert!(bytes[40] > 0);
    }

    #[test]
    fn test_inversion_keeps_spectrum() {
        let signal = sine(25, 256, 0.6);
        let inverted: Vec<f32> = signal.iter().map(|s| -s).collect();

        let mut normal = Analyser::new(256);
        normal.push(&signal);
        let mut flipped = Analyser::new(256);
        flipped.push(&inverted);

        assert_eq!(normal.frequency_bytes(), flipped.frequency_bytes());
        assert_ne!(normal.time_domain_bytes(), flipped.time_domain_bytes());
    }
}
