//! Demo settings
//!
//! Built once from the command line at startup. Nothing is persisted.

use crate::state::VisualizationMode;
use std::time::Duration;

/// Recording is cut off after this long
pub const DEFAULT_MAX_RECORDING_SECS: f64 = 15.0;
/// Analyser window
pub const DEFAULT_FFT_SIZE: usize = 2048;

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32768;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub max_recording_time: Duration,
    pub fft_size: usize,
    /// ANC toggle state when the window opens
    pub anc_on_start: bool,
    pub visualization_mode: VisualizationMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_recording_time: Duration::from_secs_f64(DEFAULT_MAX_RECORDING_SECS),
            fft_size: DEFAULT_FFT_SIZE,
            anc_on_start: false,
            visualization_mode: VisualizationMode::Waveform,
        }
    }
}

/// Parse an analyser window size: a power of two in 32..=32768
pub fn parse_fft_size(value: &str) -> Result<usize, String> {
    let size: usize = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid FFT size '{}': {}", value, e))?;
    if !size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&size) {
        return Err(format!(
            "FFT size must be a power of two between {} and {}",
            MIN_FFT_SIZE, MAX_FFT_SIZE
        ));
    }
    Ok(size)
}

/// Parse a maximum recording time in seconds
pub fn parse_max_recording(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", value, e))?;
    if !secs.is_finite() || secs <= 0.0 {
        return Err("maximum recording time must be a positive number of seconds".to_string());
    }
    Ok(Duration::from_secs_f64(secs))
}
