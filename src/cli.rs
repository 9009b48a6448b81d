//! Command-line interface for the ANC demo
//!
//! Handles argument parsing, demo settings and logging configuration.

use crate::settings::{self, Settings};
use crate::state::VisualizationMode;
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::time::Duration;

/// Visualization shown when playback starts
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Waveform,
    Spectrum,
}

impl From<ModeArg> for VisualizationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Waveform => VisualizationMode::Waveform,
            ModeArg::Spectrum => VisualizationMode::Spectrum,
        }
    }
}

/// Destructive interference demo: record a clip, play it back normal or phase-inverted
#[derive(Parser, Debug)]
#[command(name = "anc-demo")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = include gpui internals
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Stop recording automatically after this many seconds
    #[arg(long, value_name = "SECS", default_value = "15", value_parser = settings::parse_max_recording)]
    pub max_recording: Duration,

    /// Analyser window size (power of two, 32-32768)
    #[arg(long, value_name = "N", default_value = "2048", value_parser = settings::parse_fft_size)]
    pub fft_size: usize,

    /// Start with ANC (phase inversion) enabled
    #[arg(long)]
    pub anc: bool,

    /// Initial visualization
    #[arg(long, value_enum, default_value = "waveform")]
    pub mode: ModeArg,
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            max_recording_time: self.max_recording,
            fft_size: self.fft_size,
            anc_on_start: self.anc,
            visualization_mode: self.mode.into(),
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("anc_demo", args.log_level());

    // GUI framework modules only at -vvvv (very verbose)
    if args.verbose >= 4 {
        builder.filter_module("naga", args.log_level());
        builder.filter_module("blade_graphics", args.log_level());
        builder.filter_module("gpui", args.log_level());
        builder.filter_module("pipewire", args.log_level());
    }

    builder.format_timestamp_millis().init();
}
