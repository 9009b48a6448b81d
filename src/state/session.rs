use crate::audio::SampleBuffer;
use log::info;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Where the session is in the record/play cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Recording,
    /// Capture stopped, decode pending
    Stopping,
    IdleWithClip,
    Playing,
    /// Playback stopped by the user; `play` restarts from the beginning
    Paused,
}

/// Which renderer draws the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizationMode {
    #[default]
    Waveform,
    Spectrum,
}

impl VisualizationMode {
    pub fn label(self) -> &'static str {
        match self {
            VisualizationMode::Waveform => "Waveform",
            VisualizationMode::Spectrum => "Spectrum",
        }
    }
}

/// The decoded recording
#[derive(Debug, Clone)]
pub struct RecordedClip {
    buffer: Arc<SampleBuffer>,
}

impl RecordedClip {
    pub fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer: Arc::new(buffer),
        }
    }

    pub fn buffer(&self) -> Arc<SampleBuffer> {
        self.buffer.clone()
    }

    pub fn duration(&self) -> Duration {
        self.buffer.duration()
    }
}

/// The single demo session
#[derive(Debug, Clone)]
pub struct Session {
    state: SessionState,
    /// Play back inverted (gain -1)
    pub anc_mode: bool,
    pub visualization_mode: VisualizationMode,
    recording_started_at: Option<Instant>,
    recording_duration: Duration,
    max_recording_time: Duration,
}

impl Session {
    pub fn new(max_recording_time: Duration) -> Self {
        Self {
            state: SessionState::Idle,
            anc_mode: false,
            visualization_mode: VisualizationMode::default(),
            recording_started_at: None,
            recording_duration: Duration::ZERO,
            max_recording_time,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Recording
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    pub fn max_recording_time(&self) -> Duration {
        self.max_recording_time
    }

    /// Elapsed recording time; frozen once recording ends
    pub fn recording_duration(&self) -> Duration {
        self.recording_duration
    }

    /// Gain the playback graph should run at
    pub fn gain(&self) -> f32 {
        if self.anc_mode {
            -1.0
        } else {
            1.0
        }
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Session: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub(crate) fn begin_recording(&mut self, now: Instant) {
        self.recording_started_at = Some(now);
        self.recording_duration = Duration::ZERO;
        self.set_state(SessionState::Recording);
    }

    /// Advance the duration; no-op unless recording
    pub(crate) fn update_duration(&mut self, now: Instant) {
        if !self.is_recording() {
            return;
        }
        if let Some(started) = self.recording_started_at {
            self.recording_duration = now
                .saturating_duration_since(started)
                .min(self.max_recording_time);
        }
    }
}
