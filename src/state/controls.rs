use super::{Session, SessionState};

/// Which buttons are enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub record: bool,
    pub stop: bool,
    pub play: bool,
    pub pause: bool,
}

impl Controls {
    pub fn derive(session: &Session, has_clip: bool) -> Self {
        let state = session.state();
        Self {
            record: state != SessionState::Recording,
            stop: state == SessionState::Recording,
            play: has_clip && matches!(state, SessionState::IdleWithClip | SessionState::Paused),
            pause: state == SessionState::Playing,
        }
    }
}

/// Text shown in the three status sinks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBoard {
    /// `recording-duration`
    pub recording_duration: String,
    /// `recording-status`
    pub recording_status: String,
    /// `anc-status`
    pub anc_status: String,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self {
            recording_duration: "0.0s".to_string(),
            recording_status: "Ready to record".to_string(),
            anc_status: "Off".to_string(),
        }
    }
}

impl StatusBoard {
    pub fn set_status(&mut self, message: impl Into<String>) {
        self.recording_status = message.into();
    }

    pub fn set_duration(&mut self, secs: f32) {
        self.recording_duration = format!("{:.1}s", secs);
    }

    pub fn set_anc(&mut self, enabled: bool) {
        self.anc_status = if enabled { "On" } else { "Off" }.to_string();
    }
}
