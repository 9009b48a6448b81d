//! Error taxonomy for capture, decode and playback
//!
//! The `Display` text of each variant is the message shown in the status line.

/// Failure to obtain a microphone stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("Microphone permission denied - please allow access in system settings")]
    PermissionDenied,

    #[error("No microphone found on this device")]
    NoDevice,

    #[error("Audio constraint error - the device rejected the requested format")]
    ConstraintError,

    /// Anything else; the detail is only logged
    #[error("Microphone access failed")]
    Unknown(String),
}

impl CaptureError {
    /// Classify a backend error message
    pub fn classify(detail: &str) -> Self {
        let lower = detail.to_lowercase();
        if lower.contains("permission denied") || lower.contains("eacces") {
            CaptureError::PermissionDenied
        } else if lower.contains("no such file")
            || lower.contains("connection refused")
            || lower.contains("no device")
            || lower.contains("no target")
            || lower.contains("enoent")
        {
            CaptureError::NoDevice
        } else if lower.contains("format") || lower.contains("not supported") {
            CaptureError::ConstraintError
        } else {
            CaptureError::Unknown(detail.to_string())
        }
    }
}

/// Failure to turn the accumulated chunks into a sample buffer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Recording was empty - nothing to decode")]
    Empty,

    #[error("Could not decode recording: {0}")]
    Malformed(String),
}

/// Failure to start playback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("Nothing recorded yet")]
    NoClip,

    #[error("Cannot play while recording")]
    Busy,

    #[error("Playback failed: {0}")]
    Backend(String),
}
