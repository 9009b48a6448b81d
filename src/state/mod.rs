//! Demo session state
//!
//! Plain data: the controller mutates it, the view and the visualizer read it.

mod controls;
mod session;

pub use controls::{Controls, StatusBoard};
pub use session::{RecordedClip, Session, SessionState, VisualizationMode};
