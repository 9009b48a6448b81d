//! Real-time visualization of the playback signal
//!
//! One frame = one analyser snapshot rendered by the renderer for the current
//! [`VisualizationMode`]. The loop only runs while the session is playing and
//! stops itself the first frame it finds playback over.

mod spectrum;
mod waveform;

use crate::audio::{PlaybackHandle, SnapshotKind};
use crate::state::{Session, VisualizationMode};
use crate::surface::{Color, DrawingSurface, Point, TextAlign, TextStyle, BLACK};
use log::debug;

pub use spectrum::SpectrumRenderer;
pub use waveform::WaveformRenderer;

/// Stroke/fill when ANC is off
pub const CALM: Color = Color::hex(0x5cf2c7);
/// Stroke/fill when ANC is on
pub const ALERT: Color = Color::hex(0xff6b6b);
pub const LABEL: Color = Color::hex(0xe7edf6);
const PLACEHOLDER: Color = Color::hex(0xa7b1c2);

/// Size used for the placeholder before layout has happened
const FALLBACK_SIZE: f32 = 300.0;

pub(crate) fn label_style() -> TextStyle {
    TextStyle {
        color: LABEL,
        size: 14.0,
        align: TextAlign::Left,
    }
}

pub(crate) const LABEL_AT: Point = Point::new(16.0, 24.0);

/// Draws one snapshot
pub trait Renderer {
    fn snapshot_kind(&self) -> SnapshotKind;
    fn render(&self, data: &[u8], anc_mode: bool, surface: &mut dyn DrawingSurface);
}

pub fn renderer_for(mode: VisualizationMode) -> &'static dyn Renderer {
    match mode {
        VisualizationMode::Waveform => &WaveformRenderer,
        VisualizationMode::Spectrum => &SpectrumRenderer,
    }
}

/// "Click 'Record' to start" on black
pub fn draw_placeholder(surface: &mut dyn DrawingSurface) {
    let (mut w, mut h) = (surface.width(), surface.height());
    if w <= 0.0 || h <= 0.0 {
        surface.resize(FALLBACK_SIZE, FALLBACK_SIZE);
        w = FALLBACK_SIZE;
        h = FALLBACK_SIZE;
    }
    surface.clear(BLACK);
    surface.draw_text(
        "Click 'Record' to start",
        Point::new(w / 2.0, h / 2.0),
        TextStyle {
            color: PLACEHOLDER,
            size: 16.0,
            align: TextAlign::Center,
        },
    );
}

/// Frame-driven render loop
#[derive(Debug, Default)]
pub struct VisualizationLoop {
    running: bool,
    frames: u64,
}

impl VisualizationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        if self.running {
            debug!("Visualization stopped after {} frame(s)", self.frames);
        }
        self.running = false;
        self.frames = 0;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frames drawn since the last start
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Draw one frame. Returns false (and stops) when there is nothing to draw.
    pub fn frame<H: PlaybackHandle>(
        &mut self,
        session: &Session,
        handle: Option<&H>,
        surface: &mut dyn DrawingSurface,
    ) -> bool {
        if !self.running {
            return false;
        }
        let Some(handle) = handle.filter(|_| session.is_playing()) else {
            self.stop();
            return false;
        };

        let renderer = renderer_for(session.visualization_mode);
        let data = handle.snapshot(renderer.snapshot_kind());
        renderer.render(&data, session.anc_mode, surface);
        self.frames += 1;
        true
    }

    /// Match the surface to its container's layout box.
    ///
    /// Returns true if the size changed. The resize clears the surface, so the
    /// placeholder is redrawn unless playback will repaint on the next frame.
    pub fn sync_size(
        &self,
        session: &Session,
        surface: &mut dyn DrawingSurface,
        width: f32,
        height: f32,
    ) -> bool {
        if surface.width() == width && surface.height() == height {
            return false;
        }
        surface.resize(width, height);
        if !session.is_playing() {
            draw_placeholder(surface);
        }
        true
    }
}
