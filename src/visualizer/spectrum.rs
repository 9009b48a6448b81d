use super::{label_style, Renderer, ALERT, CALM, LABEL_AT};
use crate::audio::SnapshotKind;
use crate::surface::{Color, DrawingSurface, Fill, Rect, BLACK};

/// Bottom stop of the ANC gradient
const ALERT_LIGHT: Color = Color::hex(0xff9999);
/// Bottom stop of the normal gradient
const CALM_BLUE: Color = Color::hex(0x57a6ff);

const BAR_SCALE: f32 = 2.5;
const GUTTER: f32 = 1.0;

/// Bar graph of the frequency snapshot
pub struct SpectrumRenderer;

impl SpectrumRenderer {
    pub fn label(anc_mode: bool) -> &'static str {
        if anc_mode {
            "Frequency Spectrum (ANC Mode)"
        } else {
            "Frequency Spectrum (Normal)"
        }
    }

    fn gradient(anc_mode: bool) -> Fill {
        if anc_mode {
            Fill::VerticalGradient {
                top: ALERT,
                bottom: ALERT_LIGHT,
            }
        } else {
            Fill::VerticalGradient {
                top: CALM,
                bottom: CALM_BLUE,
            }
        }
    }
}

impl Renderer for SpectrumRenderer {
    fn snapshot_kind(&self) -> SnapshotKind {
        SnapshotKind::Frequency
    }

    fn render(&self, data: &[u8], anc_mode: bool, surface: &mut dyn DrawingSurface) {
        let width = surface.width();
        let height = surface.height();

        surface.clear(BLACK);

        if !data.is_empty() {
            let bar_width = width / data.len() as f32 * BAR_SCALE;
            let fill = Self::gradient(anc_mode);
            let mut x = 0.0;

            for &byte in data {
                // Bars past the right edge would be clipped anyway
                if x >= width {
                    break;
                }
                let bar_height = byte as f32 / 255.0 * height;
                surface.draw_rect(
                    Rect {
                        x,
                        y: height - bar_height,
                        width: bar_width,
                        height: bar_height,
                    },
                    fill,
                );
                x += bar_width + GUTTER;
            }
        }

        surface.draw_text(Self::label(anc_mode), LABEL_AT, label_style());
    }
}
