use super::{label_style, Renderer, ALERT, CALM, LABEL, LABEL_AT};
use crate::audio::SnapshotKind;
use crate::surface::{DrawingSurface, Point, Stroke, BLACK};

/// Oscilloscope trace of the time-domain snapshot
pub struct WaveformRenderer;

impl WaveformRenderer {
    pub fn label(anc_mode: bool) -> &'static str {
        if anc_mode {
            "Waveform (ANC Mode - Inverted)"
        } else {
            "Waveform (Normal)"
        }
    }
}

impl Renderer for WaveformRenderer {
    fn snapshot_kind(&self) -> SnapshotKind {
        SnapshotKind::TimeDomain
    }

    fn render(&self, data: &[u8], anc_mode: bool, surface: &mut dyn DrawingSurface) {
        let width = surface.width();
        let height = surface.height();

        surface.clear(BLACK);

        if !data.is_empty() {
            let slice_width = width / data.len() as f32;
            let mut points: Vec<Point> = data
                .iter()
                .enumerate()
                .map(|(i, &byte)| {
                    let v = byte as f32 / 128.0;
                    Point::new(i as f32 * slice_width, v * height / 2.0)
                })
                .collect();
            points.push(Point::new(width, height / 2.0));

            surface.draw_line(
                &points,
                Stroke {
                    color: if anc_mode { ALERT } else { CALM },
                    width: 2.0,
                },
            );
        }

        surface.draw_line(
            &[Point::new(0.0, height / 2.0), Point::new(width, height / 2.0)],
            Stroke {
                color: LABEL.with_alpha(0.2),
                width: 1.0,
            },
        );

        surface.draw_text(Self::label(anc_mode), LABEL_AT, label_style());
    }
}
