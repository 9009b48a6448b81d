//! Drawing surface for the visualization
//!
//! Renderers draw through [`DrawingSurface`]. The app uses [`DisplayList`],
//! which records the commands of the current frame for the canvas element to
//! replay at paint time.

/// RGBA colour with components in 0.0..=1.0
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    /// Opaque colour from `0xRRGGBB`
    pub const fn hex(rgb: u32) -> Self {
        Self {
            r: ((rgb >> 16) & 0xff) as f32 / 255.0,
            g: ((rgb >> 8) & 0xff) as f32 / 255.0,
            b: (rgb & 0xff) as f32 / 255.0,
            a: 1.0,
        }
    }

    pub const fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }
}

pub const BLACK: Color = Color::hex(0x000000);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Fill {
    Solid(Color),
    /// Two-stop gradient running from the top edge to the bottom edge
    VerticalGradient { top: Color, bottom: Color },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub color: Color,
    pub width: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TextAlign {
    #[default]
    Left,
    Center,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TextStyle {
    pub color: Color,
    pub size: f32,
    pub align: TextAlign,
}

pub trait DrawingSurface {
    fn width(&self) -> f32;
    fn height(&self) -> f32;
    /// Change the pixel size. Nothing drawn before survives.
    fn resize(&mut self, width: f32, height: f32);
    fn clear(&mut self, color: Color);
    /// Stroke a polyline through `points`
    fn draw_line(&mut self, points: &[Point], stroke: Stroke);
    fn draw_rect(&mut self, rect: Rect, fill: Fill);
    /// `at` is the baseline anchor; for centred text, the horizontal centre
    fn draw_text(&mut self, text: &str, at: Point, style: TextStyle);
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Clear(Color),
    Line { points: Vec<Point>, stroke: Stroke },
    Rect { rect: Rect, fill: Fill },
    Text { text: String, at: Point, style: TextStyle },
}

/// Retained command list for one frame
#[derive(Clone, Debug, Default)]
pub struct DisplayList {
    width: f32,
    height: f32,
    commands: Vec<DrawCommand>,
}

impl DisplayList {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Text commands, for overlaying as regular text elements
    pub fn texts(&self) -> impl Iterator<Item = (&str, Point, TextStyle)> {
        self.commands.iter().filter_map(|c| match c {
            DrawCommand::Text { text, at, style } => Some((text.as_str(), *at, *style)),
            _ => None,
        })
    }
}

impl DrawingSurface for DisplayList {
    fn width(&self) -> f32 {
        self.width
    }

    fn height(&self) -> f32 {
        self.height
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
        self.commands.clear();
    }

    fn clear(&mut self, color: Color) {
        // Everything underneath is covered
        self.commands.clear();
        self.commands.push(DrawCommand::Clear(color));
    }

    fn draw_line(&mut self, points: &[Point], stroke: Stroke) {
        if points.len() < 2 {
            return;
        }
        self.commands.push(DrawCommand::Line {
            points: points.to_vec(),
            stroke,
        });
    }

    fn draw_rect(&mut self, rect: Rect, fill: Fill) {
        if rect.width <= 0.0 || rect.height <= 0.0 {
            return;
        }
        self.commands.push(DrawCommand::Rect { rect, fill });
    }

    fn draw_text(&mut self, text: &str, at: Point, style: TextStyle) {
        self.commands.push(DrawCommand::Text {
            text: text.to_string(),
            at,
            style,
        });
    }
}
