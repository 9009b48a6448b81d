//! Main application component for the ANC demo

use crate::audio::{PipeWireCapture, PipeWireGraph, WavDecoder};
use crate::controller::{AutoStop, Controller, DecodeJob};
use crate::settings::Settings;
use crate::state::VisualizationMode;
use crate::surface::{Color, DisplayList, DrawCommand, Fill, TextAlign, TextStyle};
use crate::visualizer::draw_placeholder;
use gpui::prelude::*;
use gpui::{InteractiveElement, *};
use log::{info, warn};
use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

type DemoController = Controller<PipeWireCapture, WavDecoder, PipeWireGraph>;

/// ~60fps
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

const ACCENT: u32 = 0x5cf2c7;
const DANGER: u32 = 0xff6b6b;
/// `anc-status` text while ANC is off
const ANC_OFF: u32 = 0x4ecdc4;

fn anc_status_color(anc_on: bool) -> u32 {
    if anc_on {
        DANGER
    } else {
        ANC_OFF
    }
}

/// Ways the help modal is opened or dismissed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HelpInput {
    /// F1 or the titlebar info button
    Toggle,
    /// Escape, the close button or a backdrop click
    Close,
}

fn help_visible(showing: bool, input: HelpInput) -> bool {
    match input {
        HelpInput::Toggle => !showing,
        HelpInput::Close => false,
    }
}

/// The root application view
pub struct AncDemo {
    controller: DemoController,
    /// Frame the canvas element replays
    surface: DisplayList,
    /// Layout box of the canvas, written at prepaint
    canvas_size: Rc<Cell<Option<Size<Pixels>>>>,
    show_help: bool,
    _frame_task: Task<()>,
}

impl AncDemo {
    pub fn new(settings: Settings, cx: &mut Context<Self>) -> Self {
        let controller = Controller::new(
            &settings,
            PipeWireCapture::new(),
            WavDecoder,
            PipeWireGraph::new(),
        );

        let mut surface = DisplayList::default();
        draw_placeholder(&mut surface);

        // Drives the duration display, continuations and the visualization
        let frame_task = cx.spawn({
            async move |this: WeakEntity<Self>, cx: &mut AsyncApp| {
                loop {
                    cx.background_executor().timer(FRAME_INTERVAL).await;

                    let Some(this) = this.upgrade() else {
                        break;
                    };
                    let result = cx.update_entity(&this, |this, cx| this.on_frame(cx));
                    if result.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            controller,
            surface,
            canvas_size: Rc::new(Cell::new(None)),
            show_help: false,
            _frame_task: frame_task,
        }
    }

    fn on_frame(&mut self, cx: &mut Context<Self>) {
        let state_before = self.controller.session().state();
        let mut changed = self.controller.session().is_recording();

        self.controller.tick(Instant::now());

        for job in self.controller.poll_events() {
            self.spawn_decode(job, cx);
        }

        if let Some(size) = self.canvas_size.get() {
            changed |= self.controller.sync_surface(
                &mut self.surface,
                f32::from(size.width),
                f32::from(size.height),
            );
        }

        changed |= self.controller.render_frame(&mut self.surface);
        // Decode results, auto-stop and end of clip only show up as a new state
        changed |= self.controller.session().state() != state_before;

        if changed {
            cx.notify();
        }
    }

    /// Decode on the background executor; the result comes back as an event
    fn spawn_decode(&self, job: DecodeJob<WavDecoder>, cx: &mut Context<Self>) {
        let events = self.controller.event_sender();
        cx.background_executor()
            .spawn(async move {
                let generation = job.generation();
                if events.send(job.run()).is_err() {
                    warn!("Decode for recording {} finished after shutdown", generation);
                }
            })
            .detach();
    }

    fn schedule_auto_stop(&self, auto_stop: AutoStop, cx: &mut Context<Self>) {
        let events = self.controller.event_sender();
        let timer = cx.background_executor().timer(auto_stop.delay);
        cx.background_executor()
            .spawn(async move {
                timer.await;
                let _ = events.send(auto_stop.into());
            })
            .detach();
    }

    fn start_recording(&mut self, cx: &mut Context<Self>) {
        // Errors are already on the status line
        if let Ok(Some(auto_stop)) = self.controller.start_recording(Instant::now()) {
            self.schedule_auto_stop(auto_stop, cx);
            self.redraw_placeholder();
        }
        cx.notify();
    }

    fn stop_recording(&mut self, cx: &mut Context<Self>) {
        if let Some(job) = self.controller.stop_recording() {
            self.spawn_decode(job, cx);
        }
        cx.notify();
    }

    fn toggle_recording(&mut self, cx: &mut Context<Self>) {
        if self.controller.session().is_recording() {
            self.stop_recording(cx);
        } else {
            self.start_recording(cx);
        }
    }

    fn play(&mut self, cx: &mut Context<Self>) {
        if let Err(e) = self.controller.play() {
            info!("Play rejected: {}", e);
        }
        cx.notify();
    }

    fn pause(&mut self, cx: &mut Context<Self>) {
        self.controller.pause();
        cx.notify();
    }

    fn toggle_playback(&mut self, cx: &mut Context<Self>) {
        if self.controller.session().is_playing() {
            self.pause(cx);
        } else if self.controller.controls().play {
            self.play(cx);
        }
    }

    fn set_anc(&mut self, enabled: bool, cx: &mut Context<Self>) {
        self.controller.set_anc_mode(enabled);
        cx.notify();
    }

    fn set_mode(&mut self, mode: VisualizationMode, cx: &mut Context<Self>) {
        self.controller.set_visualization_mode(mode);
        cx.notify();
    }

    fn update_help(&mut self, input: HelpInput, cx: &mut Context<Self>) {
        let showing = help_visible(self.show_help, input);
        if showing != self.show_help {
            self.show_help = showing;
            cx.notify();
        }
    }

    fn redraw_placeholder(&mut self) {
        if !self.controller.session().is_playing() {
            draw_placeholder(&mut self.surface);
        }
    }

    fn quit(&mut self, window: &mut Window) {
        // Drop the capture without decoding
        if self.controller.session().is_recording() {
            let _ = self.controller.stop_recording();
        }
        self.controller.pause();
        window.remove_window();
    }

    fn render_controls(&self, cx: &mut Context<Self>) -> impl IntoElement {
        let controls = self.controller.controls();

        div()
            .flex()
            .gap_3()
            .child(
                control_button("record-btn", "Record", controls.record, DANGER)
                    .when(controls.record, |el| {
                        el.on_click(cx.listener(|this, _, _w, cx| this.start_recording(cx)))
                    }),
            )
            .child(
                control_button("stop-btn", "Stop", controls.stop, 0xcccccc).when(
                    controls.stop,
                    |el| el.on_click(cx.listener(|this, _, _w, cx| this.stop_recording(cx))),
                ),
            )
            .child(
                control_button("play-btn", "Play", controls.play, ACCENT).when(
                    controls.play,
                    |el| el.on_click(cx.listener(|this, _, _w, cx| this.play(cx))),
                ),
            )
            .child(
                control_button("pause-btn", "Pause", controls.pause, ACCENT).when(
                    controls.pause,
                    |el| el.on_click(cx.listener(|this, _, _w, cx| this.pause(cx))),
                ),
            )
    }

    fn render_toggles(&self, cx: &mut Context<Self>) -> impl IntoElement {
        let session = self.controller.session();
        let anc_mode = session.anc_mode;
        let mode = session.visualization_mode;

        div()
            .flex()
            .items_center()
            .justify_between()
            .w_full()
            .child(
                div()
                    .id("anc-toggle")
                    .flex()
                    .items_center()
                    .gap_3()
                    .cursor_pointer()
                    .on_click(cx.listener(move |this, _, _w, cx| this.set_anc(!anc_mode, cx)))
                    .child(toggle_switch(anc_mode))
                    .child(
                        div()
                            .text_sm()
                            .text_color(rgb(0xcccccc))
                            .child("ANC (phase inversion)"),
                    ),
            )
            .child(
                div()
                    .flex()
                    .gap_2()
                    .child(
                        mode_button("mode-waveform", VisualizationMode::Waveform, mode)
                            .on_click(cx.listener(|this, _, _w, cx| {
                                this.set_mode(VisualizationMode::Waveform, cx)
                            })),
                    )
                    .child(
                        mode_button("mode-spectrum", VisualizationMode::Spectrum, mode)
                            .on_click(cx.listener(|this, _, _w, cx| {
                                this.set_mode(VisualizationMode::Spectrum, cx)
                            })),
                    ),
            )
    }

    fn render_status(&self) -> impl IntoElement {
        let status = self.controller.status();
        let anc_on = self.controller.session().anc_mode;

        div()
            .flex()
            .items_center()
            .justify_between()
            .w_full()
            .child(
                div()
                    .id("recording-status")
                    .text_sm()
                    .text_color(rgb(0xcccccc))
                    .child(status.recording_status.clone()),
            )
            .child(
                div()
                    .flex()
                    .gap_6()
                    .child(status_item(
                        "recording-duration",
                        "Duration",
                        status.recording_duration.clone(),
                        rgb(0xffffff),
                    ))
                    .child(status_item(
                        "anc-status",
                        "ANC",
                        status.anc_status.clone(),
                        rgb(anc_status_color(anc_on)),
                    )),
            )
    }

    fn render_canvas(&self) -> impl IntoElement {
        let frame = self.surface.clone();
        let measured = self.canvas_size.clone();

        div()
            .id("visualizer")
            .relative()
            .flex_grow()
            .w_full()
            .min_h(px(200.0))
            .rounded_lg()
            .overflow_hidden()
            .border_1()
            .border_color(rgb(0x2d2d44))
            .child(
                canvas(
                    move |bounds, _window, _cx| measured.set(Some(bounds.size)),
                    move |bounds, (), window, _cx| paint_display_list(&frame, bounds, window),
                )
                .size_full(),
            )
            .children(
                self.surface
                    .texts()
                    .map(|(text, at, style)| text_overlay(text, at, style)),
            )
    }
}

impl Render for AncDemo {
    fn render(&mut self, _window: &mut Window, cx: &mut Context<Self>) -> impl IntoElement {
        let show_help = self.show_help;

        div()
            .size_full()
            .flex()
            .flex_col()
            .bg(rgb(0x0f0f1a))
            .key_context("AncDemo")
            .on_key_down(cx.listener(|this, event: &KeyDownEvent, window, cx| {
                let modifiers = &event.keystroke.modifiers;
                match event.keystroke.key.as_str() {
                    "f1" => this.update_help(HelpInput::Toggle, cx),
                    "escape" if this.show_help => this.update_help(HelpInput::Close, cx),
                    "q" if modifiers.control => this.quit(window),
                    _ if this.show_help || modifiers.control => {}
                    "space" => this.toggle_recording(cx),
                    "p" => this.toggle_playback(cx),
                    "a" => {
                        let enabled = !this.controller.session().anc_mode;
                        this.set_anc(enabled, cx);
                    }
                    "w" => this.set_mode(VisualizationMode::Waveform, cx),
                    "s" => this.set_mode(VisualizationMode::Spectrum, cx),
                    _ => {}
                }
            }))
            // Custom titlebar
            .child(
                div()
                    .id("titlebar")
                    .flex()
                    .items_center()
                    .justify_between()
                    .w_full()
                    .h(px(36.0))
                    .bg(rgb(0x12121f))
                    .border_b_1()
                    .border_color(rgb(0x2d2d44))
                    .child(
                        div()
                            .id("titlebar-drag-area")
                            .flex()
                            .flex_grow()
                            .items_center()
                            .h_full()
                            .px_4()
                            .on_mouse_down(
                                MouseButton::Left,
                                cx.listener(|_this, _event: &MouseDownEvent, window, _cx| {
                                    window.start_window_move();
                                }),
                            )
                            .child(
                                div()
                                    .text_sm()
                                    .font_weight(FontWeight::SEMIBOLD)
                                    .text_color(rgb(0xcccccc))
                                    .child("ANC Demo - Phase Inversion"),
                            ),
                    )
                    .child(
                        div()
                            .id("info-button")
                            .w(px(46.0))
                            .h(px(36.0))
                            .flex()
                            .items_center()
                            .justify_center()
                            .cursor_pointer()
                            .hover(|style| style.bg(rgb(0x2d2d44)))
                            .on_click(cx.listener(|this, _, _w, cx| {
                                this.update_help(HelpInput::Toggle, cx)
                            }))
                            .child(
                                div()
                                    .text_sm()
                                    .font_weight(FontWeight::BOLD)
                                    .text_color(rgb(ACCENT))
                                    .child("i"),
                            ),
                    )
                    .child(
                        div()
                            .id("close-button")
                            .w(px(46.0))
                            .h(px(36.0))
                            .flex()
                            .items_center()
                            .justify_center()
                            .cursor_pointer()
                            .hover(|style| style.bg(rgb(0xe81123)))
                            .on_click(cx.listener(|this, _, window, _cx| this.quit(window)))
                            .child(div().text_lg().text_color(rgb(0xcccccc)).child("×")),
                    ),
            )
            .child(
                div()
                    .relative()
                    .flex()
                    .flex_col()
                    .flex_grow()
                    .gap_4()
                    .p_6()
                    .bg(rgb(0x16213e))
                    .child(
                        div()
                            .flex()
                            .items_center()
                            .justify_between()
                            .child(self.render_controls(cx))
                            .child(
                                div()
                                    .text_xs()
                                    .text_color(rgb(0x666666))
                                    .child("Press F1 for help"),
                            ),
                    )
                    .child(self.render_toggles(cx))
                    .child(self.render_canvas())
                    .child(self.render_status())
                    .when(show_help, |el| el.child(render_help_overlay(cx))),
            )
    }
}

fn to_hsla(color: Color) -> Hsla {
    Rgba {
        r: color.r,
        g: color.g,
        b: color.b,
        a: color.a,
    }
    .into()
}

/// Replay one recorded frame into the canvas bounds. Text is overlaid as elements.
fn paint_display_list(frame: &DisplayList, bounds: Bounds<Pixels>, window: &mut Window) {
    let origin = bounds.origin;
    let at = |x: f32, y: f32| point(origin.x + px(x), origin.y + px(y));

    for command in frame.commands() {
        match command {
            DrawCommand::Clear(color) => {
                window.paint_quad(fill(bounds, to_hsla(*color)));
            }
            DrawCommand::Line { points, stroke } => {
                let Some((first, rest)) = points.split_first() else {
                    continue;
                };
                let mut builder = PathBuilder::stroke(px(stroke.width));
                builder.move_to(at(first.x, first.y));
                for p in rest {
                    builder.line_to(at(p.x, p.y));
                }
                match builder.build() {
                    Ok(path) => window.paint_path(path, to_hsla(stroke.color)),
                    Err(e) => warn!("Skipping unpaintable line: {}", e),
                }
            }
            DrawCommand::Rect { rect, fill: paint } => {
                let rect_bounds =
                    Bounds::new(at(rect.x, rect.y), size(px(rect.width), px(rect.height)));
                let background: Background = match *paint {
                    Fill::Solid(color) => to_hsla(color).into(),
                    Fill::VerticalGradient { top, bottom } => linear_gradient(
                        180.0,
                        linear_color_stop(to_hsla(top), 0.0),
                        linear_color_stop(to_hsla(bottom), 1.0),
                    ),
                };
                window.paint_quad(fill(rect_bounds, background));
            }
            DrawCommand::Text { .. } => {}
        }
    }
}

/// `at` is a baseline anchor, so the box sits one line above it
fn text_overlay(text: &str, at: crate::surface::Point, style: TextStyle) -> Div {
    let el = div()
        .absolute()
        .top(px(at.y - style.size))
        .text_size(px(style.size))
        .text_color(to_hsla(style.color))
        .child(text.to_string());

    match style.align {
        TextAlign::Left => el.left(px(at.x)),
        TextAlign::Center => el.left_0().right_0().flex().justify_center(),
    }
}

fn control_button(
    id: &'static str,
    label: &'static str,
    enabled: bool,
    color: u32,
) -> Stateful<Div> {
    div()
        .id(id)
        .px_4()
        .py_2()
        .rounded_md()
        .border_1()
        .text_sm()
        .font_weight(FontWeight::SEMIBOLD)
        .when(enabled, |el| {
            el.bg(rgb(0x2d2d44))
                .border_color(rgb(color))
                .text_color(rgb(color))
                .cursor_pointer()
                .hover(|style| style.bg(rgb(0x3d3d54)))
        })
        .when(!enabled, |el| {
            el.bg(rgb(0x1a1a2e))
                .border_color(rgb(0x2d2d44))
                .text_color(rgb(0x555555))
        })
        .child(label)
}

fn mode_button(
    id: &'static str,
    mode: VisualizationMode,
    current: VisualizationMode,
) -> Stateful<Div> {
    let is_selected = mode == current;

    div()
        .id(id)
        .px_3()
        .py_1()
        .rounded_md()
        .cursor_pointer()
        .text_sm()
        .bg(if is_selected {
            rgb(0x2d2d44)
        } else {
            rgb(0x1a1a2e)
        })
        .text_color(if is_selected {
            rgb(ACCENT)
        } else {
            rgb(0xcccccc)
        })
        .hover(|style| style.bg(rgb(0x2d2d44)))
        .child(mode.label())
}

fn status_item(id: &'static str, label: &str, value: String, color: Rgba) -> impl IntoElement {
    div()
        .id(id)
        .flex()
        .gap_2()
        .items_center()
        .child(
            div()
                .text_xs()
                .text_color(rgb(0x888888))
                .child(label.to_string()),
        )
        .child(
            div()
                .text_sm()
                .font_weight(FontWeight::SEMIBOLD)
                .text_color(color)
                .child(value),
        )
}

fn toggle_switch(is_on: bool) -> impl IntoElement {
    let bg = if is_on { rgb(DANGER) } else { rgb(0x2d2d44) };
    let dot_position = if is_on { px(22.0) } else { px(2.0) };

    div()
        .w(px(44.0))
        .h(px(24.0))
        .rounded_full()
        .bg(bg)
        .relative()
        .child(
            div()
                .absolute()
                .top(px(2.0))
                .left(dot_position)
                .w(px(20.0))
                .h(px(20.0))
                .rounded_full()
                .bg(rgb(0xffffff)),
        )
}

fn render_help_overlay(cx: &mut Context<AncDemo>) -> impl IntoElement {
    div()
        .id("help-backdrop")
        .absolute()
        .inset_0()
        .bg(rgba(0x000000aa))
        .flex()
        .items_center()
        .justify_center()
        .on_click(cx.listener(|this, _, _w, cx| this.update_help(HelpInput::Close, cx)))
        .child(
            div()
                .id("help-panel")
                // Clicks inside the panel must not reach the backdrop
                .on_click(|_, _, cx| cx.stop_propagation())
                .w(px(600.0))
                .max_h(px(500.0))
                .bg(rgb(0x1a1a2e))
                .rounded_xl()
                .border_1()
                .border_color(rgb(0x2d2d44))
                .overflow_hidden()
                .flex()
                .flex_col()
                .child(
                    div()
                        .px_6()
                        .py_4()
                        .border_b_1()
                        .border_color(rgb(0x2d2d44))
                        .flex()
                        .justify_between()
                        .items_center()
                        .child(
                            div()
                                .text_xl()
                                .font_weight(FontWeight::BOLD)
                                .text_color(rgb(0xffffff))
                                .child("How ANC Works"),
                        )
                        .child(
                            div()
                                .flex()
                                .items_center()
                                .gap_3()
                                .child(
                                    div()
                                        .text_sm()
                                        .text_color(rgb(0x888888))
                                        .child("Press ESC or F1 to close"),
                                )
                                .child(
                                    div()
                                        .id("help-close")
                                        .px_2()
                                        .rounded_md()
                                        .cursor_pointer()
                                        .hover(|style| style.bg(rgb(0x2d2d44)))
                                        .on_click(cx.listener(|this, _, _w, cx| {
                                            this.update_help(HelpInput::Close, cx)
                                        }))
                                        .child(
                                            div().text_lg().text_color(rgb(0xcccccc)).child("×"),
                                        ),
                                ),
                        ),
                )
                .child(
                    div()
                        .id("help-scroll")
                        .p_6()
                        .flex()
                        .flex_col()
                        .gap_4()
                        .flex_grow()
                        .overflow_y_scroll()
                        .child(
                            div()
                                .flex()
                                .flex_col()
                                .gap_2()
                                .child(help_text(
                                    "Active noise cancellation plays an inverted copy of a sound. \
                                     Where the two waves meet, peaks line up with troughs and cancel out.",
                                ))
                                .child(help_text(
                                    "Record a clip, play it back, then flip ANC on: the gain becomes -1 \
                                     and the waveform turns upside down while the spectrum stays the same.",
                                )),
                        )
                        .child(help_section(
                            "Keyboard Shortcuts",
                            vec![
                                ("Space", "Start/stop recording"),
                                ("P", "Play/pause"),
                                ("A", "Toggle ANC"),
                                ("W", "Waveform view"),
                                ("S", "Spectrum view"),
                                ("F1", "Toggle this help"),
                                ("Ctrl+Q", "Quit"),
                            ],
                        )),
                ),
        )
}

fn help_text(text: &'static str) -> impl IntoElement {
    div().text_sm().text_color(rgb(0xcccccc)).child(text)
}

fn help_section(title: &str, items: Vec<(&str, &str)>) -> impl IntoElement {
    div()
        .flex()
        .flex_col()
        .gap_2()
        .child(
            div()
                .text_base()
                .font_weight(FontWeight::SEMIBOLD)
                .text_color(rgb(ACCENT))
                .child(title.to_string()),
        )
        .child(
            div()
                .flex()
                .flex_col()
                .gap_1()
                .children(items.into_iter().map(|(key, desc)| {
                    div()
                        .flex()
                        .gap_4()
                        .child(
                            div()
                                .w(px(80.0))
                                .px_2()
                                .py_1()
                                .rounded_sm()
                                .bg(rgb(0x2d2d44))
                                .text_sm()
                                .text_color(rgb(ACCENT))
                                .child(key.to_string()),
                        )
                        .child(
                            div()
                                .text_sm()
                                .text_color(rgb(0xcccccc))
                                .child(desc.to_string()),
                        )
                })),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anc_status_color() {
        assert_eq!(anc_status_color(true), 0xff6b6b);
        assert_eq!(anc_status_color(false), 0x4ecdc4);
    }

    #[test]
    fn test_help_visibility() {
        // Info button and F1 open and close
        assert!(help_visible(false, HelpInput::Toggle));
        assert!(!help_visible(true, HelpInput::Toggle));

        // Escape, close button and backdrop only ever close
        assert!(!help_visible(true, HelpInput::Close));
        assert!(!help_visible(false, HelpInput::Close));
    }
}
