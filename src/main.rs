//! ANC Demo - record a clip and hear it cancel itself out
//!
//! This is the main entry point for the demo.

mod app;
mod audio;
mod cli;
mod controller;
mod error;
mod settings;
mod state;
mod surface;
mod visualizer;

#[cfg(test)]
mod testing;

use app::AncDemo;
use clap::Parser;
use gpui::prelude::*;
use gpui::*;
use log::info;

fn main() {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);
    let settings = args.settings();

    info!("Starting ANC demo ({:?})", settings);

    Application::new().run(move |cx: &mut App| {
        let bounds = Bounds::centered(None, size(px(960.0), px(680.0)), cx);
        cx.open_window(
            WindowOptions {
                window_bounds: Some(WindowBounds::Windowed(bounds)),
                // No titlebar - we'll draw our own
                titlebar: None,
                window_decorations: Some(WindowDecorations::Client),
                // App ID for Wayland/GNOME desktop integration
                app_id: Some("com.ancdemo.PhaseInversion".to_string()),
                ..Default::default()
            },
            |window, cx| {
                window.set_app_id("com.ancdemo.PhaseInversion");
                cx.new(|cx| AncDemo::new(settings, cx))
            },
        )
        .expect("Failed to open window");
    });
}
