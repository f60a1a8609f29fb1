#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod model_download;
mod pipeline;
mod topology;
mod types;
mod ui;

use std::path::PathBuf;

use anyhow::Result;
use gpui::Application;
use gpui_component;

use ui::SessionOptions;

const DEFAULT_CLIP_PATH: &str = "demos/reference.mp4";
const DEFAULT_EXERCISE_NAME: &str = "Shoulder Raise";

fn main() -> Result<()> {
    env_logger::init();

    // The hosting portal passes the exercise's clip and display name; both
    // fall back to the bundled defaults.
    let mut args = std::env::args().skip(1);
    let clip_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CLIP_PATH));
    let exercise_name = args
        .next()
        .unwrap_or_else(|| DEFAULT_EXERCISE_NAME.to_string());

    let options = SessionOptions {
        exercise_name,
        clip_path,
    };

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            if let Err(err) = ui::launch_ui(app, options) {
                eprintln!("failed to launch ui: {err:?}");
            }
        });

    Ok(())
}
