use std::{mem, path::PathBuf, sync::Arc, thread};

use crossbeam_channel::{Receiver, Sender, unbounded};
use gpui::{
    AnyElement, App, AppContext, Context, Hsla, InteractiveElement, IntoElement, ObjectFit,
    ParentElement, Render, RenderImage, SharedString, Styled, StyledImage, TitlebarOptions, Window,
    WindowControlArea, WindowDecorations, WindowOptions, div, img, px,
};
use gpui_component::{
    ActiveTheme, Root, StyledExt,
    button::{Button, ButtonVariants},
    h_flex,
    tag::Tag,
    v_flex,
};
use image::{Frame as ImageFrame, ImageBuffer, Rgba};

use crate::{
    model_download::ModelDownloadEvent,
    pipeline::{
        CameraSource, DefaultCamera, EstimatorHandle, ModelConfig, ModelVariant, ReferencePlayer,
        SessionController, camera::UnavailableCamera, estimator::default_model_path,
    },
    types::{Feed, SessionFrame},
};

mod download;
mod render_util;
mod session_view;
mod titlebar;

/// What the hosting environment hands the session screen: which exercise
/// is being replayed (display only) and where its demonstration clip
/// lives.
pub struct SessionOptions {
    pub exercise_name: String,
    pub clip_path: PathBuf,
}

pub fn launch_ui(app: &mut App, options: SessionOptions) -> gpui::Result<()> {
    let window_options = WindowOptions {
        titlebar: Some(TitlebarOptions {
            title: Some("Rehab Replay".into()),
            appears_transparent: true,
            traffic_light_position: None,
        }),
        window_decorations: Some(WindowDecorations::Client),
        ..Default::default()
    };

    app.open_window(window_options, move |window, app| {
        let view = app.new(|_| AppView::new(options));
        app.new(|cx| Root::new(view, window, cx))
    })?;

    Ok(())
}

struct ExerciseInfo {
    name: String,
    instructions: Vec<&'static str>,
    tips: Vec<&'static str>,
}

impl ExerciseInfo {
    fn for_exercise(name: String) -> Self {
        Self {
            name,
            instructions: vec![
                "Stand straight with your feet shoulder-width apart",
                "Slowly raise your arms to shoulder height",
                "Hold for 5 seconds",
                "Lower your arms back to starting position",
                "Repeat for the specified number of sets",
            ],
            tips: vec![
                "Keep your back straight throughout the exercise",
                "Breathe steadily and naturally",
                "Stop if you feel any pain or discomfort",
            ],
        }
    }
}

struct AppView {
    screen: Screen,
    session: SessionController,
    session_rx: Receiver<SessionFrame>,
    estimator: EstimatorHandle,
    exercise: ExerciseInfo,
    media_error: Option<String>,
    webcam_image: Option<Arc<RenderImage>>,
    reference_image: Option<Arc<RenderImage>>,
    webcam_dims: Option<(u32, u32)>,
    reference_dims: Option<(u32, u32)>,
    download_rx: Receiver<DownloadMessage>,
    _download_handle: thread::JoinHandle<()>,
}

enum Screen {
    Download(DownloadState),
    Session,
}

struct DownloadState {
    downloaded: u64,
    total: Option<u64>,
    message: String,
    error: Option<String>,
    finished: bool,
}

impl DownloadState {
    fn new() -> Self {
        Self {
            downloaded: 0,
            total: None,
            message: "Preparing model download...".to_string(),
            error: None,
            finished: false,
        }
    }
}

enum DownloadMessage {
    Event(ModelDownloadEvent),
    Ready,
    Error(String),
}

impl AppView {
    fn new(options: SessionOptions) -> Self {
        let camera: Box<dyn CameraSource> = match DefaultCamera::first_available() {
            Ok(camera) => Box::new(camera),
            Err(err) => {
                log::warn!("no usable camera at startup: {err}");
                Box::new(UnavailableCamera::new(err.to_string()))
            }
        };

        let (reference, media_error) = open_reference_player(&options.clip_path);

        let estimator = EstimatorHandle::new();
        let (session, session_rx) = SessionController::new(camera, reference, estimator.clone());

        let config = ModelConfig::lightning(default_model_path(ModelVariant::Lightning));
        let (download_tx, download_rx) = unbounded();
        let download_handle =
            download::spawn_model_preparation(config, estimator.clone(), download_tx);

        Self {
            screen: Screen::Download(DownloadState::new()),
            session,
            session_rx,
            estimator,
            exercise: ExerciseInfo::for_exercise(options.exercise_name),
            media_error,
            webcam_image: None,
            reference_image: None,
            webcam_dims: None,
            reference_dims: None,
            download_rx,
            _download_handle: download_handle,
        }
    }

    fn drain_session_frames(&mut self, window: &mut Window, cx: &mut Context<'_, Self>) {
        while let Ok(presented) = self.session_rx.try_recv() {
            let dims = (presented.frame.width, presented.frame.height);
            let Some(image) = render_util::frame_to_image(&presented.frame) else {
                continue;
            };
            let slot = match presented.feed {
                Feed::Webcam => {
                    self.webcam_dims = Some(dims);
                    &mut self.webcam_image
                }
                Feed::Reference => {
                    self.reference_dims = Some(dims);
                    &mut self.reference_image
                }
            };
            if let Some(old_image) = slot.replace(image) {
                // Explicitly drop the previous GPU texture; otherwise the sprite atlas keeps
                // every frame and memory will climb rapidly while the session is running.
                cx.drop_image(old_image, Some(window));
            }
        }
    }
}

fn open_reference_player(
    clip_path: &std::path::Path,
) -> (
    Option<(ReferencePlayer, Receiver<crate::types::Frame>)>,
    Option<String>,
) {
    #[cfg(feature = "reference-ffmpeg")]
    {
        match ReferencePlayer::open(clip_path) {
            Ok(pair) => (Some(pair), None),
            Err(err) => {
                // Degrade to an empty reference pane; the webcam side of
                // the session is unaffected.
                log::warn!("reference clip unavailable: {err}");
                (None, Some(err.to_string()))
            }
        }
    }
    #[cfg(not(feature = "reference-ffmpeg"))]
    {
        let _ = clip_path;
        (
            None,
            Some("built without reference clip playback".to_string()),
        )
    }
}

impl Render for AppView {
    fn render(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> impl gpui::IntoElement {
        cx.defer_in(window, |_, _, cx| {
            cx.notify();
        });

        self.drain_session_frames(window, cx);

        let mut screen = mem::replace(&mut self.screen, Screen::Session);
        let view = match screen {
            Screen::Download(mut state) => {
                self.poll_download_events(&mut state);
                let should_switch = state.finished && state.error.is_none();
                let view = self.render_download_view(&state, cx);
                if should_switch {
                    screen = Screen::Session;
                } else {
                    screen = Screen::Download(state);
                }
                view
            }
            Screen::Session => {
                screen = Screen::Session;
                self.render_session(window, cx)
            }
        };
        self.screen = screen;
        view
    }
}
