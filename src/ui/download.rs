use std::sync::Arc;

use super::{
    ActiveTheme, AnyElement, AppView, Context, DownloadMessage, DownloadState, IntoElement,
    ParentElement, Sender, Styled, StyledExt, Tag, div, h_flex, thread, v_flex,
};
use crate::model_download::{ModelDownloadEvent, ensure_pose_model_ready};
use crate::pipeline::{EstimatorHandle, ModelConfig, OrtBackend};

impl AppView {
    pub(super) fn poll_download_events(&mut self, state: &mut DownloadState) {
        while let Ok(msg) = self.download_rx.try_recv() {
            match msg {
                DownloadMessage::Event(ModelDownloadEvent::AlreadyPresent) => {
                    state.message = "Pose model already present...".to_string();
                }
                DownloadMessage::Event(ModelDownloadEvent::Started { total }) => {
                    state.total = total;
                    state.message = "Downloading pose model...".to_string();
                }
                DownloadMessage::Event(ModelDownloadEvent::Progress { downloaded, total }) => {
                    state.downloaded = downloaded;
                    state.total = total;
                    state.message = "Downloading pose model...".to_string();
                }
                DownloadMessage::Event(ModelDownloadEvent::Finished) => {
                    state.message = "Loading pose model...".to_string();
                }
                DownloadMessage::Ready => {
                    state.finished = true;
                    state.message = "Pose model ready, starting session screen...".to_string();
                }
                DownloadMessage::Error(err) => {
                    state.error = Some(err);
                    state.finished = false;
                    state.message = "Pose model preparation failed".to_string();
                }
            }
        }
    }

    pub(super) fn render_download_view(
        &self,
        state: &DownloadState,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme = cx.theme();
        let bar = progress_bar_string(state.downloaded, state.total);
        let detail = match (state.total, state.finished) {
            (_, true) => "Done".to_string(),
            (Some(total), false) if total > 0 => {
                let percent = (state.downloaded as f64 / total as f64 * 100.0).clamp(0.0, 100.0);
                format!("{percent:.1}%")
            }
            _ => format!("Downloaded {} KB", state.downloaded / 1024),
        };

        let (status_icon, status_text, status_color) = if state.finished && state.error.is_none() {
            ("✓", "Model ready", theme.success)
        } else if state.error.is_some() {
            ("✗", "Model preparation failed", theme.accent)
        } else {
            ("⟳", "Preparing model", theme.foreground)
        };

        let mut container = v_flex()
            .gap_3()
            .p_6()
            .rounded_lg()
            .border_1()
            .border_color(theme.border)
            .bg(theme.group_box)
            .child(
                h_flex()
                    .gap_2()
                    .items_center()
                    .child(
                        div()
                            .text_color(status_color)
                            .font_semibold()
                            .child(format!("{} {}", status_icon, status_text)),
                    )
                    .child(
                        div()
                            .text_sm()
                            .text_color(theme.muted_foreground)
                            .child("Preparing the pose-estimation model"),
                    ),
            )
            .child(
                div()
                    .px_3()
                    .py_2()
                    .rounded_md()
                    .border_1()
                    .border_color(theme.border)
                    .bg(theme.muted)
                    .font_family(theme.mono_font_family.clone())
                    .text_color(theme.foreground)
                    .child(bar),
            )
            .child(
                div()
                    .text_sm()
                    .text_color(theme.muted_foreground)
                    .child(detail),
            )
            .child(
                div()
                    .text_color(theme.foreground)
                    .child(state.message.clone()),
            );

        if let Some(err) = &state.error {
            container = container.child(Tag::danger().rounded_full().child(format!("Error: {err}")));
        }

        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .bg(theme.background)
            .child(container)
            .into_any_element()
    }
}

/// Download the model if needed, build the inference session, and install
/// it into the shared estimator slot.
pub(super) fn spawn_model_preparation(
    config: ModelConfig,
    estimator: EstimatorHandle,
    tx: Sender<DownloadMessage>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let events_tx = tx.clone();
        let downloaded =
            ensure_pose_model_ready(config.variant, &config.model_path, |event| {
                let _ = events_tx.send(DownloadMessage::Event(event));
            });

        if let Err(err) = downloaded {
            log::error!("failed to download pose model: {err:?}");
            let _ = tx.send(DownloadMessage::Error(format!("{err:#}")));
            return;
        }

        match OrtBackend::load(&config) {
            Ok(backend) => {
                estimator.install(Arc::new(backend));
                let _ = tx.send(DownloadMessage::Ready);
            }
            Err(err) => {
                log::error!("failed to load pose model: {err:?}");
                let _ = tx.send(DownloadMessage::Error(format!("{err:#}")));
            }
        }
    })
}

fn progress_bar_string(downloaded: u64, total: Option<u64>) -> String {
    const BAR_LEN: usize = 30;
    match total {
        Some(total) if total > 0 => {
            let pct = (downloaded as f64 / total as f64).clamp(0.0, 1.0);
            let filled = ((pct * BAR_LEN as f64).round() as usize).min(BAR_LEN);
            let empty = BAR_LEN.saturating_sub(filled);
            format!(
                "[{}{}] {:>5.1}%",
                "=".repeat(filled),
                " ".repeat(empty),
                pct * 100.0
            )
        }
        _ => {
            let spinner_width = ((downloaded / 64) as usize % (BAR_LEN.max(1))) + 1;
            format!(
                "[{:-<width$}] unknown size",
                ">",
                width = spinner_width.min(BAR_LEN)
            )
        }
    }
}
