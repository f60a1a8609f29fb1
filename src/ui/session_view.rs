use std::sync::Arc;
use std::time::Duration;

use super::{
    AnyElement, AppView, Button, ButtonVariants, Context, IntoElement, ObjectFit, ParentElement,
    RenderImage, SharedString, Styled, StyledExt, StyledImage, Window, div, h_flex, img, px, v_flex,
};
use crate::types::{Feed, SessionState};

impl AppView {
    pub(super) fn render_session(
        &mut self,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let theme_bg = gpui::rgb(0x1a2332);

        let (model_icon, model_text, model_color) = if self.estimator.ready() {
            ("●", "Pose model loaded", gpui::rgb(0x34d399).into())
        } else {
            ("○", "Pose model loading", gpui::rgb(0x8b95a5).into())
        };

        let (session_icon, session_text, session_color) = match self.session.state() {
            SessionState::Running => ("●", "Session running", gpui::rgb(0x34d399).into()),
            SessionState::Idle => ("○", "Session paused", gpui::rgb(0x8b95a5).into()),
        };

        let titlebar = self.render_titlebar(
            model_color,
            model_icon,
            model_text,
            session_color,
            session_icon,
            session_text,
            window,
            cx,
        );

        let webcam_subtitle = match self.webcam_dims {
            Some((w, h)) => format!("{w}x{h}"),
            None => "waiting for stream".to_string(),
        };
        let reference_subtitle = match self.reference_dims {
            Some((w, h)) => format!("{w}x{h}"),
            None => "waiting for playback".to_string(),
        };

        let webcam_pane = feed_pane(
            Feed::Webcam.label(),
            webcam_subtitle,
            self.webcam_image.clone(),
            "Camera feed will appear here",
            self.session.camera_error().map(|err| err.to_string()),
        );
        let reference_pane = feed_pane(
            Feed::Reference.label(),
            reference_subtitle,
            self.reference_image.clone(),
            "Demonstration clip will appear here",
            self.media_error.clone(),
        );

        let toggle_label = match self.session.state() {
            SessionState::Idle => "▶ Start",
            SessionState::Running => "⏸ Pause",
        };

        let controls = h_flex()
            .gap_3()
            .justify_center()
            .child(
                Button::new(SharedString::from("session-toggle"))
                    .primary()
                    .label(toggle_label)
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.session.toggle();
                        cx.notify();
                    })),
            )
            .child(
                Button::new(SharedString::from("session-reset"))
                    .outline()
                    .label("↺ Reset")
                    .on_click(cx.listener(|this, _, _, cx| {
                        this.session.reset();
                        cx.notify();
                    })),
            );

        v_flex()
            .size_full()
            .bg(theme_bg)
            .child(titlebar)
            .child(
                v_flex()
                    .flex_1()
                    .gap_4()
                    .p_4()
                    .child(
                        h_flex()
                            .gap_3()
                            .items_start()
                            .child(webcam_pane)
                            .child(reference_pane),
                    )
                    .child(controls)
                    .child(self.render_exercise_card()),
            )
            .into_any_element()
    }

    fn render_exercise_card(&self) -> AnyElement {
        let mut instructions = v_flex().gap_1().child(
            div()
                .text_sm()
                .font_semibold()
                .text_color(gpui::rgb(0xe2e8f0))
                .child("Instructions"),
        );
        for (step, text) in self.exercise.instructions.iter().enumerate() {
            instructions = instructions.child(
                div()
                    .text_xs()
                    .text_color(gpui::rgb(0xa0aab8))
                    .child(format!("{}. {}", step + 1, text)),
            );
        }

        let mut tips = v_flex().gap_1().child(
            div()
                .text_sm()
                .font_semibold()
                .text_color(gpui::rgb(0xe2e8f0))
                .child("Tips"),
        );
        for text in &self.exercise.tips {
            tips = tips.child(
                div()
                    .text_xs()
                    .text_color(gpui::rgb(0xa0aab8))
                    .child(format!("• {text}")),
            );
        }

        v_flex()
            .gap_3()
            .p_4()
            .rounded_lg()
            .bg(gpui::rgb(0x0f1419))
            .child(
                h_flex()
                    .justify_between()
                    .items_center()
                    .child(
                        div()
                            .text_base()
                            .font_semibold()
                            .text_color(gpui::rgb(0xe2e8f0))
                            .child(self.exercise.name.clone()),
                    )
                    .child(
                        div()
                            .px_2()
                            .py_0p5()
                            .rounded_md()
                            .bg(gpui::rgba(0x00000033))
                            .text_xs()
                            .text_color(gpui::rgb(0xa5b4fc))
                            .child(format!("Time elapsed: {}", format_elapsed(self.session.elapsed()))),
                    ),
            )
            .child(h_flex().gap_6().items_start().child(instructions).child(tips))
            .into_any_element()
    }
}

fn feed_pane(
    title: &'static str,
    subtitle: String,
    image: Option<Arc<RenderImage>>,
    placeholder: &'static str,
    error: Option<String>,
) -> AnyElement {
    let view: AnyElement = if let Some(image) = image {
        img(image)
            .size_full()
            .object_fit(ObjectFit::Contain)
            .rounded_t_lg()
            .into_any_element()
    } else {
        v_flex()
            .size_full()
            .items_center()
            .justify_center()
            .gap_2()
            .child(div().text_lg().text_color(gpui::rgb(0x4a5568)).child("📷"))
            .child(
                div()
                    .text_sm()
                    .text_color(gpui::rgb(0x8b95a5))
                    .child(placeholder),
            )
            .into_any_element()
    };

    let mut card = v_flex()
        .flex_1()
        .rounded_lg()
        .overflow_hidden()
        .bg(gpui::rgb(0x0f1419))
        .child(
            div()
                .w_full()
                .h(px(380.0))
                .overflow_hidden()
                .bg(gpui::rgb(0x000000))
                .child(view),
        )
        .child(
            h_flex()
                .justify_between()
                .items_center()
                .p_3()
                .child(
                    div()
                        .text_sm()
                        .font_semibold()
                        .text_color(gpui::rgb(0xe2e8f0))
                        .child(title),
                )
                .child(
                    div()
                        .text_xs()
                        .text_color(gpui::rgb(0x8b95a5))
                        .child(subtitle),
                ),
        );

    if let Some(err) = error {
        card = card.child(
            div()
                .px_3()
                .pb_3()
                .text_xs()
                .text_color(gpui::rgb(0xfca5a5))
                .child(err),
        );
    }

    card.into_any_element()
}

fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formats_as_minutes_and_seconds() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00");
        assert_eq!(format_elapsed(Duration::from_secs(59)), "00:59");
        assert_eq!(format_elapsed(Duration::from_secs(330)), "05:30");
    }
}
