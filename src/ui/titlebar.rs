use super::{
    AnyElement, AppView, Context, Hsla, InteractiveElement, IntoElement, ParentElement, Styled,
    Window, WindowControlArea, div, h_flex, px,
};

impl AppView {
    pub(super) fn render_titlebar(
        &self,
        model_color: Hsla,
        model_icon: &str,
        model_text: &str,
        session_color: Hsla,
        session_icon: &str,
        session_text: &str,
        window: &mut Window,
        cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let titlebar_height = px(32.0);
        let titlebar_bg = gpui::rgb(0x1a2332);

        #[cfg(target_os = "macos")]
        let controls = {
            let _ = (window, cx);
            div().into_any_element()
        };

        #[cfg(not(target_os = "macos"))]
        let controls = self.render_window_controls(window, cx);

        h_flex()
            .window_control_area(WindowControlArea::Drag)
            .h(titlebar_height)
            .w_full()
            .items_center()
            .justify_between()
            .bg(titlebar_bg)
            .child(
                h_flex()
                    .gap_3()
                    .pl(px(80.0))
                    .pr_3()
                    .h_full()
                    .items_center()
                    .child(
                        div()
                            .px_2()
                            .py_0p5()
                            .rounded_md()
                            .bg(gpui::rgba(0x00000033))
                            .text_xs()
                            .text_color(model_color)
                            .child(format!("{} {}", model_icon, model_text)),
                    )
                    .child(
                        div()
                            .px_2()
                            .py_0p5()
                            .rounded_md()
                            .bg(gpui::rgba(0x00000033))
                            .text_xs()
                            .text_color(session_color)
                            .child(format!("{} {}", session_icon, session_text)),
                    ),
            )
            .child(controls)
            .into_any_element()
    }

    #[cfg(not(target_os = "macos"))]
    fn render_window_controls(
        &self,
        _window: &mut Window,
        _cx: &mut Context<'_, Self>,
    ) -> AnyElement {
        let button_size = px(28.0);
        let icon_size = px(16.0);
        let icon_color = gpui::rgb(0xc9d1d9);
        let hover_bg = gpui::rgb(0x1f2428);
        let close_hover_bg = gpui::rgb(0xe81123);

        h_flex()
            .gap_1()
            .px_2()
            .child(
                div()
                    .id("window-minimize")
                    .size(button_size)
                    .flex()
                    .items_center()
                    .justify_center()
                    .rounded_md()
                    .cursor_pointer()
                    .window_control_area(WindowControlArea::Min)
                    .hover(|s| s.bg(hover_bg))
                    .child(
                        gpui::svg()
                            .size(icon_size)
                            .path("M 4,8 H 12")
                            .text_color(icon_color),
                    ),
            )
            .child(
                div()
                    .id("window-maximize")
                    .size(button_size)
                    .flex()
                    .items_center()
                    .justify_center()
                    .rounded_md()
                    .cursor_pointer()
                    .window_control_area(WindowControlArea::Max)
                    .hover(|s| s.bg(hover_bg))
                    .child(
                        gpui::svg()
                            .size(icon_size)
                            .path("M 4,4 H 12 V 12 H 4 Z")
                            .text_color(icon_color),
                    ),
            )
            .child(
                div()
                    .id("window-close")
                    .size(button_size)
                    .flex()
                    .items_center()
                    .justify_center()
                    .rounded_md()
                    .cursor_pointer()
                    .window_control_area(WindowControlArea::Close)
                    .hover(|s| s.bg(close_hover_bg))
                    .child(
                        gpui::svg()
                            .size(icon_size)
                            .path("M 4,4 L 12,12 M 12,4 L 4,12")
                            .text_color(icon_color),
                    ),
            )
            .into_any_element()
    }
}
