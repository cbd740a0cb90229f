use iced::{Border, Color, Shadow, Theme};
use iced::widget::button::{Appearance, StyleSheet};

/// Borderless text-only button, used for the title bar controls.
pub struct TextButtonStyleSheet;

impl StyleSheet for TextButtonStyleSheet {
    type Style = Theme;

    fn active(&self, style: &Self::Style) -> Appearance {
        Appearance {
            shadow_offset: Default::default(),
            background: None,
            text_color: style.palette().text,
            border: Border {
                color: Color::TRANSPARENT,
                width: 0.0,
                radius: 0.0.into(),
            },
            shadow: Shadow::default(),
        }
    }
}
