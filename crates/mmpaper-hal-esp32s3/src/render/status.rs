use embedded_graphics::{
    mono_font::{
        MonoFont, MonoTextStyle,
        ascii::{FONT_6X13, FONT_9X15, FONT_10X20},
    },
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use heapless::Vec;
use mmpaper_core::{
    render::Canvas,
    status::{MAX_LINES, StatusMessage, StatusStyle},
};

const LINE_GAP: i32 = 8;

fn fonts(style: StatusStyle) -> (&'static MonoFont<'static>, &'static MonoFont<'static>) {
    match style {
        StatusStyle::Splash => (&FONT_10X20, &FONT_6X13),
        StatusStyle::Notice => (&FONT_9X15, &FONT_9X15),
    }
}

/// Clears `canvas` to white and centers the message lines on it. The first
/// line of a splash uses the larger face.
pub fn draw_status(canvas: &mut Canvas<'_>, message: &StatusMessage) {
    canvas.clear(false);

    let (lead, body) = fonts(message.style);
    let heights: Vec<i32, MAX_LINES> = (0..message.line_count())
        .map(|i| {
            let font = if i == 0 { lead } else { body };
            font.character_size.height as i32
        })
        .collect();
    let total: i32 = heights.iter().sum::<i32>() + LINE_GAP * (heights.len() as i32 - 1).max(0);

    let center_x = canvas.width() as i32 / 2;
    let mut y = (canvas.height() as i32 - total) / 2;
    let text_style = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Top)
        .build();

    for (i, line) in message.lines().enumerate() {
        let font = if i == 0 { lead } else { body };
        let character_style = MonoTextStyle::new(font, BinaryColor::On);
        let _ = Text::with_text_style(
            line,
            Point::new(center_x, y),
            character_style,
            text_style,
        )
        .draw(canvas);
        y += heights[i] + LINE_GAP;
    }
}
