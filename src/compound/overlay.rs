//! Loading indicator painted over incomplete composites.
//!
//! Text is drawn with a built-in 5x7 bitmap font covering digits, `.` and
//! `%`, which is all a progress readout needs.

use image::imageops;
use image::{Pixel, Rgba, RgbaImage};

/// Translucent gray laid over an incomplete composite.
pub const LOADING_VEIL: Rgba<u8> = Rgba([128, 128, 128, 128]);

/// Colour of the progress text.
pub const TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_SPACING: u32 = 1;
const TEXT_SCALE: u32 = 2;

/// Progress as a percentage with at most one decimal: `50%`, `33.3%`.
pub fn format_percent(painted: usize, total: usize) -> String {
    if total == 0 {
        return "100%".to_string();
    }
    let painted = painted.min(total) as u64;
    let total = total as u64;
    let tenths = (painted * 1000 + total / 2) / total;
    if tenths % 10 == 0 {
        format!("{}%", tenths / 10)
    } else {
        format!("{}.{}%", tenths / 10, tenths % 10)
    }
}

/// Paint the veil and the loading image and/or progress text over `canvas`.
///
/// With only a loading image, it is centred. With percentages enabled the
/// text is centred, and a loading image, if any, sits above it.
pub(crate) fn draw_loading_overlay(
    canvas: &mut RgbaImage,
    painted: usize,
    total: usize,
    loading_image: Option<&RgbaImage>,
    show_percent: bool,
) {
    let (width, height) = canvas.dimensions();
    apply_veil(canvas, LOADING_VEIL);

    let size = i64::from(width.min(height));

    if !show_percent {
        if let Some(image) = loading_image {
            let x = (size - i64::from(image.width())) / 2;
            let y = (size - i64::from(image.height())) / 2;
            imageops::overlay(canvas, image, x, y);
        }
        return;
    }

    let text = format_percent(painted, total);
    let (text_width, text_height) = text_size(&text);
    let text_x = (size - i64::from(text_width)) / 2;

    match loading_image {
        None => {
            let text_y = (size - i64::from(text_height)) / 2;
            draw_text(canvas, &text, text_x, text_y, TEXT_COLOR);
        }
        Some(image) => {
            let free = size - i64::from(image.height()) - i64::from(text_height);
            let image_x = (size - i64::from(image.width())) / 2;
            imageops::overlay(canvas, image, image_x, free / 2);
            let text_y = free / 2 + i64::from(image.height());
            draw_text(canvas, &text, text_x, text_y, TEXT_COLOR);
        }
    }
}

/// Blend `veil` into every pixel. The result is never more transparent than
/// the pixel it covers, so an opaque canvas stays opaque.
fn apply_veil(canvas: &mut RgbaImage, veil: Rgba<u8>) {
    for pixel in canvas.pixels_mut() {
        let alpha = pixel[3];
        pixel.blend(&veil);
        pixel[3] = pixel[3].max(alpha);
    }
}

/// Pixel size of `text` as drawn by [`draw_text`].
pub(crate) fn text_size(text: &str) -> (u32, u32) {
    let glyphs = text.chars().count() as u32;
    if glyphs == 0 {
        return (0, 0);
    }
    let columns = glyphs * (GLYPH_WIDTH + GLYPH_SPACING) - GLYPH_SPACING;
    (columns * TEXT_SCALE, GLYPH_HEIGHT * TEXT_SCALE)
}

/// Draw `text` with its top-left corner at `(x, y)`. Pixels outside the
/// canvas are clipped; characters without a glyph leave a gap.
pub(crate) fn draw_text(canvas: &mut RgbaImage, text: &str, x: i64, y: i64, color: Rgba<u8>) {
    let advance = i64::from((GLYPH_WIDTH + GLYPH_SPACING) * TEXT_SCALE);
    for (index, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else {
            continue;
        };
        let origin_x = x + index as i64 * advance;
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + i64::from(col * TEXT_SCALE);
                let py = y + row as i64 * i64::from(TEXT_SCALE);
                fill_block(canvas, px, py, TEXT_SCALE, color);
            }
        }
    }
}

fn fill_block(canvas: &mut RgbaImage, x: i64, y: i64, side: u32, color: Rgba<u8>) {
    let (width, height) = canvas.dimensions();
    for dy in 0..i64::from(side) {
        for dx in 0..i64::from(side) {
            let (px, py) = (x + dx, y + dy);
            if px >= 0 && py >= 0 && px < i64::from(width) && py < i64::from(height) {
                canvas.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
        _ => return None,
    };
    Some(rows)
}
