//! Label text for the chart, drawn with the 8x8 `font8x8` glyphs.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

/// Side of one unscaled glyph cell, in pixels.
pub(crate) const GLYPH: u32 = 8;

/// Set a pixel if it lies inside the image.
pub(crate) fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u64) < u64::from(img.width()) && (y as u64) < u64::from(img.height()) {
        img.put_pixel(x as u32, y as u32, color);
    }
}

pub(crate) fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH * scale
}

/// Draw `text` left to right with its top-left corner at (x, y).
pub(crate) fn draw_text(img: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    let advance = i64::from(GLYPH * scale);
    for (i, c) in text.chars().enumerate() {
        let origin = x + i as i64 * advance;
        draw_glyph(img, c, scale, color, |gx, gy| (origin + gx, y + gy));
    }
}

/// Draw `text` bottom to top, turned a quarter counter-clockwise. (x, y) is
/// the bottom-left corner of the first glyph.
pub(crate) fn draw_text_vertical(img: &mut RgbImage, text: &str, x: i64, y: i64, scale: u32, color: Rgb<u8>) {
    let advance = i64::from(GLYPH * scale);
    for (i, c) in text.chars().enumerate() {
        let origin = y - i as i64 * advance;
        draw_glyph(img, c, scale, color, |gx, gy| (x + gy, origin - 1 - gx));
    }
}

/// Characters without a glyph leave a blank cell.
fn draw_glyph<F>(img: &mut RgbImage, c: char, scale: u32, color: Rgb<u8>, place: F)
where
    F: Fn(i64, i64) -> (i64, i64),
{
    let Some(rows) = BASIC_FONTS.get(c) else {
        return;
    };
    let s = i64::from(scale);

    for (row, bits) in rows.iter().enumerate() {
        for col in 0..GLYPH {
            // Bit 0 is the leftmost column.
            if bits & (1 << col) == 0 {
                continue;
            }
            for dy in 0..s {
                for dx in 0..s {
                    let (px, py) = place(i64::from(col) * s + dx, row as i64 * s + dy);
                    put(img, px, py, color);
                }
            }
        }
    }
}
