//! Clipped raster primitives. Shapes partly outside the surface are cut at its
//! edges instead of being pulled onto them.

use image::{Rgba, RgbaImage};

use crate::font::{GLYPH_ADVANCE, GLYPH_HEIGHT, GLYPH_WIDTH, glyph_bits};

fn put(image: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x < 0 || y < 0 || x >= image.width() as i32 || y >= image.height() as i32 {
        return;
    }
    image.put_pixel(x as u32, y as u32, color);
}

fn hline(image: &mut RgbaImage, x0: i32, x1: i32, y: i32, color: Rgba<u8>) {
    if y < 0 || y >= image.height() as i32 {
        return;
    }
    let left = x0.max(0);
    let right = x1.min(image.width() as i32 - 1);
    for x in left..=right {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn vline(image: &mut RgbaImage, x: i32, y0: i32, y1: i32, color: Rgba<u8>) {
    if x < 0 || x >= image.width() as i32 {
        return;
    }
    let top = y0.max(0);
    let bottom = y1.min(image.height() as i32 - 1);
    for y in top..=bottom {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Outline `[left, right] x [top, bottom]` with lines `thickness` pixels wide,
/// growing inwards.
pub(crate) fn stroke_rect(
    image: &mut RgbaImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    thickness: i32,
    color: Rgba<u8>,
) {
    for inset in 0..thickness.max(1) {
        let (l, t, r, b) = (
            left.saturating_add(inset),
            top.saturating_add(inset),
            right.saturating_sub(inset),
            bottom.saturating_sub(inset),
        );
        if l > r || t > b {
            break;
        }
        hline(image, l, r, t, color);
        hline(image, l, r, b, color);
        vline(image, l, t, b, color);
        vline(image, r, t, b, color);
    }
}

/// Draw `text` with its top-left corner at `(x, y)`, each glyph pixel scaled to
/// a `scale`-sized square. Returns the advance width in pixels.
pub(crate) fn draw_text(
    image: &mut RgbaImage,
    x: i32,
    y: i32,
    text: &str,
    scale: i32,
    color: Rgba<u8>,
) -> i32 {
    let scale = scale.max(1);
    let mut cursor = x;
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 0 {
                        continue;
                    }
                    let px = cursor.saturating_add(col * scale);
                    let py = y.saturating_add(row as i32 * scale);
                    for dy in 0..scale {
                        for dx in 0..scale {
                            put(image, px.saturating_add(dx), py.saturating_add(dy), color);
                        }
                    }
                }
            }
        }
        cursor = cursor.saturating_add(GLYPH_ADVANCE * scale);
    }
    cursor.saturating_sub(x)
}

pub(crate) fn text_height(scale: i32) -> i32 {
    GLYPH_HEIGHT * scale.max(1)
}
