use image::{Rgba, RgbaImage, imageops};
use ops_core::Detection;
use tracing::trace;

use crate::{
    draw::{draw_text, stroke_rect, text_height},
    palette::category_color,
    viewport::{SurfaceSize, ViewportMapper},
};

pub const LINE_WIDTH: i32 = 2;
const LABEL_OFFSET_X: i32 = 4;
/// Caption baseline below the box's top edge.
const LABEL_BASELINE: i32 = 16;
const LABEL_SCALE: i32 = 2;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Drawing,
}

/// Result of one repaint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawReport {
    /// Rectangles stroked.
    pub boxes: usize,
    /// Detections without a box, or whose box has non-finite geometry.
    pub skipped: usize,
    /// Captions in draw order.
    pub labels: Vec<String>,
}

/// Paints detection boxes onto a transparent surface sized to the viewport.
pub struct OverlayRenderer {
    surface: RgbaImage,
    state: RenderState,
    draws: u64,
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self {
            surface: RgbaImage::new(0, 0),
            state: RenderState::Idle,
            draws: 0,
        }
    }

    /// Clear the surface and repaint every detection that carries a box.
    pub fn draw<'a, I>(&mut self, detections: I, viewport: &ViewportMapper) -> DrawReport
    where
        I: IntoIterator<Item = &'a Detection>,
    {
        self.state = RenderState::Drawing;
        let SurfaceSize { width, height } = viewport.surface();
        if self.surface.dimensions() != (width, height) {
            self.surface = RgbaImage::new(width, height);
        } else {
            for pixel in self.surface.pixels_mut() {
                *pixel = TRANSPARENT;
            }
        }

        let mut report = DrawReport::default();
        for detection in detections {
            let Some(bbox) = detection.bbox.as_ref() else {
                report.skipped += 1;
                continue;
            };
            let rect = viewport.map_box(bbox);
            let Some((left, right)) = pixel_span(rect.x, rect.width, width) else {
                report.skipped += 1;
                continue;
            };
            let Some((top, bottom)) = pixel_span(rect.y, rect.height, height) else {
                report.skipped += 1;
                continue;
            };
            let color = category_color(&detection.cls);

            stroke_rect(&mut self.surface, left, top, right, bottom, LINE_WIDTH, color);

            let label = detection.label();
            let label_top = top.saturating_add(LABEL_BASELINE - text_height(LABEL_SCALE));
            draw_text(
                &mut self.surface,
                left.saturating_add(LABEL_OFFSET_X),
                label_top,
                &label,
                LABEL_SCALE,
                color,
            );
            report.boxes += 1;
            report.labels.push(label);
        }

        self.draws = self.draws.wrapping_add(1);
        self.state = RenderState::Idle;
        trace!(
            boxes = report.boxes,
            skipped = report.skipped,
            width,
            height,
            "overlay repainted"
        );
        report
    }

    pub fn surface(&self) -> &RgbaImage {
        &self.surface
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Number of completed repaints.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// Alpha-blend the overlay onto a frame already scaled to the surface.
    pub fn composite(&self, frame: &mut RgbaImage) {
        imageops::overlay(frame, &self.surface, 0, 0);
    }
}

/// Inclusive pixel range covered by `start..start + extent`, limited to one
/// surface length either side of the surface so the integer casts stay exact.
fn pixel_span(start: f32, extent: f32, limit: u32) -> Option<(i32, i32)> {
    if !start.is_finite() || !extent.is_finite() {
        return None;
    }
    let limit = limit as f32;
    let clamp = |v: f32| v.round().clamp(-limit, 2.0 * limit) as i32;
    let first = clamp(start);
    let last = clamp(start.round() + extent.round()) - 1;
    Some((first, last.max(first)))
}

/// Scale a decoded video frame to the displayed surface size.
pub fn scale_to_surface(frame: &RgbaImage, viewport: &ViewportMapper) -> RgbaImage {
    let SurfaceSize { width, height } = viewport.surface();
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    imageops::resize(frame, width, height, imageops::FilterType::Triangle)
}
