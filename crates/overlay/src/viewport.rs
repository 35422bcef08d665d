use ops_core::NormalizedBox;

/// Displayed pixel size of the rendering surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Maps normalized geometry onto the surface's current pixel size.
///
/// Only the last known size is kept; every mapping is recomputed from it.
#[derive(Clone, Debug)]
pub struct ViewportMapper {
    surface: SurfaceSize,
}

impl ViewportMapper {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface: SurfaceSize::new(width, height),
        }
    }

    /// Record a resize notification. Returns `true` when the size changed.
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        let next = SurfaceSize::new(width, height);
        if next == self.surface {
            return false;
        }
        self.surface = next;
        true
    }

    pub fn surface(&self) -> SurfaceSize {
        self.surface
    }

    pub fn normalized_to_pixel(&self, x: f32, y: f32, w: f32, h: f32) -> PixelRect {
        let sw = self.surface.width as f32;
        let sh = self.surface.height as f32;
        PixelRect {
            x: x * sw,
            y: y * sh,
            width: w * sw,
            height: h * sh,
        }
    }

    pub fn map_box(&self, bbox: &NormalizedBox) -> PixelRect {
        self.normalized_to_pixel(bbox.x, bbox.y, bbox.w, bbox.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_linearly_against_surface() {
        let mapper = ViewportMapper::new(400, 200);
        assert_eq!(
            mapper.normalized_to_pixel(0.25, 0.25, 0.5, 0.5),
            PixelRect {
                x: 100.0,
                y: 50.0,
                width: 200.0,
                height: 100.0
            }
        );
    }

    #[test]
    fn resize_reports_changes_and_remaps() {
        let mut mapper = ViewportMapper::new(400, 200);
        assert!(!mapper.resize(400, 200));
        assert!(mapper.resize(800, 600));
        let rect = mapper.map_box(&NormalizedBox::new(0.5, 0.5, 0.25, 0.25));
        assert_eq!(rect.x, 400.0);
        assert_eq!(rect.y, 300.0);
        assert_eq!(rect.width, 200.0);
        assert_eq!(rect.height, 150.0);
    }
}
