//! Detection overlay for the live video surface.
//!
//! - `viewport`: surface size tracking and normalized → pixel mapping.
//! - `renderer`: full clear-and-repaint of detection boxes and captions.
//! - `palette`: fixed colors for hazard categories.
//! - `font`/`draw`: bitmap glyphs and clipped raster primitives.

pub use palette::{DEFAULT_COLOR, category_color};
pub use renderer::{DrawReport, OverlayRenderer, RenderState, scale_to_surface};
pub use viewport::{PixelRect, SurfaceSize, ViewportMapper};

mod draw;
mod font;
mod palette;
mod renderer;
mod viewport;
