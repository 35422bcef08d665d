use image::Rgba;

pub const FIRE_COLOR: Rgba<u8> = Rgba([0xff, 0x00, 0x00, 0xff]);
pub const SMOKE_COLOR: Rgba<u8> = Rgba([0xff, 0xaa, 0x00, 0xff]);
pub const DEFAULT_COLOR: Rgba<u8> = Rgba([0x00, 0xff, 0x00, 0xff]);

/// Stroke color for a detection category.
pub fn category_color(cls: &str) -> Rgba<u8> {
    match cls {
        "fire" => FIRE_COLOR,
        "smoke" => SMOKE_COLOR,
        _ => DEFAULT_COLOR,
    }
}
