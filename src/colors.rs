use image::Rgba;
use palette::{FromColor, Hsl, Srgb};

/// First hue of the outline palette (green).
const FIRST_HUE: f32 = 120.0;
/// Hue range shared by the outlines, stopping short of the red and yellow
/// used for region fills.
const HUE_SPAN: f32 = 180.0;

/// Generates `n` distinct opaque outline colours between green and magenta.
pub(crate) fn outline_colors(n: usize) -> Vec<Rgba<u8>> {
    (0..n)
        .map(|i| {
            let hue = FIRST_HUE + HUE_SPAN * i as f32 / n as f32;
            let rgb: Srgb<u8> = Srgb::from_color(Hsl::new(hue, 0.9, 0.5)).into_format();
            Rgba([rgb.red, rgb.green, rgb.blue, 255])
        })
        .collect()
}
