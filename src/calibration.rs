use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Physical size of one pixel.
///
/// Region coordinates are always kept in pixel units; the calibration is only
/// consulted when a value crosses the boundary to user facing physical units
/// (areas, blur sigmas, distances).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub unit: String,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pixel_width: 1.0,
            pixel_height: 1.0,
            unit: "px".to_string(),
        }
    }
}

impl Calibration {
    /// Builds a calibration, normalising the unit name.
    ///
    /// Blank and `pixel(s)` units become `px`, `micron(s)` becomes `µm`.
    pub fn new(pixel_width: f64, pixel_height: f64, unit: &str) -> Self {
        Self {
            pixel_width,
            pixel_height,
            unit: normalize_unit(unit),
        }
    }

    /// Fails with [`Error::OutOfRange`] unless both pixel sizes are finite and
    /// positive.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("pixel_width", self.pixel_width), ("pixel_height", self.pixel_height)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::OutOfRange {
                    field,
                    reason: format!("must be a finite positive size, got {value}"),
                });
            }
        }
        Ok(())
    }

    /// Area covered by a single pixel, in `unit²`.
    pub fn pixel_area(&self) -> f64 {
        self.pixel_width * self.pixel_height
    }

    pub fn area_to_physical(&self, pixels: f64) -> f64 {
        pixels * self.pixel_area()
    }

    pub fn area_to_pixels(&self, physical: f64) -> f64 {
        physical / self.pixel_area()
    }

    /// Converts a horizontal length in `unit` to pixels.
    pub fn length_to_pixels(&self, physical: f64) -> f64 {
        physical / self.pixel_width
    }

    /// Two calibrations describe the same grid when their pixel sizes agree to
    /// within a relative 1e-9 and their units match.
    pub fn is_compatible(&self, other: &Calibration) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0);
        close(self.pixel_width, other.pixel_width)
            && close(self.pixel_height, other.pixel_height)
            && self.unit == other.unit
    }
}

fn normalize_unit(unit: &str) -> String {
    match unit.trim() {
        "" | "pixel" | "pixels" => "px".to_string(),
        "micron" | "microns" | "um" => "\u{b5}m".to_string(),
        other => other.to_string(),
    }
}
