//! Composition of the three threshold strategies into one binary mask.

use image::{GrayImage, ImageBuffer, Luma};
use log::debug;

use crate::calibration::Calibration;
use crate::config::{DualBandThreshold, GlobalMethod, ThresholdConfig};
use crate::error::Result;
use crate::ops::PixelOps;
use crate::raster::{Plane, SampleDepth, from_gray8, quantize, subtract_clamped};

/// Inner method of both dual-band passes.
const DUAL_BAND_METHOD: GlobalMethod = GlobalMethod::Li;
/// Method applied to the un-blurred plane that is OR-ed into the dual-band mask.
const DUAL_BAND_BASE_METHOD: GlobalMethod = GlobalMethod::Otsu;

/// Turns `plane` into a `0`/`255` foreground mask according to `config`.
///
/// Gaussian sigmas are given in calibrated units and converted with the pixel
/// width of `calibration`. `depth` decides how the filtered plane is brought
/// to 8 bits (see [`quantize`]). The configuration is validated before any
/// pixel is touched.
pub fn apply<O: PixelOps + ?Sized>(
    ops: &O,
    plane: &Plane,
    depth: SampleDepth,
    calibration: &Calibration,
    config: &ThresholdConfig,
) -> Result<GrayImage> {
    config.validate()?;
    debug!("thresholding with {config}");

    match config {
        ThresholdConfig::Global(g) => {
            let prepared = prepare(ops, plane, depth, calibration, g.sigma, g.median_radius);
            ops.global_threshold(&prepared, g.method, g.ignore_black, g.ignore_white)
        }
        ThresholdConfig::Local(l) => {
            let prepared = prepare(ops, plane, depth, calibration, l.sigma, l.median_radius);
            let radius = l.radius.round() as u32;
            ops.local_threshold(&prepared, l.method, radius, &l.parameters)
        }
        ThresholdConfig::DualBand(d) => dual_band(ops, plane, depth, calibration, d),
    }
}

/// High-pass, median and 8-bit conversion shared by every strategy.
fn prepare<O: PixelOps + ?Sized>(
    ops: &O,
    plane: &Plane,
    depth: SampleDepth,
    calibration: &Calibration,
    sigma: f64,
    median_radius: f64,
) -> GrayImage {
    let mut work = high_pass(ops, plane, calibration, sigma);
    if median_radius > 0.0 {
        if depth == SampleDepth::Eight {
            // 8-bit data stays on whole sample values between filters.
            work = from_gray8(&quantize(&work, depth));
        }
        work = ops.median_filter(&work, median_radius as f32);
    }
    quantize(&work, depth)
}

fn high_pass<O: PixelOps + ?Sized>(
    ops: &O,
    plane: &Plane,
    calibration: &Calibration,
    sigma: f64,
) -> Plane {
    if sigma <= 0.0 {
        return plane.clone();
    }
    let sigma_px = calibration.length_to_pixels(sigma) as f32;
    let background = ops.blur(plane, sigma_px);
    subtract_clamped(plane, &background)
}

fn dual_band<O: PixelOps + ?Sized>(
    ops: &O,
    plane: &Plane,
    depth: SampleDepth,
    calibration: &Calibration,
    config: &DualBandThreshold,
) -> Result<GrayImage> {
    let band = |sigma: f64| {
        let filtered = quantize(&high_pass(ops, plane, calibration, sigma), depth);
        ops.global_threshold(&filtered, DUAL_BAND_METHOD, false, false)
    };
    let low = band(config.low_sigma)?;
    let high = band(config.high_sigma)?;
    let base = ops.global_threshold(&quantize(plane, depth), DUAL_BAND_BASE_METHOD, true, true)?;

    Ok(ImageBuffer::from_fn(plane.width(), plane.height(), |x, y| {
        let both_bands = low.get_pixel(x, y).0[0] > 0 && high.get_pixel(x, y).0[0] > 0;
        let base_set = base.get_pixel(x, y).0[0] > 0;
        Luma([if both_bands || base_set { 255 } else { 0 }])
    }))
}
