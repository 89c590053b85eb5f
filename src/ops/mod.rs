//! Pixel level primitives the detection pipeline is built on.
//!
//! The pipeline only talks to these through [`PixelOps`], so a different
//! backend (a GPU implementation, a wrapper around another imaging library)
//! can be swapped in without touching the strategy or association logic.
//! [`ImageprocOps`] is the default backend built on [`imageproc`].

pub mod global;
pub mod local;

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::filter::{gaussian_blur_f32, median_filter};
use imageproc::stats::histogram;
use log::warn;

use crate::config::{Bounds, GlobalMethod, LocalMethod};
use crate::error::Result;
use crate::raster::{Plane, exact_gray8, from_gray8, min_max, to_gray8};
use crate::segmentation::{Region, extract_particles};

/// Contract of the pixel level collaborators.
///
/// Every method is deterministic. Masks are 8-bit images holding `255` for
/// foreground and `0` for background.
pub trait PixelOps {
    /// Gaussian low-pass with `sigma` in pixels. `sigma` is always positive.
    fn blur(&self, plane: &Plane, sigma: f32) -> Plane;

    /// Median filter with a window radius in pixels.
    fn median_filter(&self, plane: &Plane, radius: f32) -> Plane;

    /// Global histogram threshold; foreground is every sample above the level.
    fn global_threshold(
        &self,
        image: &GrayImage,
        method: GlobalMethod,
        ignore_black: bool,
        ignore_white: bool,
    ) -> Result<GrayImage>;

    /// Local adaptive threshold over a `(2 * radius + 1)²` window.
    fn local_threshold(
        &self,
        image: &GrayImage,
        method: LocalMethod,
        radius: u32,
        parameters: &[f64],
    ) -> Result<GrayImage>;

    /// Connected particles of `mask` filtered by pixel area and circularity,
    /// in scan order.
    fn segment_particles(&self, mask: &GrayImage, area: Bounds, circularity: Bounds) -> Vec<Region>;
}

/// [`PixelOps`] backed by `imageproc`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageprocOps;

impl PixelOps for ImageprocOps {
    fn blur(&self, plane: &Plane, sigma: f32) -> Plane {
        gaussian_blur_f32(plane, sigma)
    }

    fn median_filter(&self, plane: &Plane, radius: f32) -> Plane {
        let r = radius.round() as u32;
        if r == 0 {
            return plane.clone();
        }
        // imageproc's median works on 8-bit data only.
        if let Some(gray) = exact_gray8(plane) {
            return from_gray8(&median_filter(&gray, r, r));
        }
        let (lo, hi) = min_max(plane);
        let step = (hi - lo) / 256.0;
        let filtered = median_filter(&to_gray8(plane), r, r);
        ImageBuffer::from_fn(plane.width(), plane.height(), |x, y| {
            Luma([lo + f32::from(filtered.get_pixel(x, y).0[0]) * step])
        })
    }

    fn global_threshold(
        &self,
        image: &GrayImage,
        method: GlobalMethod,
        ignore_black: bool,
        ignore_white: bool,
    ) -> Result<GrayImage> {
        let mut hist = [0u64; 256];
        for (bin, &count) in hist.iter_mut().zip(histogram(image).channels[0].iter()) {
            *bin = u64::from(count);
        }
        let level = if method == GlobalMethod::Otsu && !ignore_black && !ignore_white {
            // A single populated bin has no split.
            let populated = hist.iter().filter(|&&c| c > 0).count();
            (populated > 1).then(|| otsu_level(image))
        } else {
            if ignore_black {
                hist[0] = 0;
            }
            if ignore_white {
                hist[255] = 0;
            }
            global::level(method, &hist)?
        };
        match level {
            Some(level) => Ok(binarize(image, |v| v > level)),
            None => {
                warn!("{method} found no threshold level, mask is empty");
                Ok(GrayImage::new(image.width(), image.height()))
            }
        }
    }

    fn local_threshold(
        &self,
        image: &GrayImage,
        method: LocalMethod,
        radius: u32,
        parameters: &[f64],
    ) -> Result<GrayImage> {
        local::threshold(image, method, radius, parameters)
    }

    fn segment_particles(&self, mask: &GrayImage, area: Bounds, circularity: Bounds) -> Vec<Region> {
        extract_particles(mask, area, circularity)
    }
}

/// Maps every sample through `is_foreground` into a `0`/`255` mask.
pub(crate) fn binarize(image: &GrayImage, is_foreground: impl Fn(u8) -> bool) -> GrayImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([if is_foreground(image.get_pixel(x, y).0[0]) {
            255
        } else {
            0
        }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn two_level() -> GrayImage {
        ImageBuffer::from_fn(20, 10, |x, _| Luma([if x < 10 { 30 } else { 200 }]))
    }

    #[test]
    fn global_threshold_splits_two_levels() {
        let mask = ImageprocOps
            .global_threshold(&two_level(), GlobalMethod::Otsu, false, false)
            .unwrap();
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(19, 9).0[0], 255);
    }

    #[test]
    fn unsupported_global_method_is_reported() {
        assert!(matches!(
            ImageprocOps.global_threshold(&two_level(), GlobalMethod::Huang, false, false),
            Err(Error::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn ignoring_every_populated_bin_yields_empty_mask() {
        let image: GrayImage =
            ImageBuffer::from_fn(4, 4, |x, _| Luma([if x < 2 { 0 } else { 255 }]));
        let mask = ImageprocOps
            .global_threshold(&image, GlobalMethod::Otsu, true, true)
            .unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn median_filter_removes_salt() {
        let mut plane = Plane::from_pixel(9, 9, Luma([10.0]));
        plane.put_pixel(4, 4, Luma([1000.0]));
        plane.put_pixel(0, 0, Luma([0.0]));
        let filtered = ImageprocOps.median_filter(&plane, 1.0);
        let centre = filtered.get_pixel(4, 4).0[0];
        let neighbour = filtered.get_pixel(3, 4).0[0];
        assert_eq!(centre, neighbour);
    }

    #[test]
    fn median_filter_keeps_wide_range() {
        let mut plane = Plane::from_pixel(9, 9, Luma([1000.0]));
        plane.put_pixel(0, 0, Luma([5000.0]));
        plane.put_pixel(8, 8, Luma([-200.0]));
        let filtered = ImageprocOps.median_filter(&plane, 1.0);
        let centre = filtered.get_pixel(4, 4).0[0];
        assert!((centre - 1000.0).abs() < 5200.0 / 256.0, "{centre}");
    }

    #[test]
    fn otsu_agrees_with_and_without_ignored_bins() {
        let image: GrayImage = ImageBuffer::from_fn(30, 10, |x, _| Luma([40 + (x as u8 / 10) * 60]));
        let plain = ImageprocOps
            .global_threshold(&image, GlobalMethod::Otsu, false, false)
            .unwrap();
        let ignoring = ImageprocOps
            .global_threshold(&image, GlobalMethod::Otsu, true, true)
            .unwrap();
        assert_eq!(plain, ignoring);

        let flat = GrayImage::from_pixel(5, 5, Luma([90]));
        let mask = ImageprocOps
            .global_threshold(&flat, GlobalMethod::Otsu, false, false)
            .unwrap();
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn blur_preserves_flat_plane() {
        let plane = Plane::from_pixel(12, 12, Luma([5.0]));
        let blurred = ImageprocOps.blur(&plane, 2.0);
        assert!(blurred.pixels().all(|p| (p.0[0] - 5.0).abs() < 1e-3));
    }
}
