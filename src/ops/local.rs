//! Local adaptive threshold methods.
//!
//! Windows are squares of side `2 * radius + 1` clipped at the image border;
//! statistics near the border are taken over the in-bounds part only.

use image::imageops::crop_imm;
use image::{GrayImage, Luma};
use imageproc::contrast::otsu_level;
use imageproc::definitions::Image;
use imageproc::filter::median_filter;
use imageproc::integral_image::{integral_image, integral_squared_image, sum_image_pixels};
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_erode};

use crate::config::LocalMethod;
use crate::error::{Error, Result};

/// Applies `method` to every pixel.
///
/// `parameters` must hold exactly [`LocalMethod::parameter_count`] values; a
/// value of `0` selects the method's default.
pub fn threshold(
    image: &GrayImage,
    method: LocalMethod,
    radius: u32,
    parameters: &[f64],
) -> Result<GrayImage> {
    if parameters.len() != method.parameter_count() {
        return Err(Error::ParameterCount {
            method: method.to_string(),
            expected: method.parameter_count(),
            found: parameters.len(),
        });
    }
    let param = |i: usize, default: f64| match parameters.get(i) {
        Some(&v) if v != 0.0 => v,
        _ => default,
    };
    let (w, h) = image.dimensions();
    let value = |x: u32, y: u32| f64::from(image.get_pixel(x, y).0[0]);

    let mask = match method {
        LocalMethod::Bernsen => {
            let contrast_threshold = param(0, 15.0);
            let (lo, hi) = window_extremes(image, radius)?;
            pixel_mask(w, h, |x, y| {
                let (lo, hi) = (sample(&lo, x, y), sample(&hi, x, y));
                let mid = (lo + hi) / 2.0;
                if hi - lo < contrast_threshold {
                    mid >= 128.0
                } else {
                    value(x, y) >= mid
                }
            })
        }
        LocalMethod::Contrast => {
            let (lo, hi) = window_extremes(image, radius)?;
            pixel_mask(w, h, |x, y| {
                let p = value(x, y);
                sample(&hi, x, y) - p <= p - sample(&lo, x, y)
            })
        }
        LocalMethod::Mean => {
            let offset = param(0, 0.0);
            let stats = WindowStats::new(image, radius);
            pixel_mask(w, h, |x, y| value(x, y) > stats.mean(x, y) - offset)
        }
        LocalMethod::Median => {
            let offset = param(0, 0.0);
            let medians = median_filter(image, radius, radius);
            pixel_mask(w, h, |x, y| value(x, y) > sample(&medians, x, y) - offset)
        }
        LocalMethod::MidGrey => {
            let offset = param(0, 0.0);
            let (lo, hi) = window_extremes(image, radius)?;
            pixel_mask(w, h, |x, y| {
                value(x, y) > (sample(&lo, x, y) + sample(&hi, x, y)) / 2.0 - offset
            })
        }
        LocalMethod::Niblack => {
            let k = param(0, 0.2);
            let offset = param(1, 0.0);
            let stats = WindowStats::new(image, radius);
            pixel_mask(w, h, |x, y| {
                value(x, y) > stats.mean(x, y) + k * stats.std_dev(x, y) - offset
            })
        }
        LocalMethod::Otsu => {
            let (lo, hi) = window_extremes(image, radius)?;
            pixel_mask(w, h, |x, y| {
                // A uniform window has no split and counts as background.
                if lo.get_pixel(x, y) == hi.get_pixel(x, y) {
                    return false;
                }
                let (x0, x1) = window(x, radius, w);
                let (y0, y1) = window(y, radius, h);
                let level = otsu_level(&crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image());
                image.get_pixel(x, y).0[0] > level
            })
        }
        LocalMethod::Phansalkar => {
            let k = param(0, 0.25);
            let r = param(1, 0.5);
            let (p, q) = (2.0, 10.0);
            let stats = WindowStats::new(image, radius);
            pixel_mask(w, h, |x, y| {
                let mean = stats.mean(x, y) / 255.0;
                let sd = stats.std_dev(x, y) / 255.0;
                let t = mean * (1.0 + p * (-q * mean).exp() + k * (sd / r - 1.0));
                value(x, y) / 255.0 > t
            })
        }
        LocalMethod::Sauvola => {
            let k = param(0, 0.5);
            let r = param(1, 128.0);
            let stats = WindowStats::new(image, radius);
            pixel_mask(w, h, |x, y| {
                let mean = stats.mean(x, y);
                value(x, y) > mean * (1.0 + k * (stats.std_dev(x, y) / r - 1.0))
            })
        }
    };
    Ok(mask)
}

fn pixel_mask(w: u32, h: u32, is_foreground: impl Fn(u32, u32) -> bool) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| Luma([if is_foreground(x, y) { 255 } else { 0 }]))
}

fn sample(image: &GrayImage, x: u32, y: u32) -> f64 {
    f64::from(image.get_pixel(x, y).0[0])
}

/// Half-open window span around `c`, clipped to `0..len`.
fn window(c: u32, radius: u32, len: u32) -> (u32, u32) {
    (c.saturating_sub(radius), (c + radius + 1).min(len))
}

/// Per-pixel window minimum and maximum, as grey-level erosion and dilation
/// with a square mask.
fn window_extremes(image: &GrayImage, radius: u32) -> Result<(GrayImage, GrayImage)> {
    let radius = u8::try_from(radius).map_err(|_| Error::OutOfRange {
        field: "radius",
        reason: format!("{radius} px is wider than the 255 px window limit"),
    })?;
    let mask = Mask::square(radius);
    Ok((grayscale_erode(image, &mask), grayscale_dilate(image, &mask)))
}

/// Window mean and standard deviation read from integral images.
struct WindowStats {
    sums: Image<Luma<u64>>,
    squares: Image<Luma<u64>>,
    radius: u32,
}

impl WindowStats {
    fn new(image: &GrayImage, radius: u32) -> Self {
        Self {
            sums: integral_image::<_, u64>(image),
            squares: integral_squared_image::<_, u64>(image),
            radius,
        }
    }

    /// `(sum, sum of squares, count)` over the window around `(x, y)`.
    fn window(&self, x: u32, y: u32) -> (f64, f64, f64) {
        // Integral images carry one extra row and column.
        let (w, h) = (self.sums.width() - 1, self.sums.height() - 1);
        let (x0, x1) = window(x, self.radius, w);
        let (y0, y1) = window(y, self.radius, h);
        let sum = sum_image_pixels(&self.sums, x0, y0, x1 - 1, y1 - 1)[0];
        let sum_sq = sum_image_pixels(&self.squares, x0, y0, x1 - 1, y1 - 1)[0];
        let count = f64::from((x1 - x0) * (y1 - y0));
        (sum as f64, sum_sq as f64, count)
    }

    fn mean(&self, x: u32, y: u32) -> f64 {
        let (s, _, n) = self.window(x, y);
        s / n
    }

    fn std_dev(&self, x: u32, y: u32) -> f64 {
        let (s, sq, n) = self.window(x, y);
        let mean = s / n;
        (sq / n - mean * mean).max(0.0).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    /// Dark background with a bright 6x6 square, under a left-to-right ramp.
    fn spot_on_gradient() -> GrayImage {
        ImageBuffer::from_fn(40, 30, |x, y| {
            let base = 20 + x * 2;
            let spot = if (15..21).contains(&x) && (12..18).contains(&y) {
                90
            } else {
                0
            };
            Luma([(base + spot) as u8])
        })
    }

    fn fg(mask: &GrayImage, x: u32, y: u32) -> bool {
        mask.get_pixel(x, y).0[0] == 255
    }

    #[test]
    fn every_method_finds_the_spot() {
        let image = spot_on_gradient();
        for method in LocalMethod::ALL {
            let params = vec![0.0; method.parameter_count()];
            let mask = threshold(&image, method, 5, &params).unwrap();
            assert!(fg(&mask, 17, 14), "{method} missed the spot centre");
        }
    }

    #[test]
    fn mean_with_offset_rejects_flat_background() {
        let image = spot_on_gradient();
        let mask = threshold(&image, LocalMethod::Mean, 5, &[-5.0]).unwrap();
        assert!(fg(&mask, 17, 14));
        assert!(!fg(&mask, 5, 3));
        assert!(!fg(&mask, 35, 25));
    }

    #[test]
    fn bernsen_low_contrast_uses_mid_grey() {
        let dark = GrayImage::from_pixel(10, 10, Luma([40]));
        let bright = GrayImage::from_pixel(10, 10, Luma([200]));
        let dark_mask = threshold(&dark, LocalMethod::Bernsen, 2, &[0.0]).unwrap();
        let bright_mask = threshold(&bright, LocalMethod::Bernsen, 2, &[0.0]).unwrap();
        assert!(dark_mask.pixels().all(|p| p.0[0] == 0));
        assert!(bright_mask.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let image = spot_on_gradient();
        assert!(matches!(
            threshold(&image, LocalMethod::Sauvola, 3, &[0.5]),
            Err(Error::ParameterCount {
                expected: 2,
                found: 1,
                ..
            })
        ));
        assert!(threshold(&image, LocalMethod::Otsu, 3, &[1.0]).is_err());
    }

    #[test]
    fn windows_wider_than_the_mask_limit_are_rejected() {
        let image = GrayImage::new(4, 4);
        assert!(matches!(
            threshold(&image, LocalMethod::MidGrey, 300, &[0.0]),
            Err(Error::OutOfRange { field: "radius", .. })
        ));
        assert!(threshold(&image, LocalMethod::Mean, 300, &[0.0]).is_ok());
    }

    #[test]
    fn window_extremes_are_clipped_at_the_border() {
        let image: GrayImage = ImageBuffer::from_fn(5, 5, |x, y| Luma([(x + 10 * y) as u8]));
        let (lo, hi) = window_extremes(&image, 1).unwrap();
        assert_eq!((lo.get_pixel(0, 0).0[0], hi.get_pixel(0, 0).0[0]), (0, 11));
        assert_eq!((lo.get_pixel(2, 2).0[0], hi.get_pixel(2, 2).0[0]), (11, 33));
    }

    #[test]
    fn local_otsu_leaves_uniform_windows_empty() {
        let mut image = GrayImage::from_pixel(30, 30, Luma([70]));
        image.put_pixel(3, 3, Luma([200]));
        let mask = threshold(&image, LocalMethod::Otsu, 2, &[]).unwrap();
        assert!(fg(&mask, 3, 3));
        assert!(!fg(&mask, 4, 4));
        assert!(!fg(&mask, 20, 20));
    }

    #[test]
    fn window_stats_match_direct_computation() {
        let image: GrayImage = ImageBuffer::from_fn(6, 5, |x, y| Luma([(x * 10 + y) as u8]));
        let stats = WindowStats::new(&image, 1);
        // Interior pixel (2, 2): columns 1..=3, rows 1..=3.
        let values: Vec<f64> = (1..4)
            .flat_map(|y| (1..4).map(move |x| f64::from((x * 10 + y) as u8)))
            .collect();
        let mean = values.iter().sum::<f64>() / 9.0;
        assert!((stats.mean(2, 2) - mean).abs() < 1e-9);
        // Corner window is clipped to 2x2.
        let corner = (0.0 + 1.0 + 10.0 + 11.0) / 4.0;
        assert!((stats.mean(0, 0) - corner).abs() < 1e-9);
    }
}
