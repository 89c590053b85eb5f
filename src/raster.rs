//! Calibrated multi-plane rasters and the plane level arithmetic used while
//! building threshold masks.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::definitions::Image;
use log::warn;

use crate::calibration::Calibration;
use crate::error::{Error, Result};

/// A single grayscale plane with floating point samples.
pub type Plane = Image<Luma<f32>>;

/// Nominal sample range of a raster's planes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SampleDepth {
    /// Samples are whole numbers in `0..=255` and map onto 8 bits unchanged.
    Eight,
    /// Any other range; stretched from its own minimum and maximum onto 8 bits.
    #[default]
    Wide,
}

/// A stack of equally sized planes (channels, slices or frames, flattened)
/// sharing one calibration.
#[derive(Debug, Clone)]
pub struct Raster {
    planes: Vec<Plane>,
    depth: SampleDepth,
    calibration: Calibration,
}

impl Raster {
    /// Builds a [`SampleDepth::Wide`] raster from planes that must all share
    /// the same dimensions.
    ///
    /// Returns [`Error::EmptyInput`] when there is no plane or the planes have
    /// no pixels, and [`Error::OutOfRange`] for an unusable calibration.
    pub fn new(planes: Vec<Plane>, calibration: Calibration) -> Result<Self> {
        Self::with_depth(planes, SampleDepth::Wide, calibration)
    }

    pub fn with_depth(planes: Vec<Plane>, depth: SampleDepth, calibration: Calibration) -> Result<Self> {
        calibration.validate()?;
        let Some(first) = planes.first() else {
            return Err(Error::EmptyInput("raster has no plane"));
        };
        if first.width() == 0 || first.height() == 0 {
            return Err(Error::EmptyInput("raster has no pixel"));
        }
        let dims = first.dimensions();
        if let Some(index) = planes.iter().position(|p| p.dimensions() != dims) {
            return Err(Error::OutOfRange {
                field: "planes",
                reason: format!(
                    "plane {index} is {:?}, expected {dims:?}",
                    planes[index].dimensions()
                ),
            });
        }
        Ok(Self {
            planes,
            depth,
            calibration,
        })
    }

    /// Single plane raster from a decoded image (converted to luminance).
    ///
    /// 8-bit images keep their sample values; deeper images are read as
    /// floating point and become [`SampleDepth::Wide`].
    pub fn from_image(image: &DynamicImage, calibration: Calibration) -> Result<Self> {
        Self::from_images(std::slice::from_ref(image), calibration)
    }

    /// Multi plane raster, one plane per decoded image. The raster is 8-bit
    /// only when every image is.
    pub fn from_images(images: &[DynamicImage], calibration: Calibration) -> Result<Self> {
        let eight_bit = images.iter().all(|i| {
            let color = i.color();
            color.bytes_per_pixel() == color.channel_count()
        });
        if eight_bit {
            let planes = images.iter().map(|i| from_gray8(&i.to_luma8())).collect();
            Self::with_depth(planes, SampleDepth::Eight, calibration)
        } else {
            let planes = images.iter().map(|i| i.to_luma32f()).collect();
            Self::with_depth(planes, SampleDepth::Wide, calibration)
        }
    }

    pub fn width(&self) -> u32 {
        self.planes[0].width()
    }

    pub fn height(&self) -> u32 {
        self.planes[0].height()
    }

    pub fn depth(&self) -> SampleDepth {
        self.depth
    }

    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn plane(&self, index: usize) -> Result<&Plane> {
        self.planes.get(index).ok_or(Error::NoSuchPlane {
            index,
            count: self.planes.len(),
        })
    }
}

/// Minimum and maximum sample of a plane. `(0, 0)` for an empty plane.
pub fn min_max(plane: &Plane) -> (f32, f32) {
    let mut pixels = plane.pixels().map(|p| p.0[0]);
    let Some(first) = pixels.next() else {
        return (0.0, 0.0);
    };
    pixels.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Turns a bright background dark: `255 - v` for 8-bit samples, a mirror
/// around the plane's own range otherwise.
pub fn invert(plane: &Plane, depth: SampleDepth) -> Plane {
    let pivot = match depth {
        SampleDepth::Eight => 255.0,
        SampleDepth::Wide => {
            let (lo, hi) = min_max(plane);
            hi + lo
        }
    };
    ImageBuffer::from_fn(plane.width(), plane.height(), |x, y| {
        Luma([pivot - plane.get_pixel(x, y).0[0]])
    })
}

/// `a - b`, clamped at zero like an integer image subtraction.
pub fn subtract_clamped(a: &Plane, b: &Plane) -> Plane {
    ImageBuffer::from_fn(a.width(), a.height(), |x, y| {
        Luma([(a.get_pixel(x, y).0[0] - b.get_pixel(x, y).0[0]).max(0.0)])
    })
}

/// Stretches the plane's own range onto `0..=255`.
///
/// A flat plane has no contrast to stretch and maps to all zeros.
pub fn to_gray8(plane: &Plane) -> GrayImage {
    let (lo, hi) = min_max(plane);
    let span = hi - lo;
    if span <= f32::EPSILON {
        warn!("flat plane ({lo}), 8-bit conversion yields an empty image");
        return GrayImage::new(plane.width(), plane.height());
    }
    let scale = 256.0 / span;
    ImageBuffer::from_fn(plane.width(), plane.height(), |x, y| {
        let v = (plane.get_pixel(x, y).0[0] - lo) * scale;
        Luma([v.clamp(0.0, 255.0) as u8])
    })
}

/// Converts to 8 bits for thresholding.
///
/// 8-bit samples are rounded and clamped but keep their values, so the black
/// and white histogram bins still mean absolute 0 and 255. Wide samples are
/// stretched with [`to_gray8`].
pub fn quantize(plane: &Plane, depth: SampleDepth) -> GrayImage {
    match depth {
        SampleDepth::Eight => ImageBuffer::from_fn(plane.width(), plane.height(), |x, y| {
            Luma([plane.get_pixel(x, y).0[0].round().clamp(0.0, 255.0) as u8])
        }),
        SampleDepth::Wide => to_gray8(plane),
    }
}

/// The plane as an 8-bit image when every sample already is a whole number
/// in `0..=255`.
pub fn exact_gray8(plane: &Plane) -> Option<GrayImage> {
    let fits = plane
        .pixels()
        .all(|p| (0.0..=255.0).contains(&p.0[0]) && p.0[0].fract() == 0.0);
    fits.then(|| quantize(plane, SampleDepth::Eight))
}

/// Lifts an 8-bit image back into a floating point plane.
pub fn from_gray8(image: &GrayImage) -> Plane {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([f32::from(image.get_pixel(x, y).0[0])])
    })
}
