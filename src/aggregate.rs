//! Per-ROI counting of the final regions.

use imageproc::point::Point;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::rect::{BoundingBox, bounding_box_of};
use crate::segmentation::Region;

/// Name of the implicit ROI covering the whole image.
pub const WHOLE_IMAGE: &str = "Image";

/// Outline of a containment ROI in pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum RoiShape {
    Rectangle(BoundingBox),
    /// Closed polygon; the last vertex connects back to the first.
    Polygon(Vec<Point<f64>>),
}

/// A user drawn shape used only for counting.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainmentRoi {
    pub name: String,
    pub shape: RoiShape,
}

impl ContainmentRoi {
    pub fn rectangle(name: impl Into<String>, bounds: BoundingBox) -> Self {
        Self {
            name: name.into(),
            shape: RoiShape::Rectangle(bounds),
        }
    }

    pub fn polygon(name: impl Into<String>, vertices: Vec<Point<f64>>) -> Self {
        Self {
            name: name.into(),
            shape: RoiShape::Polygon(vertices),
        }
    }

    /// An ROI covering a whole `width` x `height` image.
    pub fn whole_image(width: u32, height: u32) -> Self {
        Self::rectangle(
            WHOLE_IMAGE,
            BoundingBox::at(0.0, 0.0, f64::from(width), f64::from(height)),
        )
    }

    /// Whether the pixel holding `(x, y)` lies inside the ROI.
    ///
    /// The coordinates are truncated to their pixel and that pixel's centre
    /// is tested, so a region counts where its centroid pixel is.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (px, py) = (x.floor() + 0.5, y.floor() + 0.5);
        match &self.shape {
            RoiShape::Rectangle(bounds) => bounds.contains(px, py),
            RoiShape::Polygon(vertices) => polygon_contains(vertices, px, py),
        }
    }

    /// Enclosed area in pixels.
    pub fn pixel_area(&self) -> f64 {
        match &self.shape {
            RoiShape::Rectangle(bounds) => bounds.area(),
            RoiShape::Polygon(vertices) => polygon_area(vertices),
        }
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        match &self.shape {
            RoiShape::Rectangle(bounds) => Some(*bounds),
            RoiShape::Polygon(vertices) => bounding_box_of(vertices),
        }
    }
}

/// Count of regions inside one containment ROI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiCount {
    pub name: String,
    pub count: usize,
    /// ROI area in pixels.
    pub pixel_area: f64,
    /// ROI area in calibrated units².
    pub area: f64,
}

/// Counts the non-duplicate regions whose centroid lies in each ROI.
///
/// `duplicates` runs parallel to `regions`; a missing flag means "not a
/// duplicate". Overlapping ROIs count a shared region once each. Without any
/// ROI the whole `width` x `height` image is counted as a single ROI.
pub fn count_per_roi(
    regions: &[Region],
    duplicates: &[bool],
    rois: &[ContainmentRoi],
    width: u32,
    height: u32,
    calibration: &Calibration,
) -> Vec<RoiCount> {
    let whole;
    let rois = if rois.is_empty() {
        whole = [ContainmentRoi::whole_image(width, height)];
        &whole[..]
    } else {
        rois
    };

    rois.iter()
        .map(|roi| {
            let count = regions
                .iter()
                .enumerate()
                .filter(|(i, _)| !duplicates.get(*i).copied().unwrap_or(false))
                .filter(|(_, r)| roi.contains(r.x, r.y))
                .count();
            let pixel_area = roi.pixel_area();
            debug!("{}: {count} region(s)", roi.name);
            RoiCount {
                name: roi.name.clone(),
                count,
                pixel_area,
                area: calibration.area_to_physical(pixel_area),
            }
        })
        .collect()
}

/// Even-odd rule ray casting towards `+x`.
fn polygon_contains(vertices: &[Point<f64>], x: f64, y: f64) -> bool {
    let mut inside = false;
    let Some(mut prev) = vertices.last() else {
        return false;
    };
    for v in vertices {
        if (v.y > y) != (prev.y > y) {
            let crossing = v.x + (y - v.y) * (prev.x - v.x) / (prev.y - v.y);
            if x < crossing {
                inside = !inside;
            }
        }
        prev = v;
    }
    inside
}

/// Shoelace formula; orientation independent.
fn polygon_area(vertices: &[Point<f64>]) -> f64 {
    vertices
        .iter()
        .zip(vertices.iter().cycle().skip(1))
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum::<f64>()
        .abs()
        / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64, y: f64) -> Region {
        let mut r = Region::rectangle(0, 0, 1, 1).unwrap();
        r.x = x;
        r.y = y;
        r
    }

    fn triangle() -> ContainmentRoi {
        ContainmentRoi::polygon(
            "triangle",
            vec![Point::new(0.0, 0.0), Point::new(20.0, 0.0), Point::new(0.0, 20.0)],
        )
    }

    #[test]
    fn polygon_containment_uses_the_centroid_pixel() {
        let roi = triangle();
        assert!(roi.contains(2.0, 2.0));
        assert!(!roi.contains(15.0, 15.0));
        assert!(!roi.contains(-1.0, 5.0));

        // Pixel 9 has its centre at 9.5.
        let wide = ContainmentRoi::polygon(
            "wide",
            vec![Point::new(0.0, 0.0), Point::new(9.8, 0.0), Point::new(9.8, 20.0), Point::new(0.0, 20.0)],
        );
        assert!(wide.contains(9.9, 5.0));
        let narrow = ContainmentRoi::polygon(
            "narrow",
            vec![Point::new(0.0, 0.0), Point::new(9.3, 0.0), Point::new(9.3, 20.0), Point::new(0.0, 20.0)],
        );
        assert!(!narrow.contains(9.2, 5.0));
    }

    #[test]
    fn polygon_area_and_bounds() {
        let roi = triangle();
        assert_eq!(roi.pixel_area(), 200.0);
        assert_eq!(roi.bounds(), Some(BoundingBox::new(0.0, 0.0, 20.0, 20.0)));
        assert_eq!(ContainmentRoi::polygon("empty", vec![]).pixel_area(), 0.0);
        assert!(!ContainmentRoi::polygon("empty", vec![]).contains(0.0, 0.0));
    }

    #[test]
    fn counts_skip_duplicates() {
        let regions = [at(5.0, 5.0), at(6.0, 5.0), at(50.0, 50.0)];
        let rois = [ContainmentRoi::rectangle("left", BoundingBox::at(0.0, 0.0, 10.0, 10.0))];
        let counts = count_per_roi(&regions, &[false, true, false], &rois, 100, 100, &Calibration::default());
        assert_eq!(counts[0].count, 1);
    }

    #[test]
    fn no_roi_means_whole_image() {
        let regions = [at(5.0, 5.0), at(99.5, 99.5), at(50.0, 50.0)];
        let calibration = Calibration::new(2.0, 2.0, "µm");
        let counts = count_per_roi(&regions, &[], &[], 100, 100, &calibration);
        assert_eq!(
            counts,
            vec![RoiCount {
                name: WHOLE_IMAGE.to_string(),
                count: 3,
                pixel_area: 10_000.0,
                area: 40_000.0,
            }]
        );
    }

    #[test]
    fn overlapping_rois_count_shared_regions_twice() {
        let regions = [at(5.0, 5.0)];
        let rois = [
            ContainmentRoi::rectangle("a", BoundingBox::at(0.0, 0.0, 10.0, 10.0)),
            ContainmentRoi::rectangle("b", BoundingBox::at(2.0, 2.0, 10.0, 10.0)),
            ContainmentRoi::rectangle("c", BoundingBox::at(20.0, 20.0, 10.0, 10.0)),
        ];
        let counts: Vec<usize> = count_per_roi(&regions, &[false], &rois, 40, 40, &Calibration::default())
            .into_iter()
            .map(|c| c.count)
            .collect();
        assert_eq!(counts, vec![1, 1, 0]);
    }
}
