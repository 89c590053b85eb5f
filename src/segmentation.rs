//! Detected regions and particle extraction from a binary mask.

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::config::Bounds;
use crate::contours::{circularity, edge_perimeters};
use crate::rect::BoundingBox;

/// A horizontal span of pixels `[x_start, x_end)` on row `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub y: u32,
    pub x_start: u32,
    pub x_end: u32,
}

impl Run {
    pub fn len(&self) -> u32 {
        self.x_end.saturating_sub(self.x_start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn overlap(&self, other: &Run) -> u32 {
        if self.y != other.y {
            return 0;
        }
        self.x_end
            .min(other.x_end)
            .saturating_sub(self.x_start.max(other.x_start))
    }
}

/// A detected object.
///
/// Coordinates are in pixels. `area` is the pixel count; convert it with
/// [`crate::calibration::Calibration::area_to_physical`] for user facing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Centroid x, measured from the left edge of the image.
    pub x: f64,
    /// Centroid y, measured from the top edge of the image.
    pub y: f64,
    pub area: f64,
    pub bounds: BoundingBox,
    #[serde(default = "default_circularity")]
    pub circularity: f64,
    /// Row runs sorted by `(y, x_start)`. An empty list means the region is
    /// known only by its bounds.
    #[serde(default)]
    pub runs: Vec<Run>,
}

fn default_circularity() -> f64 {
    1.0
}

impl Region {
    /// Builds a region from its row runs. Returns `None` when the runs cover
    /// no pixel.
    pub fn from_runs(mut runs: Vec<Run>) -> Option<Region> {
        runs.retain(|r| !r.is_empty());
        runs.sort_unstable_by_key(|r| (r.y, r.x_start));
        let first = runs.first()?;

        let mut area = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        let mut bounds = BoundingBox::new(
            f64::from(first.x_start),
            f64::from(first.y),
            f64::from(first.x_end),
            f64::from(first.y) + 1.0,
        );
        for run in &runs {
            let n = f64::from(run.len());
            area += n;
            // Sum of pixel centres x + 0.5 over the run.
            sum_x += n * (f64::from(run.x_start) + f64::from(run.x_end)) / 2.0;
            sum_y += n * (f64::from(run.y) + 0.5);
            bounds.left = bounds.left.min(f64::from(run.x_start));
            bounds.right = bounds.right.max(f64::from(run.x_end));
            bounds.bottom = bounds.bottom.max(f64::from(run.y) + 1.0);
        }

        Some(Region {
            x: sum_x / area,
            y: sum_y / area,
            area,
            bounds,
            circularity: 1.0,
            runs,
        })
    }

    /// A solid `width` x `height` rectangle with its top-left pixel at `(left, top)`.
    pub fn rectangle(left: u32, top: u32, width: u32, height: u32) -> Option<Region> {
        let runs = (top..top + height)
            .map(|y| Run {
                y,
                x_start: left,
                x_end: left + width,
            })
            .collect();
        Region::from_runs(runs)
    }

    /// Number of pixels shared with `other`.
    ///
    /// Exact when both regions carry runs; otherwise the bounding boxes stand
    /// in for the missing shape.
    pub fn intersection_area(&self, other: &Region) -> f64 {
        if self.runs.is_empty() || other.runs.is_empty() {
            return self.bounds.intersection_area(&other.bounds);
        }
        let mut shared = 0u64;
        for run in &self.runs {
            let start = other.runs.partition_point(|o| o.y < run.y);
            shared += other.runs[start..]
                .iter()
                .take_while(|o| o.y == run.y)
                .map(|o| u64::from(run.overlap(o)))
                .sum::<u64>();
        }
        shared as f64
    }

    /// Position of the region's first pixel in raster scan order.
    fn scan_key(&self) -> (f64, f64) {
        match self.runs.first() {
            Some(r) => (f64::from(r.y), f64::from(r.x_start)),
            None => (self.bounds.top, self.bounds.left),
        }
    }
}

/// Extracts the 8-connected particles of `mask` whose pixel area lies in
/// `area` and whose circularity lies in `circularity`.
///
/// Regions come back in scan order: top to bottom, then left to right by the
/// first pixel of each particle.
pub fn extract_particles(mask: &GrayImage, area: Bounds, circularity_range: Bounds) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let label_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    if label_count == 0 {
        return Vec::new();
    }

    let mut runs: Vec<Vec<Run>> = vec![Vec::new(); label_count + 1];
    for y in 0..labels.height() {
        let mut x = 0;
        while x < labels.width() {
            let label = labels.get_pixel(x, y).0[0];
            let start = x;
            while x < labels.width() && labels.get_pixel(x, y).0[0] == label {
                x += 1;
            }
            if label != 0 {
                runs[label as usize].push(Run {
                    y,
                    x_start: start,
                    x_end: x,
                });
            }
        }
    }

    let perimeters = edge_perimeters(&labels);

    let mut regions: Vec<Region> = runs
        .into_iter()
        .enumerate()
        .skip(1)
        .filter_map(|(label, runs)| {
            let mut region = Region::from_runs(runs)?;
            region.circularity = circularity(region.area, perimeters[label]);
            Some(region)
        })
        .filter(|r| area.contains(r.area) && circularity_range.contains(r.circularity))
        .collect();

    regions.sort_by(|a, b| {
        let (ay, ax) = a.scan_key();
        let (by, bx) = b.scan_key();
        ay.total_cmp(&by).then(ax.total_cmp(&bx))
    });
    regions
}
