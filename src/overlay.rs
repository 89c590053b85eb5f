//! Preview rendering of a pass.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;

use crate::aggregate::{ContainmentRoi, RoiShape};
use crate::colors::outline_colors;
use crate::pipeline::Outcome;
use crate::raster::{Plane, to_gray8};
use crate::segmentation::Region;

pub const KEPT: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const DUPLICATE: Rgba<u8> = Rgba([255, 255, 0, 255]);

/// Draws the regions of `outcome` over the 8-bit rendition of `plane`.
///
/// Kept regions are filled red, duplicates yellow. Each containment ROI is
/// outlined in its own colour. Regions known only by their bounds are
/// outlined instead of filled.
pub fn render(plane: &Plane, outcome: &Outcome, rois: &[ContainmentRoi]) -> RgbaImage {
    let gray = to_gray8(plane);
    let mut canvas = RgbaImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Rgba([v, v, v, 255])
    });

    for (region, &duplicate) in outcome.regions.iter().zip(&outcome.duplicates) {
        let color = if duplicate { DUPLICATE } else { KEPT };
        fill_region(&mut canvas, region, color);
    }

    for (roi, color) in rois.iter().zip(outline_colors(rois.len())) {
        outline(&mut canvas, roi, color);
    }
    canvas
}

fn fill_region(canvas: &mut RgbaImage, region: &Region, color: Rgba<u8>) {
    if region.runs.is_empty() {
        let b = region.bounds;
        let corners = [
            (b.left, b.top),
            (b.right - 1.0, b.top),
            (b.right - 1.0, b.bottom - 1.0),
            (b.left, b.bottom - 1.0),
        ];
        draw_closed(canvas, &corners, color);
        return;
    }
    for run in &region.runs {
        if run.y >= canvas.height() {
            continue;
        }
        for x in run.x_start..run.x_end.min(canvas.width()) {
            canvas.put_pixel(x, run.y, color);
        }
    }
}

fn outline(canvas: &mut RgbaImage, roi: &ContainmentRoi, color: Rgba<u8>) {
    match &roi.shape {
        RoiShape::Rectangle(b) => {
            let corners = [
                (b.left, b.top),
                (b.right, b.top),
                (b.right, b.bottom),
                (b.left, b.bottom),
            ];
            draw_closed(canvas, &corners, color);
        }
        RoiShape::Polygon(vertices) => {
            let points: Vec<(f64, f64)> = vertices.iter().map(|p| (p.x, p.y)).collect();
            draw_closed(canvas, &points, color);
        }
    }
}

fn draw_closed(canvas: &mut RgbaImage, points: &[(f64, f64)], color: Rgba<u8>) {
    for (a, b) in points.iter().zip(points.iter().cycle().skip(1)) {
        draw_line_segment_mut(
            canvas,
            (a.0 as f32, a.1 as f32),
            (b.0 as f32, b.1 as f32),
            color,
        );
    }
}
