use std::f64::consts::PI;

use image::Luma;
use imageproc::definitions::Image;

/// `4π·area / perimeter²`, capped at 1.
///
/// A zero perimeter counts as round.
pub fn circularity(area: f64, perimeter: f64) -> f64 {
    if perimeter <= 0.0 {
        return 1.0;
    }
    (4.0 * PI * area / (perimeter * perimeter)).min(1.0)
}

/// Perimeter of every labelled component, indexed by label.
///
/// The perimeter is the length of pixel edges a component shares with
/// anything else: another label, the background or the image border. Edges
/// around holes are included. Index 0 (background) stays `0.0`.
///
/// ```
/// use cell_counter::contours::edge_perimeters;
/// use image::{ImageBuffer, Luma};
///
/// let labels = ImageBuffer::from_fn(4, 3, |x, _| Luma([if x < 2 { 1u32 } else { 0 }]));
/// assert_eq!(edge_perimeters(&labels), vec![0.0, 10.0]);
/// ```
pub fn edge_perimeters(labels: &Image<Luma<u32>>) -> Vec<f64> {
    let max_label = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut perimeters = vec![0.0; max_label + 1];
    let (w, h) = labels.dimensions();
    let label_at = |x: i64, y: i64| {
        if x < 0 || y < 0 || x >= i64::from(w) || y >= i64::from(h) {
            0
        } else {
            labels.get_pixel(x as u32, y as u32).0[0]
        }
    };

    for (x, y, pixel) in labels.enumerate_pixels() {
        let label = pixel.0[0];
        if label == 0 {
            continue;
        }
        let (x, y) = (i64::from(x), i64::from(y));
        let open_sides = [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .into_iter()
            .filter(|&(nx, ny)| label_at(nx, ny) != label)
            .count();
        perimeters[label as usize] += open_sides as f64;
    }

    perimeters
}
