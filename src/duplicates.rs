//! Suppression of spatially coincident detections.
//!
//! Over-segmentation tends to split one cell into several nearby particles.
//! Within any pair closer than the minimal distance only the larger one is
//! kept; the other is flagged as a duplicate.

use log::debug;

use crate::error::{Error, Result};
use crate::segmentation::Region;

/// Flags duplicates among `regions`, which must be sorted by centroid `y`.
///
/// For each region the sweep only visits later regions whose `y` lies within
/// `distance`, so the cost grows with local density rather than with the
/// square of the region count. Of a close pair the smaller region is flagged;
/// on equal areas the later one is. Flags are independent: a region that is
/// already a duplicate still flags its own smaller neighbours.
///
/// A `distance` of zero or less disables suppression.
pub fn suppress(regions: &[Region], distance: f64) -> Result<Vec<bool>> {
    if let Some(index) = regions.windows(2).position(|w| w[1].y < w[0].y) {
        return Err(Error::Unsorted {
            what: "regions",
            key: "centroid y",
            index: index + 1,
        });
    }

    let mut duplicate = vec![false; regions.len()];
    if !(distance > 0.0) {
        return Ok(duplicate);
    }

    for (i, a) in regions.iter().enumerate() {
        for (offset, b) in regions[i + 1..].iter().enumerate() {
            if b.y - a.y > distance {
                break;
            }
            let dx = b.x - a.x;
            if dx.abs() > distance || dx.hypot(b.y - a.y) > distance {
                continue;
            }
            let j = i + 1 + offset;
            if a.area >= b.area {
                duplicate[j] = true;
            } else {
                duplicate[i] = true;
            }
        }
    }

    debug!(
        "{} of {} region(s) flagged as duplicates",
        duplicate.iter().filter(|&&d| d).count(),
        regions.len()
    );
    Ok(duplicate)
}

/// [`suppress`] for regions in any order, typically scan order.
///
/// The flags are returned in the order of `regions`.
pub fn suppress_any_order(regions: &[Region], distance: f64) -> Vec<bool> {
    let mut order: Vec<usize> = (0..regions.len()).collect();
    order.sort_by(|&a, &b| regions[a].y.total_cmp(&regions[b].y));
    let sorted: Vec<Region> = order.iter().map(|&i| regions[i].clone()).collect();

    let mut flags = vec![false; regions.len()];
    // Sorting above makes the only failure mode of `suppress` unreachable.
    if let Ok(sorted_flags) = suppress(&sorted, distance) {
        for (&original, flag) in order.iter().zip(sorted_flags) {
            flags[original] = flag;
        }
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rect::BoundingBox;

    fn region(x: f64, y: f64, area: f64) -> Region {
        Region {
            x,
            y,
            area,
            bounds: BoundingBox::new(x - 1.0, y - 1.0, x + 1.0, y + 1.0),
            circularity: 1.0,
            runs: Vec::new(),
        }
    }

    #[test]
    fn smaller_of_close_pair_is_flagged() {
        let regions = [region(10.0, 10.0, 20.0), region(12.0, 11.0, 30.0)];
        assert_eq!(suppress(&regions, 5.0).unwrap(), vec![true, false]);

        let regions = [region(10.0, 10.0, 30.0), region(12.0, 11.0, 20.0)];
        assert_eq!(suppress(&regions, 5.0).unwrap(), vec![false, true]);
    }

    #[test]
    fn equal_areas_flag_the_later_region() {
        let regions = [region(10.0, 10.0, 25.0), region(10.0, 12.0, 25.0)];
        assert_eq!(suppress(&regions, 10.0).unwrap(), vec![false, true]);
    }

    #[test]
    fn zero_or_negative_distance_disables_suppression() {
        let regions = [region(10.0, 10.0, 25.0), region(10.0, 10.0, 25.0)];
        assert_eq!(suppress(&regions, 0.0).unwrap(), vec![false, false]);
        assert_eq!(suppress(&regions, -3.0).unwrap(), vec![false, false]);
    }

    #[test]
    fn distance_is_euclidean_and_inclusive() {
        // dx = 3, dy = 4: exactly 5 apart.
        let regions = [region(0.0, 0.0, 10.0), region(3.0, 4.0, 5.0)];
        assert_eq!(suppress(&regions, 5.0).unwrap(), vec![false, true]);
        assert_eq!(suppress(&regions, 4.9).unwrap(), vec![false, false]);

        // Within the box but not within the circle.
        let regions = [region(0.0, 0.0, 10.0), region(4.0, 4.0, 5.0)];
        assert_eq!(suppress(&regions, 5.0).unwrap(), vec![false, false]);
    }

    #[test]
    fn flags_are_not_resolved_transitively() {
        // a < b < c along a line; b is flagged by c and still flags a.
        let regions = [
            region(0.0, 0.0, 10.0),
            region(0.0, 4.0, 20.0),
            region(0.0, 8.0, 30.0),
        ];
        assert_eq!(suppress(&regions, 5.0).unwrap(), vec![true, true, false]);
    }

    #[test]
    fn sweep_reaches_past_far_x_neighbours() {
        let regions = [
            region(0.0, 0.0, 10.0),
            region(100.0, 1.0, 50.0),
            region(2.0, 2.0, 20.0),
        ];
        assert_eq!(suppress(&regions, 5.0).unwrap(), vec![true, false, false]);
    }

    #[test]
    fn unsorted_input_is_rejected() {
        let regions = [region(0.0, 10.0, 10.0), region(0.0, 5.0, 10.0)];
        assert!(matches!(
            suppress(&regions, 5.0),
            Err(Error::Unsorted { index: 1, .. })
        ));
    }

    #[test]
    fn any_order_maps_flags_back() {
        let regions = [region(50.0, 30.0, 40.0), region(10.0, 10.0, 5.0), region(11.0, 12.0, 9.0)];
        assert_eq!(suppress_any_order(&regions, 4.0), vec![false, true, false]);
    }

    #[test]
    fn at_most_one_of_each_close_pair_and_always_the_smaller() {
        // Deterministic scatter with distinct areas.
        let mut regions: Vec<Region> = (0..60)
            .map(|i| {
                let t = i as f64;
                region((t * 7.3) % 40.0, (t * 3.1) % 50.0, 10.0 + (t * 13.7) % 97.0 + t * 1e-3)
            })
            .collect();
        regions.sort_by(|a, b| a.y.total_cmp(&b.y));
        let d = 6.0;
        let flags = suppress(&regions, d).unwrap();

        for i in 0..regions.len() {
            for j in i + 1..regions.len() {
                let (a, b) = (&regions[i], &regions[j]);
                if (b.x - a.x).hypot(b.y - a.y) > d {
                    continue;
                }
                let smaller = if a.area >= b.area { j } else { i };
                assert!(flags[smaller], "pair ({i}, {j}) left its smaller region unflagged");
            }
        }
    }
}
