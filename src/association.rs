//! Cross-channel association of cells with reference nuclei.
//!
//! Every primary region is scored by the number of reference regions it
//! contains, where a reference counts as contained when at least half of its
//! own area lies inside the primary region. The score is then reconciled with
//! the configured cell area range to keep, split or discard the region.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::config::Bounds;
use crate::error::{Error, Result};
use crate::segmentation::Region;

/// Minimum share of a reference region's area that must lie inside a primary
/// region for the reference to count as contained.
pub const CONTAINMENT_RATIO: f64 = 0.5;

/// Contained references of one primary region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub count: usize,
    /// Centroids of the contained references in encounter order.
    pub nuclei: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DiscardReason {
    NoNucleus,
    /// Even split across its nuclei each cell would exceed the maximum area.
    TooLarge { mean_area: f64 },
}

/// What happens to one primary region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Decision {
    Discarded(DiscardReason),
    /// The region stands for `copies` cells (at least 1).
    Kept { copies: usize },
}

impl Decision {
    pub fn copies(&self) -> usize {
        match self {
            Decision::Discarded(_) => 0,
            Decision::Kept { copies } => *copies,
        }
    }
}

/// Result of [`associate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationOutcome {
    /// One entry per primary region, in input order.
    pub associations: Vec<Association>,
    /// One entry per primary region, in input order.
    pub decisions: Vec<Decision>,
    /// Kept regions and their copies in canonical order.
    pub regions: Vec<Region>,
    /// Index of the primary region each entry of `regions` came from.
    pub sources: Vec<usize>,
}

/// Counts the references majority-contained in each primary region.
///
/// Both lists must be sorted by the top of their bounding boxes. A single
/// cursor into `reference` only moves forward across successive primary
/// regions: references ending above the current primary region are never
/// looked at again.
pub fn count_nuclei(primary: &[Region], reference: &[Region]) -> Result<Vec<Association>> {
    ensure_sorted_by_top("primary regions", primary)?;
    ensure_sorted_by_top("reference regions", reference)?;

    let mut search_start = 0;
    let mut associations = Vec::with_capacity(primary.len());
    for cell in primary {
        while search_start < reference.len()
            && reference[search_start].bounds.bottom < cell.bounds.top
        {
            search_start += 1;
        }

        let mut association = Association::default();
        for nucleus in reference[search_start..]
            .iter()
            .take_while(|n| n.bounds.top < cell.bounds.bottom)
        {
            if !nucleus.bounds.overlaps_x(&cell.bounds) || !(nucleus.area > 0.0) {
                continue;
            }
            let shared = cell.intersection_area(nucleus);
            if shared / nucleus.area >= CONTAINMENT_RATIO {
                association.count += 1;
                association.nuclei.push((nucleus.x, nucleus.y));
            }
        }
        associations.push(association);
    }
    Ok(associations)
}

/// Reconciles a nucleus count with the allowed cell area.
///
/// `area` and `cell_area` are in the same (physical) unit. A region without
/// nuclei is discarded. Otherwise the mean area per nucleus decides: above
/// the maximum the region is discarded; below the minimum it is split by area
/// into `floor(area / min)` cells; in range it becomes one cell per nucleus.
///
/// The area based split below the minimum ignores the nucleus count on
/// purpose. Existing result sets were produced with this rule.
pub fn decide(association: &Association, area: f64, cell_area: Bounds) -> Decision {
    if association.count == 0 {
        return Decision::Discarded(DiscardReason::NoNucleus);
    }
    let mean_area = area / association.count as f64;
    if mean_area > cell_area.upper() {
        return Decision::Discarded(DiscardReason::TooLarge { mean_area });
    }
    let extra = if mean_area < cell_area.min {
        let by_area = (area / cell_area.min).floor() - 1.0;
        if by_area < 0.0 {
            warn!("region of area {area} is below the minimum {}, kept once", cell_area.min);
            0
        } else {
            by_area as usize
        }
    } else {
        association.count - 1
    };
    Decision::Kept { copies: extra + 1 }
}

/// Scores, decides and replicates `primary` against `reference`.
///
/// `cell_area` is in calibrated units² and compared against each region's
/// pixel area converted with `calibration`.
pub fn associate(
    primary: &[Region],
    reference: &[Region],
    calibration: &Calibration,
    cell_area: Bounds,
) -> Result<AssociationOutcome> {
    let associations = count_nuclei(primary, reference)?;

    let decisions: Vec<Decision> = primary
        .iter()
        .zip(&associations)
        .map(|(region, a)| decide(a, calibration.area_to_physical(region.area), cell_area))
        .collect();

    let mut kept: Vec<(usize, Region)> = primary
        .iter()
        .zip(&decisions)
        .enumerate()
        .flat_map(|(i, (region, decision))| {
            std::iter::repeat_n((i, region.clone()), decision.copies())
        })
        .collect();
    kept.sort_by(|(_, a), (_, b)| {
        let (ax, ay) = a.bounds.center();
        let (bx, by) = b.bounds.center();
        ay.total_cmp(&by).then(ax.total_cmp(&bx))
    });

    debug!(
        "{} primary region(s) against {} reference(s): {} discarded, {} kept after splitting",
        primary.len(),
        reference.len(),
        decisions.iter().filter(|d| d.copies() == 0).count(),
        kept.len()
    );

    let (sources, regions) = kept.into_iter().unzip();
    Ok(AssociationOutcome {
        associations,
        decisions,
        regions,
        sources,
    })
}

/// Sorts regions by the top of their bounding boxes, the order
/// [`count_nuclei`] expects. The sort is stable.
pub fn sort_by_top(regions: &mut [Region]) {
    regions.sort_by(|a, b| a.bounds.top.total_cmp(&b.bounds.top));
}

fn ensure_sorted_by_top(what: &'static str, regions: &[Region]) -> Result<()> {
    match regions
        .windows(2)
        .position(|w| w[1].bounds.top < w[0].bounds.top)
    {
        Some(index) => Err(Error::Unsorted {
            what,
            key: "bounding box top",
            index: index + 1,
        }),
        None => Ok(()),
    }
}
