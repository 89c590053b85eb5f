//! One processing pass from raster to per-ROI counts, and the session that
//! keeps the state between passes.

use image::GrayImage;
use log::{debug, info};

use crate::aggregate::{ContainmentRoi, RoiCount, count_per_roi};
use crate::association::{AssociationOutcome, associate};
use crate::config::{Background, Bounds, CounterConfig};
use crate::duplicates::suppress_any_order;
use crate::error::{Error, Result};
use crate::ops::{ImageprocOps, PixelOps};
use crate::raster::{Raster, invert};
use crate::region_set::RegionSet;
use crate::segmentation::Region;
use crate::threshold;

/// Everything a pass produces.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Foreground mask the regions were extracted from.
    pub mask: GrayImage,
    /// Final regions: the segmented particles in scan order, or the kept and
    /// split cells when associating.
    pub regions: Vec<Region>,
    /// Parallel to `regions`. Always all `false` when associating.
    pub duplicates: Vec<bool>,
    pub association: Option<AssociationOutcome>,
    pub counts: Vec<RoiCount>,
    /// Parameter summary of the threshold strategy used.
    pub summary: String,
}

impl Outcome {
    /// Regions that are not flagged as duplicates.
    pub fn kept(&self) -> impl Iterator<Item = &Region> {
        self.regions
            .iter()
            .zip(&self.duplicates)
            .filter(|(_, dup)| !**dup)
            .map(|(r, _)| r)
    }

    pub fn kept_count(&self) -> usize {
        self.kept().count()
    }
}

/// Runs one full pass over `raster`.
///
/// `reference` is required when `config.cross_channel` is set and must be
/// recorded on a frame matching the raster; both are checked before any
/// pixel is processed. Duplicate suppression and association are exclusive:
/// with association active the minimal distance is ignored.
///
/// Nothing is returned on failure; there is no partial outcome.
pub fn process<O: PixelOps + ?Sized>(
    ops: &O,
    raster: &Raster,
    config: &CounterConfig,
    rois: &[ContainmentRoi],
    reference: Option<&RegionSet>,
) -> Result<Outcome> {
    config.validate()?;
    let reference = if config.cross_channel {
        let set = reference.ok_or(Error::MissingReference)?;
        set.check_compatible(raster)?;
        Some(set)
    } else {
        None
    };

    let calibration = raster.calibration();
    let source = raster.plane(config.plane)?;
    let inverted;
    let plane = match config.background {
        Background::Dark => source,
        Background::White => {
            inverted = invert(source, raster.depth());
            &inverted
        }
    };

    let mask = threshold::apply(ops, plane, raster.depth(), calibration, &config.threshold)?;

    // Merged clusters must survive segmentation to be split by association.
    let area_px = Bounds::new(
        calibration.area_to_pixels(config.cell_area.min),
        if reference.is_some() {
            None
        } else {
            config.cell_area.max.map(|max| calibration.area_to_pixels(max))
        },
    );
    let particles = ops.segment_particles(&mask, area_px, config.circularity);
    debug!("{} particle(s) segmented", particles.len());

    let (regions, duplicates, association) = match reference {
        Some(set) => {
            let outcome = associate(&particles, &set.sorted_by_top(), calibration, config.cell_area)?;
            let regions = outcome.regions.clone();
            let duplicates = vec![false; regions.len()];
            (regions, duplicates, Some(outcome))
        }
        None => {
            let distance = calibration.length_to_pixels(config.min_distance);
            let duplicates = suppress_any_order(&particles, distance);
            (particles, duplicates, None)
        }
    };

    let counts = count_per_roi(
        &regions,
        &duplicates,
        rois,
        raster.width(),
        raster.height(),
        calibration,
    );
    let outcome = Outcome {
        mask,
        regions,
        duplicates,
        association,
        counts,
        summary: config.threshold.to_string(),
    };
    if outcome.regions.is_empty() {
        info!("no object detected");
    } else {
        info!("{} object(s) detected", outcome.kept_count());
    }
    Ok(outcome)
}

/// Caller owned state between passes: the pixel backend, the current image,
/// configuration, containment ROIs, the optional reference set and the last
/// successful outcome.
#[derive(Debug)]
pub struct Session<O = ImageprocOps> {
    ops: O,
    raster: Option<Raster>,
    config: CounterConfig,
    rois: Vec<ContainmentRoi>,
    reference: Option<RegionSet>,
    last: Option<Outcome>,
}

impl Session<ImageprocOps> {
    pub fn new(config: CounterConfig) -> Self {
        Self::with_ops(ImageprocOps, config)
    }
}

impl<O: PixelOps> Session<O> {
    pub fn with_ops(ops: O, config: CounterConfig) -> Self {
        Self {
            ops,
            raster: None,
            config,
            rois: Vec::new(),
            reference: None,
            last: None,
        }
    }

    /// Replaces the image; the previous outcome no longer describes it.
    pub fn set_raster(&mut self, raster: Raster) {
        self.raster = Some(raster);
        self.last = None;
    }

    pub fn raster(&self) -> Option<&Raster> {
        self.raster.as_ref()
    }

    /// Replaces the configuration if it is valid; an invalid one leaves the
    /// session untouched.
    pub fn set_config(&mut self, config: CounterConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    pub fn set_rois(&mut self, rois: Vec<ContainmentRoi>) {
        self.rois = rois;
    }

    pub fn rois(&self) -> &[ContainmentRoi] {
        &self.rois
    }

    pub fn set_reference(&mut self, reference: RegionSet) {
        self.reference = Some(reference);
    }

    pub fn clear_reference(&mut self) {
        self.reference = None;
    }

    /// Runs a pass with the current state.
    ///
    /// The last outcome is only replaced when the pass succeeds.
    pub fn process(&mut self) -> Result<&Outcome> {
        let raster = self
            .raster
            .as_ref()
            .ok_or(Error::EmptyInput("no image loaded"))?;
        let outcome = process(
            &self.ops,
            raster,
            &self.config,
            &self.rois,
            self.reference.as_ref(),
        )?;
        Ok(&*self.last.insert(outcome))
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last.as_ref()
    }

    /// Kept regions of the last pass, ready to be the reference of a pass on
    /// another channel.
    pub fn save_regions(&self) -> Option<RegionSet> {
        let raster = self.raster.as_ref()?;
        let outcome = self.last.as_ref()?;
        Some(RegionSet::new(
            raster.width(),
            raster.height(),
            raster.calibration().clone(),
            outcome.kept().cloned().collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Calibration;
    use crate::config::{GlobalMethod, GlobalThreshold, ThresholdConfig};
    use crate::error::ErrorKind;
    use crate::raster::Plane;
    use crate::rect::BoundingBox;
    use image::{ImageBuffer, Luma};

    fn plane_with(squares: &[(u32, u32, u32)], background: f32, object: f32) -> Plane {
        ImageBuffer::from_fn(64, 64, |x, y| {
            let inside = squares
                .iter()
                .any(|&(sx, sy, s)| x >= sx && x < sx + s && y >= sy && y < sy + s);
            Luma([if inside { object } else { background }])
        })
    }

    fn plain_otsu() -> CounterConfig {
        CounterConfig {
            threshold: ThresholdConfig::Global(GlobalThreshold {
                method: GlobalMethod::Otsu,
                sigma: 0.0,
                median_radius: 0.0,
                ignore_black: false,
                ignore_white: false,
            }),
            cell_area: Bounds::new(1.0, Some(500.0)),
            ..CounterConfig::default()
        }
    }

    fn raster(plane: Plane) -> Raster {
        Raster::new(vec![plane], Calibration::default()).unwrap()
    }

    #[test]
    fn separated_objects_are_all_kept() {
        let raster = raster(plane_with(&[(5, 5, 6), (40, 8, 5), (20, 40, 7)], 10.0, 200.0));
        let outcome = process(&ImageprocOps, &raster, &plain_otsu(), &[], None).unwrap();
        assert_eq!(outcome.regions.len(), 3);
        assert_eq!(outcome.kept_count(), 3);
        assert_eq!(outcome.counts[0].count, 3);
        assert!(outcome.association.is_none());
        assert!(outcome.summary.ends_with("AutoThMethod:Otsu"));
    }

    #[test]
    fn white_background_is_inverted() {
        let raster = raster(plane_with(&[(5, 5, 6), (40, 8, 5)], 220.0, 20.0));
        let config = CounterConfig {
            background: Background::White,
            ..plain_otsu()
        };
        let outcome = process(&ImageprocOps, &raster, &config, &[], None).unwrap();
        assert_eq!(outcome.regions.len(), 2);
        assert_eq!(outcome.regions[0].area, 36.0);
    }

    #[test]
    fn close_objects_keep_the_larger() {
        // 6x6 and 4x4 squares with 2 px between them.
        let raster = raster(plane_with(&[(10, 10, 6), (18, 11, 4)], 10.0, 200.0));
        let outcome = process(&ImageprocOps, &raster, &plain_otsu(), &[], None).unwrap();
        assert_eq!(outcome.regions.len(), 2);
        assert_eq!(outcome.kept_count(), 1);
        assert_eq!(outcome.kept().next().map(|r| r.area), Some(36.0));
    }

    #[test]
    fn distance_is_in_calibrated_units() {
        // Centres 8 px apart; 10 µm at 2 µm per pixel is only 5 px.
        let plane = plane_with(&[(10, 10, 4), (18, 10, 4)], 10.0, 200.0);
        let raster = Raster::new(vec![plane], Calibration::new(2.0, 2.0, "µm")).unwrap();
        let config = CounterConfig {
            cell_area: Bounds::new(1.0, Some(1000.0)),
            ..plain_otsu()
        };
        let outcome = process(&ImageprocOps, &raster, &config, &[], None).unwrap();
        assert_eq!(outcome.kept_count(), 2);
    }

    #[test]
    fn cross_channel_without_reference_fails_first() {
        let raster = raster(plane_with(&[(5, 5, 6)], 10.0, 200.0));
        let config = CounterConfig {
            cross_channel: true,
            ..plain_otsu()
        };
        let err = process(&ImageprocOps, &raster, &config, &[], None).unwrap_err();
        assert!(matches!(err, Error::MissingReference));

        let elsewhere = RegionSet::new(32, 32, Calibration::default(), vec![]);
        let err = process(&ImageprocOps, &raster, &config, &[], Some(&elsewhere)).unwrap_err();
        assert!(matches!(err, Error::CoordinateMismatch(_)));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn cross_channel_disables_duplicate_suppression() {
        // Two close cells that suppression alone would merge into one count.
        let raster = raster(plane_with(&[(10, 10, 6), (18, 11, 6)], 10.0, 200.0));
        let nuclei = vec![
            Region::rectangle(11, 11, 3, 3).unwrap(),
            Region::rectangle(19, 12, 3, 3).unwrap(),
        ];
        let reference = RegionSet::new(64, 64, Calibration::default(), nuclei);
        let config = CounterConfig {
            cross_channel: true,
            min_distance: 50.0,
            ..plain_otsu()
        };
        let outcome = process(&ImageprocOps, &raster, &config, &[], Some(&reference)).unwrap();
        assert_eq!(outcome.kept_count(), 2);
        assert!(outcome.duplicates.iter().all(|d| !d));
        assert!(outcome.association.is_some());
    }

    #[test]
    fn no_objects_is_not_an_error() {
        let raster = raster(Plane::from_pixel(16, 16, Luma([7.0])));
        let outcome = process(&ImageprocOps, &raster, &plain_otsu(), &[], None).unwrap();
        assert!(outcome.regions.is_empty());
        assert_eq!(outcome.counts[0].count, 0);
    }

    #[test]
    fn missing_plane_is_reported() {
        let raster = raster(plane_with(&[], 10.0, 200.0));
        let config = CounterConfig {
            plane: 2,
            ..plain_otsu()
        };
        assert!(matches!(
            process(&ImageprocOps, &raster, &config, &[], None),
            Err(Error::NoSuchPlane { index: 2, count: 1 })
        ));
    }

    #[test]
    fn counts_follow_rois() {
        let raster = raster(plane_with(&[(5, 5, 6), (40, 8, 5), (20, 40, 7)], 10.0, 200.0));
        let rois = [
            ContainmentRoi::rectangle("top", BoundingBox::at(0.0, 0.0, 64.0, 32.0)),
            ContainmentRoi::rectangle("bottom", BoundingBox::at(0.0, 32.0, 64.0, 32.0)),
        ];
        let outcome = process(&ImageprocOps, &raster, &plain_otsu(), &rois, None).unwrap();
        let counts: Vec<(&str, usize)> = outcome
            .counts
            .iter()
            .map(|c| (c.name.as_str(), c.count))
            .collect();
        assert_eq!(counts, vec![("top", 2), ("bottom", 1)]);
    }

    #[test]
    fn session_keeps_last_successful_outcome() {
        let mut session = Session::new(plain_otsu());
        assert!(session.process().unwrap_err().is_informational());

        session.set_raster(raster(plane_with(&[(5, 5, 6), (40, 8, 5)], 10.0, 200.0)));
        assert_eq!(session.process().unwrap().kept_count(), 2);

        let mut cross = plain_otsu();
        cross.cross_channel = true;
        session.set_config(cross).unwrap();
        assert!(session.process().is_err());
        assert_eq!(session.last_outcome().map(Outcome::kept_count), Some(2));

        let mut invalid = plain_otsu();
        invalid.min_distance = -1.0;
        assert!(session.set_config(invalid).is_err());
        assert!(session.config().cross_channel);
    }

    #[test]
    fn saved_regions_become_the_next_reference() {
        let mut session = Session::new(plain_otsu());
        session.set_raster(raster(plane_with(&[(10, 10, 6), (30, 30, 5)], 10.0, 200.0)));
        session.process().unwrap();
        let saved = session.save_regions().unwrap();
        assert_eq!(saved.regions.len(), 2);

        let round_trip = RegionSet::from_json_str(&saved.to_json_string().unwrap()).unwrap();
        let mut cross = plain_otsu();
        cross.cross_channel = true;
        session.set_config(cross).unwrap();
        session.set_reference(round_trip);
        let outcome = session.process().unwrap();
        // Every cell contains itself as its nucleus.
        assert_eq!(outcome.kept_count(), 2);
        assert!(
            outcome
                .association
                .as_ref()
                .is_some_and(|a| a.associations.iter().all(|a| a.count == 1))
        );
    }
}
