//! Saved region sets, the reference input of cross-channel association.

use serde::{Deserialize, Serialize};

use crate::association::sort_by_top;
use crate::calibration::Calibration;
use crate::error::{Error, Result};
use crate::raster::Raster;
use crate::segmentation::Region;

/// Regions of one analysed channel together with the frame they live in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSet {
    pub width: u32,
    pub height: u32,
    pub calibration: Calibration,
    pub regions: Vec<Region>,
}

impl RegionSet {
    pub fn new(width: u32, height: u32, calibration: Calibration, regions: Vec<Region>) -> Self {
        Self {
            width,
            height,
            calibration,
            regions,
        }
    }

    /// Reads a set written by [`RegionSet::to_json_string`]. A stored
    /// calibration that is not usable is rejected with [`Error::OutOfRange`].
    pub fn from_json_str(json: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(json)?;
        set.calibration.validate()?;
        Ok(set)
    }

    /// Serialises to JSON. Every `f64` is written with enough digits to read
    /// back bit for bit.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Fails unless the set was recorded on a frame of the same size and
    /// calibration as `raster`.
    pub fn check_compatible(&self, raster: &Raster) -> Result<()> {
        self.calibration.validate()?;
        if (self.width, self.height) != (raster.width(), raster.height()) {
            return Err(Error::CoordinateMismatch(format!(
                "reference is {}x{} px, image is {}x{} px",
                self.width,
                self.height,
                raster.width(),
                raster.height()
            )));
        }
        if !self.calibration.is_compatible(raster.calibration()) {
            return Err(Error::CoordinateMismatch(format!(
                "reference pixel is {}x{} {}, image pixel is {}x{} {}",
                self.calibration.pixel_width,
                self.calibration.pixel_height,
                self.calibration.unit,
                raster.calibration().pixel_width,
                raster.calibration().pixel_height,
                raster.calibration().unit
            )));
        }
        Ok(())
    }

    /// The regions ordered by the top of their bounding boxes.
    pub fn sorted_by_top(&self) -> Vec<Region> {
        let mut regions = self.regions.clone();
        sort_by_top(&mut regions);
        regions
    }
}
