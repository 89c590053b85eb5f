//! Cell detection and counting on calibrated microscopy images, built on [imageproc].
//!
//! A pass thresholds one plane of a [`Raster`] into a mask, extracts particles
//! from it, then either suppresses near duplicates or, given a reference
//! [`RegionSet`] of nuclei, associates every cell with the nuclei it contains
//! and splits or discards it. The final regions are counted per containment
//! ROI.
//!
//! The modules follow the stages of a pass as closely as possible.

pub mod aggregate;
pub mod association;
pub mod calibration;
mod colors;
pub mod config;
pub mod contours;
pub mod duplicates;
pub mod error;
pub mod ops;
pub mod overlay;
pub mod pipeline;
pub mod raster;
pub mod rect;
pub mod region_set;
pub mod segmentation;
pub mod threshold;

pub use calibration::Calibration;
pub use config::{CounterConfig, ThresholdConfig};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Outcome, Session, process};
pub use raster::Raster;
pub use region_set::RegionSet;
pub use segmentation::Region;
