//! Detection-depth fusion and fruit size estimation
//!
//! Maps each fruit detection onto the depth field, takes the median of the
//! known samples inside its box as the fruit's distance, and converts box
//! extent plus distance into a metric diameter and spherical volume. Boxes
//! without any known depth are dropped without error.
//!
//! Without depth (single images) sizes are reported in pixels, with a
//! heuristic volume labelled as an estimate.
//!
//! # Example
//! ```no_run
//! use stereo_sizing_common::Calibration;
//! use stereo_sizing_depth::DepthField;
//! use stereo_sizing_fusion::{measure_stereo, MeasurementReport};
//! use stereo_sizing_object_detection::Detection;
//!
//! fn report(depth: &DepthField, detections: &[Detection]) -> String {
//!     let fruits = measure_stereo(detections, depth, &Calibration::default());
//!     let report = MeasurementReport::stereo(fruits, None);
//!     format!("{} fruits", report.n_fruits)
//! }
//! ```

mod fuse;
mod volume;

pub use fuse::{filter_fruit, median, median_depth, FruitDetection};
pub use volume::{
    diameter_px, estimate_2d, estimate_stereo, sphere_volume, DEFAULT_FALLBACK_VOLUME_FACTOR,
};

use serde::{Deserialize, Serialize};
use stereo_sizing_common::{Calibration, FruitClass, PixelBox};
use stereo_sizing_depth::DepthField;
use stereo_sizing_object_detection::Detection;
use tracing::debug;

/// Size of one fruit, metric with depth or pixel-only without
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeEstimate {
    Metric {
        distance_mm: f64,
        diameter_mm: f64,
        volume_mm3: f64,
    },
    PixelOnly {
        diameter_px: f64,
        /// Heuristic, not a physical volume
        volume_estimated: f64,
    },
}

/// One output record per retained fruit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FruitMeasurement {
    #[serde(rename = "className")]
    pub class_name: FruitClass,
    #[serde(flatten)]
    pub size: SizeEstimate,
    pub bbox: PixelBox,
}

/// How sizes in a report were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementMode {
    #[serde(rename = "stereo")]
    Stereo,
    #[serde(rename = "2d")]
    Flat,
}

/// Response body for one processed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub n_fruits: usize,
    pub fruits: Vec<FruitMeasurement>,
    pub mode: MeasurementMode,
    /// Stored path of the disparity visualization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disparity_image: Option<String>,
}

impl MeasurementReport {
    #[must_use]
    pub fn stereo(fruits: Vec<FruitMeasurement>, disparity_image: Option<String>) -> Self {
        Self {
            n_fruits: fruits.len(),
            fruits,
            mode: MeasurementMode::Stereo,
            disparity_image,
        }
    }

    #[must_use]
    pub fn flat(fruits: Vec<FruitMeasurement>) -> Self {
        Self {
            n_fruits: fruits.len(),
            fruits,
            mode: MeasurementMode::Flat,
            disparity_image: None,
        }
    }
}

/// Fuse detections with depth and size every fruit that has known depth
#[must_use]
pub fn measure_stereo(
    detections: &[Detection],
    depth: &DepthField,
    calibration: &Calibration,
) -> Vec<FruitMeasurement> {
    filter_fruit(detections)
        .iter()
        .filter_map(|fruit| match median_depth(depth, &fruit.bbox) {
            Some(depth_mm) => Some(estimate_stereo(fruit, depth_mm, calibration)),
            None => {
                debug!("No valid depth inside {:?}, skipping", fruit.bbox);
                None
            }
        })
        .collect()
}

/// Pixel-only sizes for every fruit detection
#[must_use]
pub fn measure_2d(detections: &[Detection], volume_factor: f64) -> Vec<FruitMeasurement> {
    filter_fruit(detections)
        .iter()
        .map(|fruit| estimate_2d(fruit, volume_factor))
        .collect()
}
