//! Metric depth from stereo disparity
//!
//! Inverts a disparity field through the rig's similar-triangles relation
//! `depth_mm = focal_px * baseline_mm / disparity_px`. Pixels without a
//! positive disparity have unknown depth, stored as NaN rather than zero so
//! that downstream statistics can skip them.
//!
//! The crate also renders a disparity field as an 8-bit image for
//! inspection.
//!
//! # Example
//! ```no_run
//! use stereo_sizing_common::Calibration;
//! use stereo_sizing_depth::depth_from_disparity;
//! use stereo_sizing_disparity::DisparityField;
//!
//! # fn main() -> anyhow::Result<()> {
//! let disparity = DisparityField::filled(1740, 1080, 20.0);
//! let depth = depth_from_disparity(&disparity, &Calibration::default());
//! if let Some(stats) = depth.stats() {
//!     println!("depth range: {:.1}..{:.1} mm", stats.min_mm, stats.max_mm);
//! }
//! # Ok(())
//! # }
//! ```

use image::{GrayImage, ImageFormat, Luma};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use stereo_sizing_common::{Calibration, ProcessingError};
use stereo_sizing_disparity::{is_valid_disparity, DisparityField};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while exporting depth artifacts
#[derive(Error, Debug)]
pub enum DepthError {
    #[error("Image encoding error: {0}")]
    ImageError(String),
}

impl From<DepthError> for ProcessingError {
    fn from(err: DepthError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Depth in millimeters for one disparity sample, NaN when not invertible
#[must_use]
#[inline]
pub fn depth_at(disparity: f32, calibration: &Calibration) -> f32 {
    if is_valid_disparity(disparity) {
        (calibration.depth_numerator() / f64::from(disparity)) as f32
    } else {
        f32::NAN
    }
}

/// Summary of the known samples of a depth field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthStats {
    pub min_mm: f32,
    pub max_mm: f32,
    pub mean_mm: f32,
    /// Number of non-NaN samples
    pub known: usize,
}

/// Per-pixel depth of the reference view in millimeters, indexed `[row, col]`
#[derive(Debug, Clone, PartialEq)]
pub struct DepthField {
    values: Array2<f32>,
}

impl DepthField {
    #[must_use]
    pub fn from_array(values: Array2<f32>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    /// Depth at `(x, y)`; `Some(NaN)` for unknown samples inside the field
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.values.get((y, x)).copied()
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f32> {
        &self.values
    }

    #[must_use]
    pub fn known_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Min, max and mean over known samples; `None` if every sample is unknown
    #[must_use]
    pub fn stats(&self) -> Option<DepthStats> {
        let mut known = 0usize;
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0f64;
        for &v in self.values.iter().filter(|v| !v.is_nan()) {
            known += 1;
            min = min.min(v);
            max = max.max(v);
            sum += f64::from(v);
        }
        (known > 0).then(|| DepthStats {
            min_mm: min,
            max_mm: max,
            mean_mm: (sum / known as f64) as f32,
            known,
        })
    }
}

/// Convert a disparity field to depth, element by element
///
/// No clamping is applied: very small disparities give very large depths.
#[must_use]
pub fn depth_from_disparity(disparity: &DisparityField, calibration: &Calibration) -> DepthField {
    let values = disparity.as_array().mapv(|d| depth_at(d, calibration));
    let field = DepthField::from_array(values);
    debug!(
        "Depth field {}x{}: {} known samples",
        field.width(),
        field.height(),
        field.known_count()
    );
    field
}

/// Render valid disparities as grayscale, near objects bright
///
/// Valid samples are stretched over 1..=255 between the smallest and largest
/// valid disparity; invalid samples are black.
#[must_use]
pub fn render_disparity(disparity: &DisparityField) -> GrayImage {
    let (w, h) = (disparity.width() as u32, disparity.height() as u32);
    let mut image = GrayImage::new(w, h);
    let Some((lo, hi)) = disparity.valid_range() else {
        return image;
    };

    let range = hi - lo;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        if let Some(d) = disparity.valid(x as usize, y as usize) {
            let level = if range > 1e-6 {
                1.0 + (d - lo) / range * 254.0
            } else {
                // Constant disparity, use mid-gray
                128.0
            };
            *pixel = Luma([level.round() as u8]);
        }
    }
    image
}

/// Encode a grayscale image as PNG bytes
pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, DepthError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| DepthError::ImageError(e.to_string()))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calibration() -> Calibration {
        Calibration::new(783.0, 55.0)
    }

    #[test]
    fn test_depth_formula() {
        let cal = calibration();
        assert_eq!(depth_at(20.0, &cal), 2153.25);
        assert!((depth_at(7.5, &cal) - 5742.0).abs() < 1e-3);
    }

    #[test]
    fn test_non_positive_disparity_is_unknown() {
        let cal = calibration();
        assert!(depth_at(0.0, &cal).is_nan());
        assert!(depth_at(-1.0, &cal).is_nan());
        assert!(depth_at(f32::NAN, &cal).is_nan());
        assert!(depth_at(f32::INFINITY, &cal).is_nan());
    }

    #[test]
    fn test_field_conversion_is_elementwise() {
        let mut values = Array2::from_elem((2, 3), -1.0f32);
        values[[0, 0]] = 20.0;
        values[[1, 2]] = 40.0;
        values[[1, 1]] = 0.0;
        let depth = depth_from_disparity(&DisparityField::from_array(values), &calibration());

        assert_eq!((depth.width(), depth.height()), (3, 2));
        assert_eq!(depth.get(0, 0), Some(2153.25));
        assert_eq!(depth.get(2, 1), Some(1076.625));
        assert!(depth.get(1, 1).is_some_and(f32::is_nan));
        assert!(depth.get(1, 0).is_some_and(f32::is_nan));
        assert_eq!(depth.get(3, 0), None);
        assert_eq!(depth.known_count(), 2);
    }

    #[test]
    fn test_stats_skip_unknown() {
        let mut values = Array2::from_elem((1, 4), f32::NAN);
        values[[0, 1]] = 1000.0;
        values[[0, 3]] = 3000.0;
        let stats = DepthField::from_array(values).stats().unwrap();
        assert_eq!(stats.min_mm, 1000.0);
        assert_eq!(stats.max_mm, 3000.0);
        assert_eq!(stats.mean_mm, 2000.0);
        assert_eq!(stats.known, 2);

        let empty = DepthField::from_array(Array2::from_elem((2, 2), f32::NAN));
        assert!(empty.stats().is_none());
    }

    #[test]
    fn test_render_disparity_levels() {
        let mut values = Array2::from_elem((1, 3), -1.0f32);
        values[[0, 1]] = 10.0;
        values[[0, 2]] = 20.0;
        let image = render_disparity(&DisparityField::from_array(values));
        assert_eq!(image.get_pixel(0, 0), &Luma([0]));
        assert_eq!(image.get_pixel(1, 0), &Luma([1]));
        assert_eq!(image.get_pixel(2, 0), &Luma([255]));
    }

    #[test]
    fn test_render_constant_and_empty() {
        let constant = render_disparity(&DisparityField::filled(2, 2, 5.0));
        assert!(constant.pixels().all(|p| *p == Luma([128])));
        let empty = render_disparity(&DisparityField::filled(2, 2, -1.0));
        assert!(empty.pixels().all(|p| *p == Luma([0])));
    }

    #[test]
    fn test_encode_png_signature() {
        let bytes = encode_png(&GrayImage::new(4, 4)).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
