//! Semi-global block matching for rectified stereo pairs
//!
//! Computes a dense horizontal disparity field between the left (reference)
//! and right grayscale views. Matching cost is a Birchfield-Tomasi
//! dissimilarity on a clipped x-Sobel prefilter plus a down-weighted intensity
//! term, summed over square blocks. Costs are smoothed along five directions
//! in a single top-to-bottom pass, then filtered by uniqueness, left-right
//! consistency and speckle size.
//!
//! Pixels that cannot be matched hold the invalid value `min_disparity - 1`.
//!
//! # Example
//! ```no_run
//! use stereo_sizing_disparity::{compute_disparity, SgbmParams};
//!
//! # fn main() -> anyhow::Result<()> {
//! let left = image::open("left.png")?.to_luma8();
//! let right = image::open("right.png")?.to_luma8();
//! let field = compute_disparity(&left, &right, &SgbmParams::default())?;
//! println!("valid pixels: {}", field.valid_count());
//! # Ok(())
//! # }
//! ```

mod cost;
mod sgm;
mod speckle;

use image::GrayImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use stereo_sizing_common::ProcessingError;
use thiserror::Error;
use tracing::debug;

/// Fractional bits of the internal fixed-point disparity
pub(crate) const DISP_SHIFT: u32 = 4;
/// Fixed-point scale, `1 << DISP_SHIFT`
pub(crate) const DISP_SCALE: i32 = 1 << DISP_SHIFT;
/// Upper bound for the smoothness penalties
///
/// Five paths of at most `block cost + P2` each must fit in a `u32`.
pub const MAX_PENALTY: u32 = 1 << 24;

/// Errors that can occur during disparity computation
#[derive(Error, Debug)]
pub enum DisparityError {
    #[error("Invalid matcher parameters: {0}")]
    InvalidParams(String),

    #[error("Stereo views differ in size: left {left:?}, right {right:?}")]
    SizeMismatch { left: (u32, u32), right: (u32, u32) },
}

impl From<DisparityError> for ProcessingError {
    fn from(err: DisparityError) -> Self {
        match err {
            DisparityError::InvalidParams(msg) => ProcessingError::InvalidConfig(msg),
            other => ProcessingError::Other(other.to_string()),
        }
    }
}

/// Matcher parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgbmParams {
    /// Smallest candidate disparity
    pub min_disparity: i32,
    /// Number of candidates, a positive multiple of 16
    pub num_disparities: u32,
    /// Odd side length of the matching block
    pub block_size: u32,
    /// Penalty for a disparity change of one pixel between neighbours
    pub p1: u32,
    /// Penalty for larger disparity changes
    pub p2: u32,
    /// Allowed left-right disagreement in whole pixels; negative disables the check
    pub disp12_max_diff: i32,
    /// Clip value of the x-Sobel prefilter
    pub pre_filter_cap: u8,
    /// Margin in percent by which the best cost must beat the runner-up
    pub uniqueness_ratio: u32,
    /// Largest connected blob treated as noise; 0 disables speckle filtering
    pub speckle_window_size: u32,
    /// Maximum disparity variation inside a connected component, in pixels
    pub speckle_range: u32,
}

impl Default for SgbmParams {
    fn default() -> Self {
        let channels = 3;
        let block_size = 5;
        Self {
            min_disparity: 0,
            num_disparities: 16 * 12,
            block_size,
            p1: 8 * channels * block_size * block_size,
            p2: 32 * channels * block_size * block_size,
            disp12_max_diff: 1,
            pre_filter_cap: 63,
            uniqueness_ratio: 5,
            speckle_window_size: 50,
            speckle_range: 1,
        }
    }
}

impl SgbmParams {
    pub fn validate(&self) -> Result<(), DisparityError> {
        let invalid = |msg: String| Err(DisparityError::InvalidParams(msg));
        if self.num_disparities == 0 || self.num_disparities % 16 != 0 {
            return invalid(format!(
                "num_disparities must be a positive multiple of 16, got {}",
                self.num_disparities
            ));
        }
        if self.num_disparities > 1024 {
            return invalid(format!(
                "num_disparities must not exceed 1024, got {}",
                self.num_disparities
            ));
        }
        if self.block_size % 2 == 0 || !(1..=31).contains(&self.block_size) {
            return invalid(format!(
                "block_size must be odd and within 1..=31, got {}",
                self.block_size
            ));
        }
        let lowest = (i64::from(self.min_disparity) - 1) * i64::from(DISP_SCALE);
        let highest = (i64::from(self.min_disparity) + i64::from(self.num_disparities))
            * i64::from(DISP_SCALE);
        if lowest < i64::from(i16::MIN) || highest > i64::from(i16::MAX) {
            return invalid(format!(
                "min_disparity {} with num_disparities {} exceeds the fixed-point range",
                self.min_disparity, self.num_disparities
            ));
        }
        if self.p2 > MAX_PENALTY {
            return invalid(format!(
                "p2 must not exceed {MAX_PENALTY}, got {}",
                self.p2
            ));
        }
        if self.p2 <= self.p1 {
            return invalid(format!(
                "p2 must be greater than p1, got p1={} p2={}",
                self.p1, self.p2
            ));
        }
        if self.uniqueness_ratio > 100 {
            return invalid(format!(
                "uniqueness_ratio is a percentage, got {}",
                self.uniqueness_ratio
            ));
        }
        if !(1..=63).contains(&self.pre_filter_cap) {
            return invalid(format!(
                "pre_filter_cap must be within 1..=63, got {}",
                self.pre_filter_cap
            ));
        }
        Ok(())
    }

    /// Value written to pixels without a match, in pixels
    #[must_use]
    pub fn invalid_value(&self) -> f32 {
        (self.min_disparity - 1) as f32
    }

    pub(crate) fn invalid_fixed(&self) -> i16 {
        ((self.min_disparity - 1) * DISP_SCALE) as i16
    }
}

/// Whether a disparity sample can be inverted into depth
#[must_use]
#[inline]
pub fn is_valid_disparity(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

/// Dense disparity map of the reference view, indexed `[row, col]`
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityField {
    values: Array2<f32>,
}

impl DisparityField {
    #[must_use]
    pub fn from_array(values: Array2<f32>) -> Self {
        Self { values }
    }

    /// Field of the given size holding one value everywhere
    #[must_use]
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            values: Array2::from_elem((height, width), value),
        }
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.values.ncols()
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.values.nrows()
    }

    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        self.values.get((y, x)).copied()
    }

    /// Sample at `(x, y)` if it is a positive disparity
    #[must_use]
    pub fn valid(&self, x: usize, y: usize) -> Option<f32> {
        self.get(x, y).filter(|&v| is_valid_disparity(v))
    }

    #[must_use]
    pub fn as_array(&self) -> &Array2<f32> {
        &self.values
    }

    #[must_use]
    pub fn into_array(self) -> Array2<f32> {
        self.values
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.values.iter().filter(|&&v| is_valid_disparity(v)).count()
    }

    /// Smallest and largest valid disparity, if any
    #[must_use]
    pub fn valid_range(&self) -> Option<(f32, f32)> {
        self.values
            .iter()
            .copied()
            .filter(|&v| is_valid_disparity(v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Compute the disparity of `left` relative to `right`
///
/// Both views must have the same dimensions. Parameters are validated
/// before any work is done. The result has the size of the inputs.
///
/// # Errors
/// Returns error if the parameters are malformed or the views differ in size
pub fn compute_disparity(
    left: &GrayImage,
    right: &GrayImage,
    params: &SgbmParams,
) -> Result<DisparityField, DisparityError> {
    params.validate()?;
    if left.dimensions() != right.dimensions() {
        return Err(DisparityError::SizeMismatch {
            left: left.dimensions(),
            right: right.dimensions(),
        });
    }

    let (w, h) = (left.width() as usize, left.height() as usize);
    if w == 0 || h == 0 {
        return Ok(DisparityField::filled(w, h, params.invalid_value()));
    }

    let start = Instant::now();
    let mut fixed = sgm::semi_global_match(left, right, params);
    debug!("Semi-global matching ({}x{}) took {:?}", w, h, start.elapsed());

    let removed = speckle::filter_speckles(
        &mut fixed,
        w,
        h,
        params.invalid_fixed(),
        params.speckle_window_size as usize,
        params.speckle_range as i32 * DISP_SCALE,
    );
    debug!("Speckle filter invalidated {} pixels", removed);

    let scale = 1.0 / DISP_SCALE as f32;
    let values = Array2::from_shape_fn((h, w), |(y, x)| f32::from(fixed[y * w + x]) * scale);
    Ok(DisparityField::from_array(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn noise(x: u32, y: u32) -> u8 {
        let mut v = x.wrapping_mul(0x9E37_79B1) ^ y.wrapping_mul(0x85EB_CA77);
        v ^= v >> 15;
        v = v.wrapping_mul(0x2C1B_3C6D);
        v ^= v >> 12;
        (v & 0xFF) as u8
    }

    /// Random texture pair where the right view is the left shifted by `shift`
    fn shifted_pair(width: u32, height: u32, shift: u32) -> (GrayImage, GrayImage) {
        let left = GrayImage::from_fn(width, height, |x, y| Luma([noise(x, y)]));
        let right = GrayImage::from_fn(width, height, |x, y| Luma([noise(x + shift, y)]));
        (left, right)
    }

    fn small_params() -> SgbmParams {
        SgbmParams {
            num_disparities: 16,
            ..SgbmParams::default()
        }
    }

    #[test]
    fn test_default_params_match_rig_tuning() {
        let params = SgbmParams::default();
        assert_eq!(params.num_disparities, 192);
        assert_eq!(params.p1, 600);
        assert_eq!(params.p2, 2400);
        assert!(params.validate().is_ok());
        assert_eq!(params.invalid_value(), -1.0);
    }

    #[test]
    fn test_params_validation() {
        let bad = [
            SgbmParams {
                num_disparities: 24,
                ..SgbmParams::default()
            },
            SgbmParams {
                num_disparities: 0,
                ..SgbmParams::default()
            },
            SgbmParams {
                block_size: 4,
                ..SgbmParams::default()
            },
            SgbmParams {
                p1: 2400,
                p2: 600,
                ..SgbmParams::default()
            },
            SgbmParams {
                uniqueness_ratio: 101,
                ..SgbmParams::default()
            },
            SgbmParams {
                min_disparity: 2100,
                num_disparities: 16,
                ..SgbmParams::default()
            },
            SgbmParams {
                min_disparity: -2100,
                ..SgbmParams::default()
            },
            SgbmParams {
                p2: u32::MAX,
                ..SgbmParams::default()
            },
            SgbmParams {
                p1: MAX_PENALTY,
                p2: MAX_PENALTY + 1,
                ..SgbmParams::default()
            },
        ];
        for params in bad {
            assert!(
                matches!(params.validate(), Err(DisparityError::InvalidParams(_))),
                "accepted {params:?}"
            );
        }
    }

    #[test]
    fn test_largest_accepted_min_disparity_does_not_wrap() {
        let (left, right) = shifted_pair(48, 16, 2);
        let params = SgbmParams {
            min_disparity: 2047 - 16,
            num_disparities: 16,
            ..SgbmParams::default()
        };
        assert!(params.validate().is_ok());
        let field = compute_disparity(&left, &right, &params).unwrap();
        assert!(field.as_array().iter().all(|&d| d == 2030.0));
    }

    #[test]
    fn test_largest_accepted_penalties_do_not_overflow() {
        let (left, right) = shifted_pair(64, 24, 4);
        let params = SgbmParams {
            p1: MAX_PENALTY - 1,
            p2: MAX_PENALTY,
            ..small_params()
        };
        assert!(params.validate().is_ok());
        let field = compute_disparity(&left, &right, &params).unwrap();
        assert_eq!((field.width(), field.height()), (64, 24));
    }

    #[test]
    fn test_params_from_partial_yaml() {
        let params: SgbmParams = serde_yaml::from_str("num_disparities: 64\nblock_size: 7\n").unwrap();
        assert_eq!(params.num_disparities, 64);
        assert_eq!(params.block_size, 7);
        assert_eq!(params.p1, 600);
    }

    #[test]
    fn test_known_shift_recovered() {
        let (left, right) = shifted_pair(96, 48, 6);
        let field = compute_disparity(&left, &right, &small_params()).unwrap();
        assert_eq!((field.width(), field.height()), (96, 48));

        let mut interior = 0;
        let mut valid = 0;
        for y in 0..48 {
            for x in 18..96 {
                interior += 1;
                if let Some(d) = field.valid(x, y) {
                    valid += 1;
                    assert!((5.5..=6.5).contains(&d), "disparity {d} at ({x}, {y})");
                }
            }
        }
        assert!(valid * 10 >= interior * 9, "only {valid}/{interior} valid");
    }

    #[test]
    fn test_left_border_columns_invalid() {
        let (left, right) = shifted_pair(64, 24, 4);
        let field = compute_disparity(&left, &right, &small_params()).unwrap();
        for y in 0..24 {
            for x in 0..16 {
                assert_eq!(field.get(x, y), Some(-1.0));
            }
        }
    }

    #[test]
    fn test_textureless_pair_has_no_positive_disparity() {
        let flat = GrayImage::from_pixel(48, 16, Luma([120]));
        let field = compute_disparity(&flat, &flat, &small_params()).unwrap();
        assert!(field.as_array().iter().all(|&d| d <= 0.0));
        assert_eq!(field.valid_count(), 0);
        assert_eq!(field.valid_range(), None);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let a = GrayImage::new(32, 16);
        let b = GrayImage::new(30, 16);
        let err = compute_disparity(&a, &b, &small_params()).unwrap_err();
        assert!(matches!(err, DisparityError::SizeMismatch { .. }));
    }

    #[test]
    fn test_invalid_params_rejected_before_matching() {
        let a = GrayImage::new(32, 16);
        let params = SgbmParams {
            block_size: 2,
            ..SgbmParams::default()
        };
        assert!(matches!(
            compute_disparity(&a, &a, &params),
            Err(DisparityError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_narrow_image_is_all_invalid() {
        // Narrower than the search range: no column can be matched
        let (left, right) = shifted_pair(12, 8, 2);
        let field = compute_disparity(&left, &right, &small_params()).unwrap();
        assert!(field.as_array().iter().all(|&d| d == -1.0));
    }

    #[test]
    fn test_field_helpers() {
        let mut values = Array2::from_elem((2, 3), -1.0f32);
        values[[0, 1]] = 4.0;
        values[[1, 2]] = 9.5;
        let field = DisparityField::from_array(values);
        assert_eq!(field.valid(1, 0), Some(4.0));
        assert_eq!(field.valid(0, 0), None);
        assert_eq!(field.get(5, 5), None);
        assert_eq!(field.valid_count(), 2);
        assert_eq!(field.valid_range(), Some((4.0, 9.5)));
        assert!(!is_valid_disparity(f32::NAN));
        assert!(!is_valid_disparity(0.0));
    }
}
