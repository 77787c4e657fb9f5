//! Size estimates from box extent, with and without depth

use crate::{FruitDetection, FruitMeasurement, SizeEstimate};
use std::f64::consts::PI;
use stereo_sizing_common::{round_to, Calibration, PixelBox};

/// Default `volume_estimated / diameter_px^2` ratio of the 2D fallback
///
/// A labelled heuristic (π/6), not a physical volume.
pub const DEFAULT_FALLBACK_VOLUME_FACTOR: f64 = 0.5236;

/// Larger side of the truncated box, in pixels
#[must_use]
pub fn diameter_px(bbox: &PixelBox) -> f64 {
    let (x1, y1, x2, y2) = bbox.to_pixel_indices();
    x2.saturating_sub(x1).max(y2.saturating_sub(y1)) as f64
}

/// Volume of a sphere with the given diameter
#[must_use]
#[inline]
pub fn sphere_volume(diameter: f64) -> f64 {
    4.0 / 3.0 * PI * (diameter / 2.0).powi(3)
}

/// Metric size of a fruit at a known depth
#[must_use]
pub fn estimate_stereo(
    fruit: &FruitDetection,
    depth_mm: f64,
    calibration: &Calibration,
) -> FruitMeasurement {
    let diameter_mm = diameter_px(&fruit.bbox) * depth_mm / calibration.focal_px;
    FruitMeasurement {
        class_name: fruit.class,
        size: SizeEstimate::Metric {
            distance_mm: round_to(depth_mm, 2),
            diameter_mm: round_to(diameter_mm, 2),
            volume_mm3: round_to(sphere_volume(diameter_mm), 1),
        },
        bbox: fruit.bbox,
    }
}

/// Pixel-only size of a fruit when no depth is available
#[must_use]
pub fn estimate_2d(fruit: &FruitDetection, volume_factor: f64) -> FruitMeasurement {
    let diameter = diameter_px(&fruit.bbox);
    FruitMeasurement {
        class_name: fruit.class,
        size: SizeEstimate::PixelOnly {
            diameter_px: diameter,
            volume_estimated: round_to(diameter * diameter * volume_factor, 1),
        },
        bbox: fruit.bbox,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereo_sizing_common::FruitClass;

    fn fruit(bbox: PixelBox) -> FruitDetection {
        FruitDetection {
            class: FruitClass::Apple,
            confidence: 0.9,
            bbox,
        }
    }

    #[test]
    fn test_diameter_uses_larger_truncated_side() {
        assert_eq!(diameter_px(&PixelBox::new(10.0, 20.0, 110.0, 100.0)), 100.0);
        assert_eq!(diameter_px(&PixelBox::new(10.9, 20.0, 50.5, 100.9)), 80.0);
        assert_eq!(diameter_px(&PixelBox::new(5.0, 5.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn test_worked_example() {
        let m = estimate_stereo(
            &fruit(PixelBox::new(10.0, 20.0, 110.0, 100.0)),
            2153.25,
            &Calibration::new(783.0, 55.0),
        );
        assert_eq!(
            m.size,
            SizeEstimate::Metric {
                distance_mm: 2153.25,
                diameter_mm: 275.0,
                volume_mm3: 10_889_218.3,
            }
        );
    }

    #[test]
    fn test_stereo_monotonic_in_box_size() {
        let cal = Calibration::default();
        let mut last = (0.0, 0.0);
        for side in [10.0, 20.0, 40.0, 80.0, 160.0] {
            let m = estimate_stereo(&fruit(PixelBox::new(0.0, 0.0, side, side)), 1500.0, &cal);
            let SizeEstimate::Metric {
                diameter_mm,
                volume_mm3,
                ..
            } = m.size
            else {
                panic!("stereo estimate must be metric");
            };
            assert!(diameter_mm > last.0 && volume_mm3 > last.1);
            last = (diameter_mm, volume_mm3);
        }
    }

    #[test]
    fn test_2d_estimate_is_pixel_only() {
        let m = estimate_2d(&fruit(PixelBox::new(0.0, 0.0, 100.0, 60.0)), 0.5236);
        assert_eq!(
            m.size,
            SizeEstimate::PixelOnly {
                diameter_px: 100.0,
                volume_estimated: 5236.0,
            }
        );
    }

    #[test]
    fn test_sphere_volume() {
        assert!((sphere_volume(2.0) - 4.0 / 3.0 * PI).abs() < 1e-12);
        assert_eq!(sphere_volume(0.0), 0.0);
    }
}
