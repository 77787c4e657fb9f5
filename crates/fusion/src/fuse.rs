//! Detection filtering and per-box depth extraction

use serde::{Deserialize, Serialize};
use stereo_sizing_common::{FruitClass, PixelBox};
use stereo_sizing_depth::DepthField;
use stereo_sizing_object_detection::Detection;
use tracing::debug;

/// A detection whose label is one of the fruit classes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FruitDetection {
    pub class: FruitClass,
    pub confidence: f32,
    pub bbox: PixelBox,
}

/// Keep fruit-labelled detections, in detector order
#[must_use]
pub fn filter_fruit(detections: &[Detection]) -> Vec<FruitDetection> {
    let fruit: Vec<FruitDetection> = detections
        .iter()
        .filter_map(|d| {
            FruitClass::from_label(&d.class_name).map(|class| FruitDetection {
                class,
                confidence: d.confidence,
                bbox: d.bbox,
            })
        })
        .collect();
    debug!("{} of {} detections are fruit", fruit.len(), detections.len());
    fruit
}

/// Median of a sample set; the two middle values are averaged for even counts
///
/// Reorders `values`. Returns `None` when empty.
pub fn median(values: &mut [f64]) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let mid = n / 2;
    let (lower, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *upper;
    if n % 2 == 1 {
        Some(upper)
    } else {
        let lower = lower.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some((lower + upper) / 2.0)
    }
}

/// Median of the known depth samples inside a box, in millimeters
///
/// The box is truncated to integer indices and cropped end-exclusive, then
/// clamped to the field. `None` when the crop holds no known sample.
#[must_use]
pub fn median_depth(depth: &DepthField, bbox: &PixelBox) -> Option<f64> {
    let (x1, y1, x2, y2) = bbox.to_pixel_indices();
    let (w, h) = (depth.width(), depth.height());
    let (x1, x2) = (x1.min(w), x2.min(w));
    let (y1, y2) = (y1.min(h), y2.min(h));
    if x1 >= x2 || y1 >= y2 {
        return None;
    }

    let crop = depth.as_array().slice(ndarray::s![y1..y2, x1..x2]);
    let mut samples: Vec<f64> = crop
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| f64::from(v))
        .collect();
    median(&mut samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn detection(label: &str, bbox: PixelBox) -> Detection {
        Detection {
            class_id: 0,
            class_name: label.to_string(),
            confidence: 0.8,
            bbox,
        }
    }

    #[test]
    fn test_filter_keeps_only_fruit_labels() {
        let b = PixelBox::new(0.0, 0.0, 1.0, 1.0);
        let detections = vec![
            detection("person", b),
            detection("apple", b),
            detection("banana", b),
            detection("orange", b),
            detection("fruit", b),
        ];
        let classes: Vec<FruitClass> = filter_fruit(&detections).iter().map(|f| f.class).collect();
        assert_eq!(
            classes,
            vec![FruitClass::Apple, FruitClass::Orange, FruitClass::Fruit]
        );
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&mut [7.0]), Some(7.0));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_median_depth_ignores_unknown() {
        let mut values = Array2::from_elem((4, 4), f32::NAN);
        values[[1, 1]] = 1000.0;
        values[[1, 2]] = 3000.0;
        values[[2, 1]] = 2000.0;
        let depth = DepthField::from_array(values);
        let m = median_depth(&depth, &PixelBox::new(0.0, 0.0, 4.0, 4.0));
        assert_eq!(m, Some(2000.0));
    }

    #[test]
    fn test_median_depth_crop_is_end_exclusive() {
        let values = Array2::from_shape_fn((3, 3), |(y, x)| (y * 3 + x) as f32);
        let depth = DepthField::from_array(values);
        // Truncates to rows 0..2, cols 0..2: samples 0, 1, 3, 4
        let m = median_depth(&depth, &PixelBox::new(0.7, 0.2, 2.9, 2.5));
        assert_eq!(m, Some(2.0));
    }

    #[test]
    fn test_median_depth_all_unknown_is_none() {
        let depth = DepthField::from_array(Array2::from_elem((4, 4), f32::NAN));
        assert_eq!(median_depth(&depth, &PixelBox::new(0.0, 0.0, 4.0, 4.0)), None);
    }

    #[test]
    fn test_median_depth_clamps_out_of_range_box() {
        let depth = DepthField::from_array(Array2::from_elem((4, 4), 500.0f32));
        assert_eq!(
            median_depth(&depth, &PixelBox::new(2.0, 2.0, 100.0, 100.0)),
            Some(500.0)
        );
        assert_eq!(
            median_depth(&depth, &PixelBox::new(10.0, 10.0, 20.0, 20.0)),
            None
        );
        // Degenerate box
        assert_eq!(
            median_depth(&depth, &PixelBox::new(3.0, 1.0, 3.0, 2.0)),
            None
        );
    }
}
