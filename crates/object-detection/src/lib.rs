//! Object detection using `YOLOv8` via ONNX Runtime
//!
//! The sizing pipeline only depends on the [`Detector`] trait: one call per
//! request returns class-labelled boxes in pixel coordinates of the image it
//! was given. [`YoloDetector`] implements it with a `YOLOv8` ONNX export.
//! Stock checkpoints use the 80 COCO labels (apple and orange among them);
//! custom-trained checkpoints can supply their own label table, e.g. a single
//! `fruit` class.
//!
//! # Example
//! ```no_run
//! use stereo_sizing_object_detection::{Detector, DetectorSettings, YoloDetector};
//!
//! # fn main() -> anyhow::Result<()> {
//! let detector = YoloDetector::new(DetectorSettings::default())?;
//! let img = image::open("left.jpg")?.to_rgb8();
//! for detection in detector.detect(&img)? {
//!     println!("{}: {:.2}%", detection.class_name, detection.confidence * 100.0);
//! }
//! # Ok(())
//! # }
//! ```

mod classes;
mod yolo;

pub use classes::{coco_class_name, COCO_CLASSES};
pub use yolo::YoloDetector;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use stereo_sizing_common::{PixelBox, ProcessingError};
use thiserror::Error;
use tracing::debug;

/// Error types for object detection
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("ONNX Runtime error: {0}")]
    OnnxRuntime(#[from] ort::Error),
}

impl From<DetectionError> for ProcessingError {
    fn from(err: DetectionError) -> Self {
        ProcessingError::Detection(err.to_string())
    }
}

/// A labelled box in pixel coordinates of the detector's input image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Index into the detector's label table
    pub class_id: usize,
    pub class_name: String,
    /// Confidence score (0-1)
    pub confidence: f32,
    pub bbox: PixelBox,
}

/// Anything that finds labelled boxes in an RGB image
///
/// Implementations are shared across concurrent requests.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectionError>;
}

/// Detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    /// Path to the `YOLOv8` ONNX export
    pub model_path: PathBuf,
    /// Minimum confidence threshold for detections (0.0-1.0)
    pub confidence_threshold: f32,
    /// `IoU` threshold for non-maximum suppression (0.0-1.0)
    pub iou_threshold: f32,
    /// Maximum number of detections to return per image
    pub max_detections: usize,
    /// Square model input size (`YOLOv8` default is 640)
    pub input_size: u32,
    /// Label table of a custom-trained model; COCO labels when absent
    pub class_names: Option<Vec<String>>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
            input_size: 640,
            class_names: None,
        }
    }
}

impl DetectorSettings {
    /// Label for a class id under this configuration
    #[must_use]
    pub fn class_name(&self, class_id: usize) -> &str {
        match &self.class_names {
            Some(names) => names.get(class_id).map_or("unknown", String::as_str),
            None => coco_class_name(class_id),
        }
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.class_names.as_ref().map_or(COCO_CLASSES.len(), Vec::len)
    }
}

/// Decode a `(1, 4 + classes, anchors)` `YOLOv8` output into pixel-space detections
///
/// Box centers and sizes are in model input units; `scale_x`/`scale_y` map
/// them back onto the original image. Result is NMS-filtered and truncated
/// to `max_detections`, highest confidence first.
pub fn decode_predictions(
    dims: &[i64],
    data: &[f32],
    settings: &DetectorSettings,
    scale_x: f32,
    scale_y: f32,
) -> Result<Vec<Detection>, DetectionError> {
    if dims.len() != 3 {
        return Err(DetectionError::Inference(format!(
            "Expected 3D output tensor, got {}D",
            dims.len()
        )));
    }
    let num_features = dims[1] as usize;
    let num_anchors = dims[2] as usize;
    if num_features < 5 || data.len() < num_features * num_anchors {
        return Err(DetectionError::Inference(format!(
            "Unexpected output shape {dims:?} for {} values",
            data.len()
        )));
    }
    let num_classes = (num_features - 4).min(settings.num_classes());

    let mut raw = Vec::with_capacity(num_anchors / 10);
    for anchor in 0..num_anchors {
        let feature = |i: usize| data[i * num_anchors + anchor];

        let mut best_prob = 0.0f32;
        let mut best_class = 0usize;
        for class_id in 0..num_classes {
            let prob = feature(4 + class_id);
            if prob > best_prob {
                best_prob = prob;
                best_class = class_id;
            }
        }
        if best_prob < settings.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (feature(0), feature(1), feature(2), feature(3));
        raw.push(Detection {
            class_id: best_class,
            class_name: settings.class_name(best_class).to_string(),
            confidence: best_prob,
            bbox: PixelBox::new(
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ),
        });
    }
    debug!("Raw detections before NMS: {}", raw.len());

    let mut kept = non_max_suppression(raw, settings.iou_threshold);
    kept.truncate(settings.max_detections);
    Ok(kept)
}

/// Greedy per-class non-maximum suppression, highest confidence first
#[must_use]
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for det in detections {
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == det.class_id && k.bbox.iou(&det.bbox) >= iou_threshold);
        if !suppressed {
            keep.push(det);
        }
    }
    debug!("Detections after NMS: {}", keep.len());
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_surfaces_as_detection_failure() {
        let err: DetectionError = ort::Error::new("output tensor missing").into();
        assert!(matches!(err, DetectionError::OnnxRuntime(_)));
        let processing: ProcessingError = err.into();
        assert!(
            matches!(&processing, ProcessingError::Detection(msg) if msg.contains("output tensor missing"))
        );
    }

    /// Build a (1, 4 + classes, anchors) tensor from per-anchor rows
    fn tensor(rows: &[Vec<f32>]) -> (Vec<i64>, Vec<f32>) {
        let features = rows[0].len();
        let anchors = rows.len();
        let mut data = vec![0.0; features * anchors];
        for (a, row) in rows.iter().enumerate() {
            for (f, &v) in row.iter().enumerate() {
                data[f * anchors + a] = v;
            }
        }
        (vec![1, features as i64, anchors as i64], data)
    }

    fn anchor(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, prob: f32) -> Vec<f32> {
        let mut row = vec![cx, cy, w, h];
        row.extend(std::iter::repeat(0.0).take(80));
        row[4 + class_id] = prob;
        row
    }

    fn detection(class_id: usize, confidence: f32, bbox: PixelBox) -> Detection {
        Detection {
            class_id,
            class_name: coco_class_name(class_id).to_string(),
            confidence,
            bbox,
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = DetectorSettings::default();
        assert_eq!(settings.confidence_threshold, 0.25);
        assert_eq!(settings.iou_threshold, 0.45);
        assert_eq!(settings.input_size, 640);
        assert_eq!(settings.num_classes(), 80);
        assert_eq!(settings.class_name(47), "apple");
    }

    #[test]
    fn test_custom_label_table() {
        let settings: DetectorSettings =
            serde_yaml::from_str("class_names: [fruit]\nconfidence_threshold: 0.5\n").unwrap();
        assert_eq!(settings.num_classes(), 1);
        assert_eq!(settings.class_name(0), "fruit");
        assert_eq!(settings.class_name(3), "unknown");
        assert_eq!(settings.input_size, 640);
    }

    #[test]
    fn test_decode_scales_to_image_pixels() {
        let (dims, data) = tensor(&[anchor(320.0, 320.0, 64.0, 32.0, 47, 0.9)]);
        let settings = DetectorSettings::default();
        // 1280x960 image fed to a 640 model
        let dets = decode_predictions(&dims, &data, &settings, 2.0, 1.5).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "apple");
        assert_eq!(dets[0].bbox, PixelBox::new(576.0, 456.0, 704.0, 504.0));
    }

    #[test]
    fn test_decode_drops_low_confidence() {
        let (dims, data) = tensor(&[
            anchor(100.0, 100.0, 20.0, 20.0, 49, 0.1),
            anchor(300.0, 300.0, 20.0, 20.0, 49, 0.6),
        ]);
        let dets = decode_predictions(&dims, &data, &DetectorSettings::default(), 1.0, 1.0).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_name, "orange");
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let result = decode_predictions(&[1, 84], &[0.0; 84], &DetectorSettings::default(), 1.0, 1.0);
        assert!(matches!(result, Err(DetectionError::Inference(_))));
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap_only() {
        let a = detection(47, 0.9, PixelBox::new(0.0, 0.0, 10.0, 10.0));
        let b = detection(47, 0.8, PixelBox::new(1.0, 0.0, 11.0, 10.0));
        let c = detection(49, 0.7, PixelBox::new(1.0, 0.0, 11.0, 10.0));
        let d = detection(47, 0.6, PixelBox::new(50.0, 50.0, 60.0, 60.0));
        let kept = non_max_suppression(vec![d.clone(), b, c.clone(), a.clone()], 0.45);
        assert_eq!(kept, vec![a, c, d]);
    }

    #[test]
    fn test_max_detections_truncates() {
        let rows: Vec<Vec<f32>> = (0..5)
            .map(|i| anchor(50.0 + 100.0 * i as f32, 50.0, 20.0, 20.0, 47, 0.5 + 0.05 * i as f32))
            .collect();
        let (dims, data) = tensor(&rows);
        let settings = DetectorSettings {
            max_detections: 2,
            ..DetectorSettings::default()
        };
        let dets = decode_predictions(&dims, &data, &settings, 1.0, 1.0).unwrap();
        assert_eq!(dets.len(), 2);
        assert!(dets[0].confidence > dets[1].confidence);
    }
}
