//! `YOLOv8` ONNX session wrapper

use crate::{decode_predictions, Detection, DetectionError, Detector, DetectorSettings};
use image::RgbImage;
use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use std::sync::Mutex;
use tracing::{debug, info};

/// `YOLOv8` detector holding one ONNX session
///
/// The session is loaded once and guarded by a mutex, so a single instance
/// can serve concurrent requests.
pub struct YoloDetector {
    session: Mutex<Session>,
    settings: DetectorSettings,
}

impl YoloDetector {
    /// Load the model named by `settings.model_path`
    ///
    /// # Errors
    /// Returns error if the model file is missing or cannot be loaded
    pub fn new(settings: DetectorSettings) -> Result<Self, DetectionError> {
        info!("Loading YOLOv8 model from {:?}", settings.model_path);
        if !settings.model_path.exists() {
            return Err(DetectionError::ModelLoad(format!(
                "model file not found: {}",
                settings.model_path.display()
            )));
        }

        let session = Session::builder()
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?
            .commit_from_file(&settings.model_path)
            .map_err(|e| DetectionError::ModelLoad(e.to_string()))?;

        info!("YOLOv8 model loaded successfully");
        Ok(Self {
            session: Mutex::new(session),
            settings,
        })
    }

    #[must_use]
    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Resize to the square model input and convert to normalized CHW
    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let size = self.settings.input_size;
        let resized =
            image::imageops::resize(image, size, size, image::imageops::FilterType::Triangle);

        let mut input = Array4::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            input[[0, 0, y, x]] = f32::from(pixel[0]) / 255.0;
            input[[0, 1, y, x]] = f32::from(pixel[1]) / 255.0;
            input[[0, 2, y, x]] = f32::from(pixel[2]) / 255.0;
        }
        input
    }
}

impl Detector for YoloDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        debug!(
            "Running object detection on {}x{} image",
            image.width(),
            image.height()
        );
        let input = self.preprocess(image);
        let size = self.settings.input_size as f32;
        let scale_x = image.width() as f32 / size;
        let scale_y = image.height() as f32 / size;

        let tensor = TensorRef::from_array_view(input.view())?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectionError::Inference("detector session lock poisoned".to_string()))?;
        let outputs = session.run(ort::inputs![tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        debug!("ONNX output shape: {:?}", shape);

        let detections = decode_predictions(shape.as_ref(), data, &self.settings, scale_x, scale_y)?;
        info!("Detected {} objects", detections.len());
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_missing_model_is_load_error() {
        let settings = DetectorSettings {
            model_path: PathBuf::from("/nonexistent/yolov8n.onnx"),
            ..DetectorSettings::default()
        };
        assert!(matches!(
            YoloDetector::new(settings),
            Err(DetectionError::ModelLoad(_))
        ));
    }

    #[test]
    #[ignore] // Requires models/yolov8n.onnx
    fn test_detect_on_blank_image() {
        let detector = YoloDetector::new(DetectorSettings::default()).unwrap();
        let image = RgbImage::from_pixel(1740, 1080, image::Rgb([255, 255, 255]));
        let detections = detector.detect(&image).unwrap();
        for det in &detections {
            assert!(det.bbox.x2 <= 1740.0 * 1.1);
            assert!(det.bbox.y2 <= 1080.0 * 1.1);
        }
    }
}
