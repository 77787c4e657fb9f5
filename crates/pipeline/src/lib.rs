//! Stereo fruit sizing pipeline
//!
//! One request runs the stages in order: fetch the source image, validate and
//! split the side-by-side frame, detect fruit on the left view while the
//! matcher computes disparity, convert disparity to depth, fuse depth with
//! the detections, and store a disparity visualization next to the source.
//!
//! Fetching and storing are the only async steps. Everything in between is
//! CPU-bound and runs on tokio's blocking pool. Calibration and the detector
//! are fixed when the pipeline is built and shared by all requests.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use stereo_sizing_object_detection::YoloDetector;
//! use stereo_sizing_pipeline::{PipelineConfig, SizingPipeline};
//! use stereo_sizing_storage::LocalStorage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::default().apply_env()?;
//!     let detector = Arc::new(YoloDetector::new(config.detector.clone())?);
//!     let pipeline = SizingPipeline::new(config, detector)?;
//!
//!     let storage = LocalStorage::new("captures");
//!     let report = pipeline.process(&storage, &storage, "tree_01.jpg").await?;
//!     println!("{} fruits", report.n_fruits);
//!     Ok(())
//! }
//! ```

pub mod config;

pub use config::{ConfigError, PipelineConfig};

use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use stereo_sizing_common::{ProcessingError, Result};
use stereo_sizing_depth::{depth_from_disparity, encode_png, render_disparity};
use stereo_sizing_disparity::{compute_disparity, DisparityField};
use stereo_sizing_fusion::{measure_2d, measure_stereo, FruitMeasurement, MeasurementReport};
use stereo_sizing_object_detection::Detector;
use stereo_sizing_pair::{decode_color, decode_image, StereoFrame};
use stereo_sizing_storage::{artifact_path, ArtifactSink, ImageSource};
use tracing::{debug, info, warn};

/// Stored path reported when the disparity image could not be stored
pub const UNAVAILABLE_ARTIFACT: &str = "unavailable";

/// Suffix of the disparity visualization stored next to a source
pub const DISPARITY_SUFFIX: &str = "_disparity.png";

/// Result of sizing one stereo frame
#[derive(Debug, Clone)]
pub struct StereoOutcome {
    pub fruits: Vec<FruitMeasurement>,
    pub disparity: DisparityField,
}

/// The sizing pipeline with its calibration and detector
///
/// Cloning is cheap; clones share the configuration and detector.
#[derive(Clone)]
pub struct SizingPipeline {
    config: Arc<PipelineConfig>,
    detector: Arc<dyn Detector>,
}

impl SizingPipeline {
    /// Build a pipeline after validating its configuration
    pub fn new(config: PipelineConfig, detector: Arc<dyn Detector>) -> Result<Self> {
        config.validate()?;
        info!(
            "Sizing pipeline ready: {}x{} frames, f={} px, B={} mm",
            config.geometry.width,
            config.geometry.height,
            config.calibration.focal_px,
            config.calibration.baseline_mm
        );
        Ok(Self {
            config: Arc::new(config),
            detector,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Size the fruit in a decoded side-by-side frame
    ///
    /// The frame is validated before any detection or matching work.
    /// Detection on the left view and disparity matching run in parallel.
    pub fn measure_stereo(&self, frame: RgbImage) -> Result<StereoOutcome> {
        let frame = StereoFrame::new(frame, &self.config.geometry)?;
        let pair = frame.split();
        let (left_gray, right_gray) = pair.to_gray();

        let start = Instant::now();
        let (detections, disparity) = rayon::join(
            || self.detector.detect(&pair.left),
            || compute_disparity(&left_gray, &right_gray, &self.config.sgbm),
        );
        let detections = detections?;
        let disparity = disparity?;
        debug!(
            "Detection and matching took {:?}: {} detections, {} valid disparities",
            start.elapsed(),
            detections.len(),
            disparity.valid_count()
        );

        let depth = depth_from_disparity(&disparity, &self.config.calibration);
        let fruits = measure_stereo(&detections, &depth, &self.config.calibration);
        Ok(StereoOutcome { fruits, disparity })
    }

    /// Pixel-only sizes for a single image of any resolution
    pub fn measure_single(&self, image: &RgbImage) -> Result<Vec<FruitMeasurement>> {
        let detections = self.detector.detect(image)?;
        Ok(measure_2d(&detections, self.config.fallback_volume_factor))
    }

    /// Fetch a side-by-side frame, size its fruit and store the disparity image
    ///
    /// A failure to store the visualization is logged and reported as
    /// [`UNAVAILABLE_ARTIFACT`]; it never fails the request.
    pub async fn process(
        &self,
        source: &dyn ImageSource,
        sink: &dyn ArtifactSink,
        path: &str,
    ) -> Result<MeasurementReport> {
        let start = Instant::now();
        let bytes = source.fetch(path).await?;
        debug!("Fetched {} ({} bytes)", path, bytes.len());

        let pipeline = self.clone();
        let render = self.config.store_disparity_image;
        let (fruits, png) = run_blocking(move || {
            let frame = decode_color(&bytes, &pipeline.config.geometry)?;
            let outcome = pipeline.measure_stereo(frame)?;
            let png = if render {
                Some(encode_png(&render_disparity(&outcome.disparity))?)
            } else {
                None
            };
            Ok((outcome.fruits, png))
        })
        .await?;

        let disparity_image = match png {
            Some(png) => Some(store_artifact(sink, &artifact_path(path, DISPARITY_SUFFIX), &png).await),
            None => None,
        };

        info!(
            "Processed {} in {:?}: {} fruits",
            path,
            start.elapsed(),
            fruits.len()
        );
        Ok(MeasurementReport::stereo(fruits, disparity_image))
    }

    /// Fetch a single image and size its fruit in pixels
    pub async fn process_2d(&self, source: &dyn ImageSource, path: &str) -> Result<MeasurementReport> {
        let start = Instant::now();
        let bytes = source.fetch(path).await?;

        let pipeline = self.clone();
        let fruits = run_blocking(move || {
            let image = decode_image(&bytes)?;
            pipeline.measure_single(&image)
        })
        .await?;

        info!(
            "Processed {} (2d) in {:?}: {} fruits",
            path,
            start.elapsed(),
            fruits.len()
        );
        Ok(MeasurementReport::flat(fruits))
    }
}

async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ProcessingError::Other(format!("pipeline task failed: {e}")))?
}

async fn store_artifact(sink: &dyn ArtifactSink, path: &str, data: &[u8]) -> String {
    match sink.store(path, data).await {
        Ok(stored) => stored,
        Err(e) => {
            warn!("Failed to store {}: {}", path, e);
            UNAVAILABLE_ARTIFACT.to_string()
        }
    }
}
