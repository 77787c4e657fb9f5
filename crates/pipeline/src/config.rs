//! Pipeline configuration: YAML file, environment overrides, validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stereo_sizing_common::{Calibration, FrameGeometry, ProcessingError};
use stereo_sizing_disparity::SgbmParams;
use stereo_sizing_fusion::DEFAULT_FALLBACK_VOLUME_FACTOR;
use stereo_sizing_object_detection::DetectorSettings;
use thiserror::Error;
use tracing::info;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for ProcessingError {
    fn from(err: ConfigError) -> Self {
        ProcessingError::InvalidConfig(err.to_string())
    }
}

/// Everything the sizing pipeline needs, resolved once at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub calibration: Calibration,
    pub geometry: FrameGeometry,
    pub sgbm: SgbmParams,
    pub detector: DetectorSettings,
    /// `volume_estimated / diameter_px^2` of the single-image fallback
    pub fallback_volume_factor: f64,
    /// Render and store the disparity map next to each processed source
    pub store_disparity_image: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            geometry: FrameGeometry::default(),
            sgbm: SgbmParams::default(),
            detector: DetectorSettings::default(),
            fallback_volume_factor: DEFAULT_FALLBACK_VOLUME_FACTOR,
            store_disparity_image: true,
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML file; absent keys keep their defaults
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&contents)?;
        info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply `FOCAL_PX`, `BASELINE_MM`, `FRAME_WIDTH`, `FRAME_HEIGHT` and `MODEL_PATH`
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; empty values are ignored
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FOCAL_PX") {
            self.calibration.focal_px = parse("FOCAL_PX", &v)?;
        }
        if let Some(v) = get("BASELINE_MM") {
            self.calibration.baseline_mm = parse("BASELINE_MM", &v)?;
        }
        if let Some(v) = get("FRAME_WIDTH") {
            self.geometry.width = parse("FRAME_WIDTH", &v)?;
        }
        if let Some(v) = get("FRAME_HEIGHT") {
            self.geometry.height = parse("FRAME_HEIGHT", &v)?;
        }
        if let Some(v) = get("MODEL_PATH") {
            self.detector.model_path = PathBuf::from(v);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |e: ProcessingError| ConfigError::Invalid(e.to_string());
        self.calibration.validate().map_err(invalid)?;
        self.geometry.validate().map_err(invalid)?;
        self.sgbm
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let detector = &self.detector;
        for (name, value) in [
            ("confidence_threshold", detector.confidence_threshold),
            ("iou_threshold", detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "detector.{name} must be within 0..=1, got {value}"
                )));
            }
        }
        if detector.input_size == 0 || detector.input_size % 32 != 0 {
            return Err(ConfigError::Invalid(format!(
                "detector.input_size must be a positive multiple of 32, got {}",
                detector.input_size
            )));
        }
        if !(self.fallback_volume_factor.is_finite() && self.fallback_volume_factor > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "fallback_volume_factor must be positive, got {}",
                self.fallback_volume_factor
            )));
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
