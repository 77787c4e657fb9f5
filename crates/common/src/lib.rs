/// Common types and utilities for stereo fruit sizing
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Processing errors
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Invalid image geometry: expected {expected}, got {}", describe_shape(.actual))]
    InvalidImageGeometry {
        expected: FrameShape,
        actual: Option<FrameShape>,
    },

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Invalid source path: {0}")]
    InvalidSourcePath(String),

    #[error("Undecodable image: {0}")]
    UndecodableImage(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

fn describe_shape(shape: &Option<FrameShape>) -> String {
    match shape {
        Some(shape) => shape.to_string(),
        None => "undecodable image".to_string(),
    }
}

impl From<image::ImageError> for ProcessingError {
    fn from(err: image::ImageError) -> Self {
        ProcessingError::ImageError(err.to_string())
    }
}

/// Result type for processing operations
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Image shape in (height, width, channels) order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: u8,
}

impl FrameShape {
    #[must_use]
    pub const fn new(height: u32, width: u32, channels: u8) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

/// Side-by-side frame geometry of the calibrated rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameGeometry {
    /// Full frame width (both views), in pixels
    pub width: u32,
    /// Frame height, in pixels
    pub height: u32,
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self {
            width: 3480,
            height: 1080,
        }
    }
}

impl FrameGeometry {
    /// Shape a decoded color frame must have
    #[must_use]
    pub fn expected_shape(&self) -> FrameShape {
        FrameShape::new(self.height, self.width, 3)
    }

    /// Width of a single view
    #[must_use]
    pub fn view_width(&self) -> u32 {
        self.width / 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ProcessingError::InvalidConfig(
                "frame dimensions must be non-zero".to_string(),
            ));
        }
        if self.width % 2 != 0 {
            return Err(ProcessingError::InvalidConfig(format!(
                "side-by-side frame width must be even, got {}",
                self.width
            )));
        }
        Ok(())
    }
}

/// Fixed stereo rig calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Focal length in pixel units
    pub focal_px: f64,
    /// Distance between the two lenses, in millimeters
    pub baseline_mm: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            focal_px: 783.0,
            baseline_mm: 55.0,
        }
    }
}

impl Calibration {
    #[must_use]
    pub const fn new(focal_px: f64, baseline_mm: f64) -> Self {
        Self {
            focal_px,
            baseline_mm,
        }
    }

    /// `focal_px * baseline_mm`, the numerator of the disparity-to-depth inversion
    #[must_use]
    #[inline]
    pub fn depth_numerator(&self) -> f64 {
        self.focal_px * self.baseline_mm
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.focal_px.is_finite() && self.focal_px > 0.0) {
            return Err(ProcessingError::InvalidConfig(format!(
                "focal_px must be positive, got {}",
                self.focal_px
            )));
        }
        if !(self.baseline_mm.is_finite() && self.baseline_mm > 0.0) {
            return Err(ProcessingError::InvalidConfig(format!(
                "baseline_mm must be positive, got {}",
                self.baseline_mm
            )));
        }
        Ok(())
    }
}

/// Axis-aligned box in pixel coordinates of the reference image
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct PixelBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl PixelBox {
    #[must_use]
    pub const fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over Union with another box
    #[must_use]
    #[inline]
    pub fn iou(&self, other: &PixelBox) -> f32 {
        let ix = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let iy = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let intersection = ix * iy;
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Coordinates truncated to integer pixel indices, as `(x1, y1, x2, y2)`
    ///
    /// Negative coordinates saturate at zero.
    #[must_use]
    pub fn to_pixel_indices(&self) -> (usize, usize, usize, usize) {
        (
            self.x1 as usize,
            self.y1 as usize,
            self.x2 as usize,
            self.y2 as usize,
        )
    }

    #[must_use]
    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl From<[f32; 4]> for PixelBox {
    fn from(c: [f32; 4]) -> Self {
        Self::new(c[0], c[1], c[2], c[3])
    }
}

impl From<PixelBox> for [f32; 4] {
    fn from(b: PixelBox) -> Self {
        b.to_array()
    }
}

/// Fruit classes retained by the sizing pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FruitClass {
    Apple,
    Orange,
    /// Generic fruit label from custom-trained detectors
    Fruit,
}

impl FruitClass {
    pub const ALL: [FruitClass; 3] = [FruitClass::Apple, FruitClass::Orange, FruitClass::Fruit];

    /// Map a detector label to a fruit class; other labels are not fruit
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "apple" => Some(Self::Apple),
            "orange" => Some(Self::Orange),
            "fruit" => Some(Self::Fruit),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Apple => "apple",
            Self::Orange => "orange",
            Self::Fruit => "fruit",
        }
    }
}

impl fmt::Display for FruitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Round to a fixed number of decimal places
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}
