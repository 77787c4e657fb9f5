//! Side-by-side stereo frame validation and splitting
//!
//! The rig writes both views into one image: the left half is the reference
//! view (object detection runs on it), the right half is only used for
//! matching. A frame whose shape differs from the calibrated resolution is
//! rejected outright; it is never cropped or resized to fit.
//!
//! # Example
//! ```no_run
//! use stereo_sizing_common::FrameGeometry;
//! use stereo_sizing_pair::StereoFrame;
//!
//! # fn main() -> anyhow::Result<()> {
//! let bytes = std::fs::read("pair.jpg")?;
//! let frame = StereoFrame::decode(&bytes, &FrameGeometry::default())?;
//! let pair = frame.split();
//! let (left_gray, right_gray) = pair.to_gray();
//! println!("views: {}x{}", left_gray.width(), right_gray.height());
//! # Ok(())
//! # }
//! ```

use image::{imageops, GrayImage, RgbImage};
use stereo_sizing_common::{FrameGeometry, FrameShape, ProcessingError, Result};
use tracing::debug;

/// Decode encoded image bytes of any resolution as a 3-channel color image
///
/// Grayscale and alpha inputs are converted to RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    image::load_from_memory(bytes)
        .map(|decoded| decoded.to_rgb8())
        .map_err(|e| ProcessingError::UndecodableImage(e.to_string()))
}

/// Decode a side-by-side frame; undecodable bytes are a geometry failure
///
/// The shape itself is checked by [`StereoFrame::new`].
pub fn decode_color(bytes: &[u8], geometry: &FrameGeometry) -> Result<RgbImage> {
    decode_image(bytes).map_err(|e| {
        debug!("Image decode failed: {}", e);
        ProcessingError::InvalidImageGeometry {
            expected: geometry.expected_shape(),
            actual: None,
        }
    })
}

/// Shape of an RGB image in (height, width, channels) order
#[must_use]
pub fn shape_of(image: &RgbImage) -> FrameShape {
    FrameShape::new(image.height(), image.width(), 3)
}

/// A validated side-by-side frame
#[derive(Debug, Clone)]
pub struct StereoFrame {
    image: RgbImage,
}

impl StereoFrame {
    /// Wrap a decoded frame after checking it against the rig geometry
    pub fn new(image: RgbImage, geometry: &FrameGeometry) -> Result<Self> {
        let expected = geometry.expected_shape();
        let actual = shape_of(&image);
        if actual != expected {
            return Err(ProcessingError::InvalidImageGeometry {
                expected,
                actual: Some(actual),
            });
        }
        Ok(Self { image })
    }

    /// Decode and validate in one step
    pub fn decode(bytes: &[u8], geometry: &FrameGeometry) -> Result<Self> {
        Self::new(decode_color(bytes, geometry)?, geometry)
    }

    #[must_use]
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Split at the horizontal midpoint into left and right views
    #[must_use]
    pub fn split(&self) -> StereoPair {
        let half = self.image.width() / 2;
        let height = self.image.height();
        let left = imageops::crop_imm(&self.image, 0, 0, half, height).to_image();
        let right = imageops::crop_imm(&self.image, half, 0, half, height).to_image();
        StereoPair { left, right }
    }
}

/// Left and right views of one frame, each H x W
#[derive(Debug, Clone)]
pub struct StereoPair {
    /// Reference view, used for detection and as the disparity origin
    pub left: RgbImage,
    /// Matching view
    pub right: RgbImage,
}

impl StereoPair {
    #[must_use]
    pub fn view_width(&self) -> u32 {
        self.left.width()
    }

    #[must_use]
    pub fn view_height(&self) -> u32 {
        self.left.height()
    }

    /// Grayscale derivatives of both views for matching
    #[must_use]
    pub fn to_gray(&self) -> (GrayImage, GrayImage) {
        (imageops::grayscale(&self.left), imageops::grayscale(&self.right))
    }
}
