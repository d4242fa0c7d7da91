//! Square letterbox padding around camera frames.
//!
//! The detector expects a square input, so each frame is padded with black
//! borders (and mirrored for a selfie view when configured). The padding
//! amounts are kept for the frame so results can be mapped back to camera
//! coordinates at the end of the pipeline.

use crate::frames::{BoundingBox, LandmarkSet, OriginalImage, PaddedImage};
use image::{imageops, RgbImage};
use nalgebra::Point2;

/// Padding applied to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Letterbox {
    /// Rows added above the image
    pub top: u32,
    /// Rows added below the image
    pub bottom: u32,
    /// Columns added left of the image
    pub left: u32,
    /// Columns added right of the image
    pub right: u32,
    /// Side length of the square padded canvas
    pub side: u32,
    /// Whether the padded canvas is mirrored horizontally
    pub mirror: bool,
}

impl Letterbox {
    /// Compute symmetric padding for a `width` x `height` frame.
    ///
    /// When the difference is odd the extra row/column goes to the bottom/right.
    #[must_use]
    pub fn for_dimensions(width: u32, height: u32, mirror: bool) -> Self {
        let side = width.max(height);
        Self {
            top: (side - height) / 2,
            bottom: (side - height + 1) / 2,
            left: (side - width) / 2,
            right: (side - width + 1) / 2,
            side,
            mirror,
        }
    }

    /// Padding for an image
    #[must_use]
    pub fn for_image(image: &RgbImage, mirror: bool) -> Self {
        Self::for_dimensions(image.width(), image.height(), mirror)
    }

    /// Width of the original frame
    #[must_use]
    pub fn original_width(&self) -> u32 {
        self.side - self.left - self.right
    }

    /// Height of the original frame
    #[must_use]
    pub fn original_height(&self) -> u32 {
        self.side - self.top - self.bottom
    }

    /// Pad `image` onto a black square canvas, mirroring it if configured
    #[must_use]
    pub fn pad(&self, image: &RgbImage) -> RgbImage {
        let mut canvas = RgbImage::new(self.side, self.side);
        imageops::replace(&mut canvas, image, i64::from(self.left), i64::from(self.top));
        if self.mirror {
            imageops::flip_horizontal_in_place(&mut canvas);
        }
        canvas
    }

    fn point_to_original(&self, p: &Point2<f64>) -> Point2<f64> {
        let x = if self.mirror { f64::from(self.side) - 1.0 - p.x } else { p.x };
        Point2::new(x - f64::from(self.left), p.y - f64::from(self.top))
    }

    fn point_to_padded(&self, p: &Point2<f64>) -> Point2<f64> {
        let x = p.x + f64::from(self.left);
        let x = if self.mirror { f64::from(self.side) - 1.0 - x } else { x };
        Point2::new(x, p.y + f64::from(self.top))
    }

    /// Map padded-image landmarks back to camera coordinates
    #[must_use]
    pub fn to_original(&self, landmarks: &LandmarkSet<PaddedImage>) -> LandmarkSet<OriginalImage> {
        landmarks.map_into(|p| self.point_to_original(p))
    }

    /// Map camera-coordinate landmarks into the padded image
    #[must_use]
    pub fn to_padded(&self, landmarks: &LandmarkSet<OriginalImage>) -> LandmarkSet<PaddedImage> {
        landmarks.map_into(|p| self.point_to_padded(p))
    }

    /// Map a padded-image box back to camera coordinates
    #[must_use]
    pub fn bbox_to_original(&self, bbox: &BoundingBox<PaddedImage>) -> BoundingBox<OriginalImage> {
        bbox.map_into(|p| self.point_to_original(p))
    }

    /// Map a camera-coordinate box into the padded image
    #[must_use]
    pub fn bbox_to_padded(&self, bbox: &BoundingBox<OriginalImage>) -> BoundingBox<PaddedImage> {
        bbox.map_into(|p| self.point_to_padded(p))
    }
}
