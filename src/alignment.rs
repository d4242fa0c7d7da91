//! Face alignment via a two-anchor similarity transform.
//!
//! The aligner rotates, scales and translates a face so its two eye anchors
//! land on fixed positions inside a square crop, samples the crop, and keeps
//! the transform so mesh landmarks predicted on the crop can be mapped back
//! into padded-image space.

use crate::{
    config::AlignerConfig,
    constants::{DEFAULT_CROP_SIZE, DEFAULT_TARGET_LEFT_EYE, EPSILON, LEFT_EYE_INDEX, RIGHT_EYE_INDEX},
    frames::{AlignedCrop, LandmarkSet, PaddedImage},
    utils::bilinear_sample,
    Error, Result,
};
use image::RgbImage;
use nalgebra::{Matrix2, Matrix2x3, Point2, Vector2};

/// Similarity transform from padded-image space to aligned-crop space.
///
/// Stored as the 2x3 matrix
/// ```text
/// |  a  b  tx |
/// | -b  a  ty |
/// ```
/// with `a = s cos θ` and `b = s sin θ`. A transform is computed for one face
/// in one frame; it is deliberately not `Clone`.
#[derive(Debug, PartialEq)]
pub struct SimilarityTransform {
    matrix: Matrix2x3<f64>,
}

impl SimilarityTransform {
    /// The raw 2x3 matrix
    #[must_use]
    pub fn matrix(&self) -> &Matrix2x3<f64> {
        &self.matrix
    }

    /// Uniform scale factor
    #[must_use]
    pub fn scale(&self) -> f64 {
        self.matrix[(0, 0)].hypot(self.matrix[(0, 1)])
    }

    /// Rotation angle of the source eye baseline in degrees
    #[must_use]
    pub fn angle_degrees(&self) -> f64 {
        self.matrix[(0, 1)].atan2(self.matrix[(0, 0)]).to_degrees()
    }

    fn map(matrix: &Matrix2x3<f64>, p: &Point2<f64>) -> Point2<f64> {
        let linear = matrix.fixed_view::<2, 2>(0, 0);
        let translation = matrix.column(2);
        Point2::from(linear * p.coords + translation)
    }

    /// Map padded-image landmarks into the aligned crop
    #[must_use]
    pub fn apply(&self, landmarks: &LandmarkSet<PaddedImage>) -> LandmarkSet<AlignedCrop> {
        landmarks.map_into(|p| Self::map(&self.matrix, p))
    }

    /// The inverse 2x3 matrix, mapping crop space back to padded-image space
    ///
    /// # Errors
    ///
    /// Returns `NumericInstability` if the linear part is singular
    pub fn invert(&self) -> Result<Matrix2x3<f64>> {
        let linear: Matrix2<f64> = self.matrix.fixed_view::<2, 2>(0, 0).into_owned();
        let translation: Vector2<f64> = self.matrix.column(2).into_owned();
        if linear.determinant().abs() < EPSILON {
            return Err(Error::NumericInstability(format!(
                "Similarity transform is singular (scale {:.3e})",
                self.scale()
            )));
        }
        let inv = linear
            .try_inverse()
            .ok_or_else(|| Error::NumericInstability("Similarity transform has no inverse".to_string()))?;
        let inv_translation = -(inv * translation);
        Ok(Matrix2x3::new(
            inv[(0, 0)],
            inv[(0, 1)],
            inv_translation.x,
            inv[(1, 0)],
            inv[(1, 1)],
            inv_translation.y,
        ))
    }
}

/// Aligns faces to a fixed-size square crop using two eye anchors
#[derive(Debug, Clone)]
pub struct SimilarityAligner {
    crop_size: u32,
    target_left_eye: (f64, f64),
    left_anchor: usize,
    right_anchor: usize,
}

impl SimilarityAligner {
    /// Create an aligner.
    ///
    /// `target_left_eye` is the fractional position of the left anchor inside
    /// the crop; the right anchor is placed symmetrically at `1 - x`.
    ///
    /// # Panics
    ///
    /// Panics if the crop size is zero, the horizontal target fraction is not
    /// in `(0, 0.5)`, or both anchors are the same landmark.
    #[must_use]
    pub fn new(crop_size: u32, target_left_eye: (f64, f64), left_anchor: usize, right_anchor: usize) -> Self {
        assert!(crop_size > 0, "Crop size must be greater than 0");
        assert!(
            target_left_eye.0 > 0.0 && target_left_eye.0 < 0.5,
            "Target eye x fraction must be in (0, 0.5)"
        );
        assert!(left_anchor != right_anchor, "Anchor landmarks must differ");
        Self {
            crop_size,
            target_left_eye,
            left_anchor,
            right_anchor,
        }
    }

    /// Create an aligner from validated configuration
    #[must_use]
    pub fn from_config(config: &AlignerConfig) -> Self {
        Self::new(
            config.crop_size,
            (config.target_left_eye_x, config.target_left_eye_y),
            config.left_anchor,
            config.right_anchor,
        )
    }

    /// Side length of the aligned crop
    #[must_use]
    pub fn crop_size(&self) -> u32 {
        self.crop_size
    }

    /// Compute the transform placing the anchors at their target positions
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if an anchor index is outside the landmark set,
    /// and `DegenerateGeometry` if the two anchors coincide.
    pub fn transform_for(&self, landmarks: &LandmarkSet<PaddedImage>) -> Result<SimilarityTransform> {
        let anchor = |index: usize| {
            landmarks.get(index).copied().ok_or_else(|| {
                Error::InvalidInput(format!(
                    "Anchor landmark {index} missing from a set of {}",
                    landmarks.len()
                ))
            })
        };
        let left = anchor(self.left_anchor)?;
        let right = anchor(self.right_anchor)?;

        let baseline = right - left;
        let distance = baseline.norm();
        if !distance.is_finite() || distance < EPSILON {
            return Err(Error::DegenerateGeometry(format!(
                "Eye anchors are {distance:.3e} px apart"
            )));
        }

        let size = f64::from(self.crop_size);
        let (target_x, target_y) = self.target_left_eye;
        let desired_distance = (1.0 - 2.0 * target_x) * size;
        let scale = desired_distance / distance;
        let angle = baseline.y.atan2(baseline.x);

        let a = scale * angle.cos();
        let b = scale * angle.sin();
        let center = nalgebra::center(&left, &right);
        let target_center = Vector2::new(size * 0.5, size * target_y);

        let linear = Matrix2::new(a, b, -b, a);
        let translation = target_center - linear * center.coords;

        Ok(SimilarityTransform {
            matrix: Matrix2x3::new(a, b, translation.x, -b, a, translation.y),
        })
    }

    /// Align a face: compute the transform and sample the aligned crop
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`Self::transform_for`] and returns
    /// `NumericInstability` if the transform cannot be inverted for sampling.
    pub fn align(
        &self,
        image: &RgbImage,
        landmarks: &LandmarkSet<PaddedImage>,
    ) -> Result<(RgbImage, SimilarityTransform)> {
        let transform = self.transform_for(landmarks)?;
        let inverse = transform.invert()?;

        let crop = RgbImage::from_fn(self.crop_size, self.crop_size, |x, y| {
            let src = SimilarityTransform::map(&inverse, &Point2::new(f64::from(x), f64::from(y)));
            bilinear_sample(image, src.x, src.y)
        });

        log::debug!(
            "Aligned face: scale {:.3}, angle {:.1} deg",
            transform.scale(),
            transform.angle_degrees()
        );

        Ok((crop, transform))
    }

    /// Map aligned-crop landmarks back into padded-image space
    ///
    /// # Errors
    ///
    /// Returns `NumericInstability` if the transform is singular
    pub fn inverse(
        &self,
        aligned: &LandmarkSet<AlignedCrop>,
        transform: &SimilarityTransform,
    ) -> Result<LandmarkSet<PaddedImage>> {
        let inverse = transform.invert()?;
        Ok(aligned.map_into(|p| SimilarityTransform::map(&inverse, p)))
    }
}

impl Default for SimilarityAligner {
    fn default() -> Self {
        Self::new(DEFAULT_CROP_SIZE, DEFAULT_TARGET_LEFT_EYE, LEFT_EYE_INDEX, RIGHT_EYE_INDEX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use proptest::prelude::*;

    fn eyes(left: (f64, f64), right: (f64, f64)) -> LandmarkSet<PaddedImage> {
        LandmarkSet::from_tuples(&[left, right, (0.0, 0.0)])
    }

    #[test]
    fn test_anchors_land_on_targets() {
        let aligner = SimilarityAligner::default();
        let landmarks = eyes((210.0, 300.0), (290.0, 260.0));
        let transform = aligner.transform_for(&landmarks).unwrap();
        let aligned = transform.apply(&landmarks);

        let size = 192.0;
        let left = aligned.get(0).unwrap();
        let right = aligned.get(1).unwrap();
        assert!((left.x - 0.38 * size).abs() < 1e-9);
        assert!((left.y - 0.38 * size).abs() < 1e-9);
        assert!((right.x - 0.62 * size).abs() < 1e-9);
        assert!((right.y - 0.38 * size).abs() < 1e-9);
    }

    #[test]
    fn test_level_eyes_have_zero_angle() {
        let aligner = SimilarityAligner::default();
        let transform = aligner.transform_for(&eyes((100.0, 100.0), (146.08, 100.0))).unwrap();
        assert!(transform.angle_degrees().abs() < 1e-9);
        assert!((transform.scale() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_coincident_anchors_are_degenerate() {
        let aligner = SimilarityAligner::default();
        let result = aligner.transform_for(&eyes((50.0, 50.0), (50.0, 50.0)));
        assert!(matches!(result, Err(Error::DegenerateGeometry(_))));
    }

    #[test]
    fn test_missing_anchor_is_invalid_input() {
        let aligner = SimilarityAligner::default();
        let single = LandmarkSet::<PaddedImage>::from_tuples(&[(1.0, 2.0)]);
        assert!(matches!(aligner.transform_for(&single), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_align_samples_crop() {
        let image = RgbImage::from_pixel(400, 400, Rgb([200, 100, 50]));
        let aligner = SimilarityAligner::new(64, (0.38, 0.38), 0, 1);
        let (crop, _) = aligner.align(&image, &eyes((180.0, 200.0), (220.0, 200.0))).unwrap();
        assert_eq!(crop.dimensions(), (64, 64));
        assert_eq!(*crop.get_pixel(32, 32), Rgb([200, 100, 50]));
    }

    #[test]
    #[should_panic(expected = "Anchor landmarks must differ")]
    fn test_same_anchor_panics() {
        let _ = SimilarityAligner::new(192, (0.38, 0.38), 1, 1);
    }

    #[test]
    #[should_panic(expected = "Target eye x fraction must be in (0, 0.5)")]
    fn test_centered_target_panics() {
        let _ = SimilarityAligner::new(192, (0.5, 0.38), 0, 1);
    }

    proptest! {
        #[test]
        fn prop_inverse_undoes_forward(
            lx in 0.0f64..600.0, ly in 0.0f64..600.0,
            dx in 5.0f64..200.0, dy in -100.0f64..100.0,
            px in -50.0f64..650.0, py in -50.0f64..650.0,
        ) {
            let aligner = SimilarityAligner::default();
            let landmarks = LandmarkSet::<PaddedImage>::from_tuples(&[(lx, ly), (lx + dx, ly + dy), (px, py)]);
            let transform = aligner.transform_for(&landmarks).unwrap();
            let back = aligner.inverse(&transform.apply(&landmarks), &transform).unwrap();
            prop_assert!(back.max_distance(&landmarks).unwrap() < 1e-6);
        }
    }
}
