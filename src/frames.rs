//! Coordinate frames and frame-tagged geometry.
//!
//! Landmarks move through three spaces during a frame: the square letterboxed
//! image the detector sees, the aligned face crop the mesher sees, and the
//! original camera image. Every [`LandmarkSet`] and [`BoundingBox`] carries its
//! frame as a type parameter, so passing crop-space points to a function that
//! expects padded-image points does not compile.

use crate::{Error, Result};
use nalgebra::Point2;
use std::fmt;
use std::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait implemented by the three coordinate frames
pub trait CoordinateFrame:
    sealed::Sealed + fmt::Debug + Copy + Default + PartialEq + Eq + Send + Sync + 'static
{
    /// Human readable frame name used in logs and errors
    const NAME: &'static str;
}

/// Square letterboxed (and possibly mirrored) image given to the detector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaddedImage;

/// Similarity-aligned face crop given to the mesher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignedCrop;

/// Original camera image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OriginalImage;

impl sealed::Sealed for PaddedImage {}
impl sealed::Sealed for AlignedCrop {}
impl sealed::Sealed for OriginalImage {}

impl CoordinateFrame for PaddedImage {
    const NAME: &'static str = "padded-image";
}

impl CoordinateFrame for AlignedCrop {
    const NAME: &'static str = "aligned-crop";
}

impl CoordinateFrame for OriginalImage {
    const NAME: &'static str = "original-image";
}

/// Ordered 2-D landmarks expressed in frame `F`
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet<F: CoordinateFrame> {
    points: Vec<Point2<f64>>,
    frame: PhantomData<F>,
}

impl<F: CoordinateFrame> LandmarkSet<F> {
    /// Wrap points that are known to be in frame `F`
    #[must_use]
    pub fn new(points: Vec<Point2<f64>>) -> Self {
        Self {
            points,
            frame: PhantomData,
        }
    }

    /// Empty landmark set
    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Build from `(x, y)` tuples
    #[must_use]
    pub fn from_tuples(points: &[(f64, f64)]) -> Self {
        Self::new(points.iter().map(|&(x, y)| Point2::new(x, y)).collect())
    }

    /// Build from the detector's flattened `x0 y0 x1 y1 ...` layout
    ///
    /// # Errors
    ///
    /// Returns an error if the slice has an odd number of values
    pub fn from_flat(values: &[f64]) -> Result<Self> {
        if values.len() % 2 != 0 {
            return Err(Error::InvalidInput(format!(
                "Flattened {} landmarks need an even number of values, got {}",
                F::NAME,
                values.len()
            )));
        }
        Ok(Self::new(
            values.chunks_exact(2).map(|xy| Point2::new(xy[0], xy[1])).collect(),
        ))
    }

    /// Flatten into `x0 y0 x1 y1 ...`
    #[must_use]
    pub fn to_flat(&self) -> Vec<f64> {
        self.points.iter().flat_map(|p| [p.x, p.y]).collect()
    }

    /// Number of landmarks
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the set holds no landmarks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Landmark at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Point2<f64>> {
        self.points.get(index)
    }

    /// All landmarks in order
    #[must_use]
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    /// Iterate over the landmarks
    pub fn iter(&self) -> std::slice::Iter<'_, Point2<f64>> {
        self.points.iter()
    }

    /// Name of the frame these landmarks live in
    #[must_use]
    pub fn frame_name(&self) -> &'static str {
        F::NAME
    }

    /// Map every point into another frame.
    ///
    /// Only the transform modules call this; they own the knowledge of which
    /// mapping takes `F` to `G`.
    pub(crate) fn map_into<G: CoordinateFrame>(&self, f: impl Fn(&Point2<f64>) -> Point2<f64>) -> LandmarkSet<G> {
        LandmarkSet::new(self.points.iter().map(f).collect())
    }

    /// Largest point-wise distance to another set in the same frame
    ///
    /// Returns `None` when the sets differ in length.
    #[must_use]
    pub fn max_distance(&self, other: &Self) -> Option<f64> {
        if self.len() != other.len() {
            return None;
        }
        Some(
            self.points
                .iter()
                .zip(other.points.iter())
                .map(|(a, b)| (a - b).norm())
                .fold(0.0, f64::max),
        )
    }
}

impl<F: CoordinateFrame> Default for LandmarkSet<F> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, F: CoordinateFrame> IntoIterator for &'a LandmarkSet<F> {
    type Item = &'a Point2<f64>;
    type IntoIter = std::slice::Iter<'a, Point2<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Axis-aligned box in frame `F`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox<F: CoordinateFrame> {
    /// Left edge
    pub x_min: f64,
    /// Top edge
    pub y_min: f64,
    /// Right edge
    pub x_max: f64,
    /// Bottom edge
    pub y_max: f64,
    frame: PhantomData<F>,
}

impl<F: CoordinateFrame> BoundingBox<F> {
    /// Create a box from its extents, normalising swapped edges
    #[must_use]
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min: x_min.min(x_max),
            y_min: y_min.min(y_max),
            x_max: x_min.max(x_max),
            y_max: y_min.max(y_max),
            frame: PhantomData,
        }
    }

    /// Box width
    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    /// Box height
    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Box center
    #[must_use]
    pub fn center(&self) -> Point2<f64> {
        Point2::new((self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0)
    }

    /// Extents as `[x_min, y_min, x_max, y_max]`
    #[must_use]
    pub fn to_array(&self) -> [f64; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }

    /// Map both corners into another frame, re-normalising the extents
    pub(crate) fn map_into<G: CoordinateFrame>(&self, f: impl Fn(&Point2<f64>) -> Point2<f64>) -> BoundingBox<G> {
        let a = f(&Point2::new(self.x_min, self.y_min));
        let b = f(&Point2::new(self.x_max, self.y_max));
        BoundingBox::new(a.x, a.y, b.x, b.y)
    }
}
