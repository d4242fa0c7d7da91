use super::kalman::ScalarKalmanStabilizer;
use crate::{
    config::StabilizerConfig,
    frames::{CoordinateFrame, LandmarkSet},
    Error, Result,
};
use nalgebra::Point2;
use std::marker::PhantomData;

/// Fixed-size bank of Kalman stabilizers, one per tracked landmark.
///
/// Created once per tracking session. Each landmark's 2-D measurement feeds
/// its own filter, and results come back in the input ordering. The bank is
/// tied to the coordinate frame its filters track, so state fed in one frame
/// cannot be read back as another:
///
/// ```compile_fail
/// use face_landmark_tracking::{
///     filters::StabilizerBank,
///     frames::{LandmarkSet, OriginalImage, PaddedImage},
/// };
///
/// let bank = StabilizerBank::<OriginalImage>::new(1, 0.2, 2.0);
/// let padded: LandmarkSet<PaddedImage> = bank.results();
/// ```
#[derive(Debug, Clone)]
pub struct StabilizerBank<F: CoordinateFrame> {
    stabilizers: Vec<ScalarKalmanStabilizer>,
    frame: PhantomData<F>,
}

impl<F: CoordinateFrame> StabilizerBank<F> {
    /// Create `count` point stabilizers with the given noise covariances
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or a covariance is not positive.
    #[must_use]
    pub fn new(count: usize, cov_process: f64, cov_measure: f64) -> Self {
        assert!(count > 0, "Stabilizer bank needs at least one landmark");
        Self {
            stabilizers: (0..count)
                .map(|_| ScalarKalmanStabilizer::for_point(cov_process, cov_measure))
                .collect(),
            frame: PhantomData,
        }
    }

    /// Create a bank from configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for a zero landmark count or a covariance that is
    /// not positive and finite.
    pub fn from_config(config: &StabilizerConfig) -> Result<Self> {
        if config.landmark_count == 0 {
            return Err(Error::ConfigError(
                "Stabilizer bank needs at least one landmark".to_string(),
            ));
        }
        for (name, value) in [
            ("Process noise", config.process_noise),
            ("Measurement noise", config.measurement_noise),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::ConfigError(format!("{name} must be positive and finite, got {value}")));
            }
        }
        Ok(Self::new(
            config.landmark_count,
            config.process_noise,
            config.measurement_noise,
        ))
    }

    /// Number of tracked landmarks
    #[must_use]
    pub fn len(&self) -> usize {
        self.stabilizers.len()
    }

    /// Always false; a bank tracks at least one landmark
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stabilizers.is_empty()
    }

    /// Feed one frame of landmarks through the bank.
    ///
    /// A filter that fails keeps its prior estimate while the others update.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` without touching any filter if the landmark
    /// count differs from the bank size or any coordinate is non-finite;
    /// otherwise returns the first per-filter error after all filters have
    /// been visited.
    pub fn update(&mut self, landmarks: &LandmarkSet<F>) -> Result<()> {
        if landmarks.len() != self.stabilizers.len() {
            return Err(Error::InvalidInput(format!(
                "Stabilizer bank tracks {} landmarks, got {} in {}",
                self.stabilizers.len(),
                landmarks.len(),
                F::NAME
            )));
        }
        if let Some(index) = landmarks.iter().position(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "Landmark {index} in {} is non-finite",
                F::NAME
            )));
        }

        let mut first_error = None;
        for (index, (stabilizer, mark)) in self.stabilizers.iter_mut().zip(landmarks.iter()).enumerate() {
            if let Err(e) = stabilizer.update(&[mark.x, mark.y]) {
                log::warn!("Landmark {index} keeps its prior estimate: {e}");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Current smoothed landmarks, in bank order
    #[must_use]
    pub fn results(&self) -> LandmarkSet<F> {
        LandmarkSet::new(
            self.stabilizers
                .iter()
                .map(|s| {
                    let p = s.get_result();
                    Point2::new(p[0], p[1])
                })
                .collect(),
        )
    }

    /// Update with one frame and return the smoothed landmarks.
    ///
    /// # Errors
    ///
    /// Same as [`Self::update`].
    pub fn stabilize(&mut self, landmarks: &LandmarkSet<F>) -> Result<LandmarkSet<F>> {
        self.update(landmarks)?;
        Ok(self.results())
    }

    /// Reset every filter to its initial state
    pub fn reset(&mut self) {
        for stabilizer in &mut self.stabilizers {
            stabilizer.reset();
        }
    }
}
