use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// Constant-velocity Kalman filter smoothing one landmark.
///
/// The state holds a position and a velocity per measured axis, so a 2-D
/// landmark has a 4-D state `[x, y, vx, vy]`. Process and measurement noise
/// are fixed at construction.
#[derive(Debug, Clone)]
pub struct ScalarKalmanStabilizer {
    input_dim: usize,
    initial_state: DVector<f64>,
    // State: positions followed by velocities
    state: DVector<f64>,
    // State covariance
    covariance: DMatrix<f64>,
    // Process noise
    process_noise: DMatrix<f64>,
    // Measurement noise
    measurement_noise: DMatrix<f64>,
    // State transition matrix
    transition: DMatrix<f64>,
    // Measurement matrix (positions only)
    measurement: DMatrix<f64>,
}

impl ScalarKalmanStabilizer {
    /// Create a stabilizer starting from `initial_state`.
    ///
    /// # Panics
    ///
    /// Panics if `input_dim` is zero, the initial state is not `2 * input_dim`
    /// long, or either covariance scalar is not positive and finite.
    #[must_use]
    pub fn new(initial_state: &[f64], input_dim: usize, cov_process: f64, cov_measure: f64) -> Self {
        assert!(input_dim > 0, "Input dimension must be greater than 0");
        assert!(
            initial_state.len() == 2 * input_dim,
            "Initial state must hold a position and velocity per input dimension"
        );
        assert!(
            cov_process.is_finite() && cov_process > 0.0,
            "Process noise must be positive"
        );
        assert!(
            cov_measure.is_finite() && cov_measure > 0.0,
            "Measurement noise must be positive"
        );

        let state_dim = 2 * input_dim;

        // [[I, I], [0, I]]: position advances by velocity each frame
        let mut transition = DMatrix::<f64>::identity(state_dim, state_dim);
        for i in 0..input_dim {
            transition[(i, input_dim + i)] = 1.0;
        }

        // [I, 0]: only positions are observed
        let mut measurement = DMatrix::<f64>::zeros(input_dim, state_dim);
        for i in 0..input_dim {
            measurement[(i, i)] = 1.0;
        }

        let initial_state = DVector::from_column_slice(initial_state);

        Self {
            input_dim,
            state: initial_state.clone(),
            initial_state,
            covariance: DMatrix::zeros(state_dim, state_dim),
            process_noise: DMatrix::identity(state_dim, state_dim) * cov_process,
            measurement_noise: DMatrix::identity(input_dim, input_dim) * cov_measure,
            transition,
            measurement,
        }
    }

    /// Stabilizer for a 2-D point starting at the origin at rest
    #[must_use]
    pub fn for_point(cov_process: f64, cov_measure: f64) -> Self {
        Self::new(&[0.0; 4], 2, cov_process, cov_measure)
    }

    /// Dimensionality of one measurement
    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Predict then correct with one measurement.
    ///
    /// The update is atomic: on error the filter state is left untouched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a measurement of the wrong length or with
    /// non-finite values, and `NumericInstability` if the innovation
    /// covariance cannot be inverted or the result is non-finite.
    pub fn update(&mut self, measurement: &[f64]) -> Result<()> {
        if measurement.len() != self.input_dim {
            return Err(Error::InvalidInput(format!(
                "Expected a {}-D measurement, got {} values",
                self.input_dim,
                measurement.len()
            )));
        }
        if measurement.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "Measurement contains non-finite values: {measurement:?}"
            )));
        }
        let observed = DVector::from_column_slice(measurement);

        // Predict
        let predicted_state = &self.transition * &self.state;
        let predicted_cov =
            &self.transition * &self.covariance * self.transition.transpose() + &self.process_noise;

        // Innovation
        let innovation = observed - &self.measurement * &predicted_state;

        // Innovation covariance
        let innovation_cov =
            &self.measurement * &predicted_cov * self.measurement.transpose() + &self.measurement_noise;
        let innovation_inv = invert(innovation_cov)?;

        // Kalman gain
        let gain = &predicted_cov * self.measurement.transpose() * innovation_inv;

        let state = predicted_state + &gain * innovation;
        let identity = DMatrix::<f64>::identity(self.state.len(), self.state.len());
        let covariance = (identity - &gain * &self.measurement) * predicted_cov;

        if state.iter().chain(covariance.iter()).any(|v| !v.is_finite()) {
            return Err(Error::NumericInstability(
                "Kalman update produced non-finite values".to_string(),
            ));
        }

        self.state = state;
        self.covariance = covariance;
        Ok(())
    }

    /// Current filtered position, one value per input dimension
    #[must_use]
    pub fn get_result(&self) -> DVector<f64> {
        self.state.rows(0, self.input_dim).into_owned()
    }

    /// Current filtered velocity, one value per input dimension
    #[must_use]
    pub fn velocity(&self) -> DVector<f64> {
        self.state.rows(self.input_dim, self.input_dim).into_owned()
    }

    /// Restore the construction-time state with zero covariance
    pub fn reset(&mut self) {
        self.state = self.initial_state.clone();
        self.covariance.fill(0.0);
    }
}

/// Invert a square matrix, reporting singularity instead of producing NaNs
///
/// # Errors
///
/// Returns `NumericInstability` if the matrix is singular
pub fn invert(matrix: DMatrix<f64>) -> Result<DMatrix<f64>> {
    let dim = matrix.nrows();
    matrix.try_inverse().ok_or_else(|| {
        Error::NumericInstability(format!("{dim}x{dim} covariance matrix is singular"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_moves_toward_measurement() {
        let mut filter = ScalarKalmanStabilizer::for_point(0.2, 2.0);
        filter.update(&[100.0, -50.0]).unwrap();
        let result = filter.get_result();

        // Zero prior covariance: gain is q / (q + r) on the first step
        let expected_gain = 0.2 / 2.2;
        assert!((result[0] - 100.0 * expected_gain).abs() < 1e-9);
        assert!((result[1] + 50.0 * expected_gain).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_measurements() {
        let mut filter = ScalarKalmanStabilizer::for_point(0.2, 2.0);
        assert!(matches!(filter.update(&[1.0]), Err(Error::InvalidInput(_))));
        assert!(matches!(filter.update(&[f64::NAN, 1.0]), Err(Error::InvalidInput(_))));
        assert!(matches!(filter.update(&[1.0, f64::INFINITY]), Err(Error::InvalidInput(_))));
        assert_eq!(filter.get_result(), DVector::from_vec(vec![0.0, 0.0]));
    }

    #[test]
    fn test_one_dimensional_filter() {
        let mut filter = ScalarKalmanStabilizer::new(&[5.0, 0.0], 1, 0.1, 1.0);
        assert_eq!(filter.get_result()[0], 5.0);
        for _ in 0..200 {
            filter.update(&[7.0]).unwrap();
        }
        assert!((filter.get_result()[0] - 7.0).abs() < 1e-6);
        assert!(filter.velocity()[0].abs() < 1e-6);
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut filter = ScalarKalmanStabilizer::new(&[1.0, 2.0, 0.0, 0.0], 2, 0.2, 2.0);
        filter.update(&[30.0, 40.0]).unwrap();
        filter.update(&[31.0, 41.0]).unwrap();
        filter.reset();
        assert_eq!(filter.get_result(), DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(filter.velocity(), DVector::from_vec(vec![0.0, 0.0]));
    }

    #[test]
    fn test_invert_singular_matrix() {
        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(matches!(invert(singular), Err(Error::NumericInstability(_))));

        let regular = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]);
        let inv = invert(regular).unwrap();
        assert!((inv[(1, 1)] - 0.25).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "Measurement noise must be positive")]
    fn test_zero_measurement_noise_panics() {
        let _ = ScalarKalmanStabilizer::for_point(0.2, 0.0);
    }

    #[test]
    #[should_panic(expected = "Initial state must hold a position and velocity per input dimension")]
    fn test_wrong_state_length_panics() {
        let _ = ScalarKalmanStabilizer::new(&[0.0, 0.0, 0.0], 2, 0.2, 2.0);
    }
}
