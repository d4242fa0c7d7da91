//! Constants used throughout the library

/// Number of coarse landmarks produced per face by the detector
pub const NUM_COARSE_LANDMARKS: usize = 6;

/// Index of the image-left eye in the coarse landmark set
pub const LEFT_EYE_INDEX: usize = 0;

/// Index of the image-right eye in the coarse landmark set
pub const RIGHT_EYE_INDEX: usize = 1;

/// Side length of the square aligned face crop in pixels
pub const DEFAULT_CROP_SIZE: u32 = 192;

/// Fractional position of the left eye inside the aligned crop
pub const DEFAULT_TARGET_LEFT_EYE: (f64, f64) = (0.38, 0.38);

/// Kalman process noise covariance scalar
pub const DEFAULT_PROCESS_NOISE: f64 = 0.2;

/// Kalman measurement noise covariance scalar
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 2.0;

/// Camera matrix center factor
pub const CAMERA_CENTER_FACTOR: f64 = 2.0;

/// Number of lens distortion coefficients (k1, k2, p1, p2)
pub const NUM_DISTORTION_COEFFS: usize = 4;

/// Maximum Levenberg-Marquardt iterations per pose solve
pub const DEFAULT_POSE_MAX_ITERATIONS: usize = 50;

/// Relative parameter step below which the pose solve is converged
pub const DEFAULT_POSE_CONVERGENCE_EPSILON: f64 = 1e-10;

/// Minimum number of correspondences for a pose solve
pub const MIN_POSE_POINTS: usize = 4;

/// Ratio of principal spreads below which image points count as collinear
pub const COLLINEARITY_RATIO: f64 = 1e-6;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
