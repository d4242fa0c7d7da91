//! Configuration management for the landmark tracking pipeline

use crate::{
    constants::{
        DEFAULT_CROP_SIZE, DEFAULT_MEASUREMENT_NOISE, DEFAULT_POSE_CONVERGENCE_EPSILON,
        DEFAULT_POSE_MAX_ITERATIONS, DEFAULT_PROCESS_NOISE, DEFAULT_TARGET_LEFT_EYE, LEFT_EYE_INDEX,
        NUM_COARSE_LANDMARKS, RIGHT_EYE_INDEX,
    },
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Face alignment configuration
    pub aligner: AlignerConfig,

    /// Landmark stabilizer configuration
    pub stabilizer: StabilizerConfig,

    /// Pose solver configuration
    pub pose: PoseConfig,

    /// Per-frame orchestration configuration
    pub tracking: TrackingConfig,
}

/// Similarity alignment parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignerConfig {
    /// Side length of the square aligned crop in pixels
    pub crop_size: u32,

    /// Horizontal fraction of the crop where the left eye lands
    pub target_left_eye_x: f64,

    /// Vertical fraction of the crop where both eyes land
    pub target_left_eye_y: f64,

    /// Index of the left eye anchor in the detector landmarks
    pub left_anchor: usize,

    /// Index of the right eye anchor in the detector landmarks
    pub right_anchor: usize,
}

/// Kalman stabilizer bank parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StabilizerConfig {
    /// Number of tracked landmarks (one filter each)
    pub landmark_count: usize,

    /// Process noise covariance scalar
    pub process_noise: f64,

    /// Measurement noise covariance scalar
    pub measurement_noise: f64,
}

/// Pose solver parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoseConfig {
    /// Maximum Levenberg-Marquardt iterations per solve
    pub max_iterations: usize,

    /// Relative step size at which the solve is considered converged
    pub convergence_epsilon: f64,

    /// Seed each solve with the previous frame's pose
    pub warm_start: bool,

    /// Optional face model file; the built-in canonical model when unset
    pub face_model: Option<PathBuf>,
}

/// Which detected faces get their landmarks stabilized
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationPolicy {
    /// Stabilize only the first face in detector output order
    PrimaryFace,
    /// Emit raw landmarks for every face
    Disabled,
}

/// Per-frame orchestration parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Mirror the padded frame horizontally before detection
    pub mirror: bool,

    /// Stabilization policy
    pub stabilization: StabilizationPolicy,
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            crop_size: DEFAULT_CROP_SIZE,
            target_left_eye_x: DEFAULT_TARGET_LEFT_EYE.0,
            target_left_eye_y: DEFAULT_TARGET_LEFT_EYE.1,
            left_anchor: LEFT_EYE_INDEX,
            right_anchor: RIGHT_EYE_INDEX,
        }
    }
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            landmark_count: NUM_COARSE_LANDMARKS,
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_POSE_MAX_ITERATIONS,
            convergence_epsilon: DEFAULT_POSE_CONVERGENCE_EPSILON,
            warm_start: true,
            face_model: None,
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            mirror: true,
            stabilization: StabilizationPolicy::PrimaryFace,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)?;

        Ok(())
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` describing the first invalid value
    pub fn validate(&self) -> Result<()> {
        // Aligner
        if self.aligner.crop_size == 0 {
            return Err(Error::ConfigError("Crop size must be greater than 0".to_string()));
        }
        if !(self.aligner.target_left_eye_x > 0.0 && self.aligner.target_left_eye_x < 0.5) {
            return Err(Error::ConfigError(
                "Target left eye x must be between 0.0 and 0.5 (exclusive)".to_string(),
            ));
        }
        if !(self.aligner.target_left_eye_y > 0.0 && self.aligner.target_left_eye_y < 1.0) {
            return Err(Error::ConfigError(
                "Target left eye y must be between 0.0 and 1.0 (exclusive)".to_string(),
            ));
        }
        if self.aligner.left_anchor == self.aligner.right_anchor {
            return Err(Error::ConfigError("Left and right anchors must differ".to_string()));
        }

        // Stabilizer
        if self.stabilizer.landmark_count == 0 {
            return Err(Error::ConfigError(
                "Stabilizer landmark count must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("Process noise", self.stabilizer.process_noise),
            ("Measurement noise", self.stabilizer.measurement_noise),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::ConfigError(format!("{name} must be positive and finite")));
            }
        }

        // Pose
        if self.pose.max_iterations == 0 {
            return Err(Error::ConfigError(
                "Pose max iterations must be greater than 0".to_string(),
            ));
        }
        if !self.pose.convergence_epsilon.is_finite() || self.pose.convergence_epsilon <= 0.0 {
            return Err(Error::ConfigError(
                "Pose convergence epsilon must be positive".to_string(),
            ));
        }

        if let Some(path) = &self.pose.face_model {
            if path.as_os_str().is_empty() {
                return Err(Error::ConfigError("Face model path must not be empty".to_string()));
            }
        }

        Ok(())
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Face Landmark Tracking Configuration

# Similarity alignment of each detected face
aligner:
  crop_size: 192
  target_left_eye_x: 0.38
  target_left_eye_y: 0.38
  left_anchor: 0
  right_anchor: 1

# Kalman stabilizer bank (one filter per landmark)
stabilizer:
  landmark_count: 6
  process_noise: 0.2
  measurement_noise: 2.0

# Head pose solver
pose:
  max_iterations: 50
  convergence_epsilon: 1.0e-10
  warm_start: true
  # face_model: "assets/face_model.txt"

# Per-frame orchestration
tracking:
  mirror: true
  stabilization: primary_face
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_example_config_matches_defaults() {
        let parsed = Config::from_yaml(EXAMPLE_CONFIG).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed = Config::from_yaml("stabilizer:\n  process_noise: 0.05\n").unwrap();
        assert_eq!(parsed.stabilizer.process_noise, 0.05);
        assert_eq!(parsed.stabilizer.measurement_noise, DEFAULT_MEASUREMENT_NOISE);
        assert_eq!(parsed.aligner, AlignerConfig::default());
    }

    #[test]
    fn test_stabilization_policy_names() {
        let parsed = Config::from_yaml("tracking:\n  stabilization: disabled\n").unwrap();
        assert_eq!(parsed.tracking.stabilization, StabilizationPolicy::Disabled);
        assert!(parsed.tracking.mirror);
        assert!(Config::from_yaml("tracking:\n  stabilization: every_face\n").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.stabilizer.measurement_noise = 0.0;
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));

        let mut config = Config::default();
        config.stabilizer.process_noise = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aligner.target_left_eye_x = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.aligner.right_anchor = config.aligner.left_anchor;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.pose.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.stabilizer.landmark_count = 0;
        assert!(config.validate().is_err());
    }
}
