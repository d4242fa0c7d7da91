//! Facial landmark tracking core.
//!
//! This library provides the geometric and filtering work behind a per-frame
//! face tracking pipeline:
//! - Similarity alignment of detected faces into a fixed-size crop, and the
//!   inverse mapping of mesh landmarks back out of it
//! - Constant-velocity Kalman stabilization of tracked landmarks
//! - Head pose estimation by minimising reprojection error against a 3-D face model
//!
//! Face detection and mesh inference are external; they plug in through the
//! [`orchestrator::FaceDetector`] and [`orchestrator::FaceMesher`] traits.
//!
//! The pipeline for each frame:
//! 1. Letterbox the frame to a square (optionally mirrored)
//! 2. Detect faces and their coarse keypoints
//! 3. Align each face, run the mesher on the crop and map the mesh back
//! 4. Solve head pose from the coarse keypoints
//! 5. Stabilize the primary face's keypoints
//!
//! # Examples
//!
//! ## Stabilizing Landmarks
//!
//! ```no_run
//! use face_landmark_tracking::{filters::StabilizerBank, frames::{LandmarkSet, OriginalImage}};
//!
//! # fn main() -> face_landmark_tracking::Result<()> {
//! let mut bank = StabilizerBank::new(2, 0.2, 2.0);
//!
//! let raw = LandmarkSet::<OriginalImage>::from_tuples(&[(120.0, 80.0), (160.0, 82.0)]);
//! let smoothed = bank.stabilize(&raw)?;
//! println!("Smoothed first landmark: {:?}", smoothed.get(0));
//!
//! // Start over for a new clip
//! bank.reset();
//! # Ok(())
//! # }
//! ```
//!
//! ## Solving Head Pose
//!
//! ```no_run
//! use face_landmark_tracking::{
//!     config::PoseConfig,
//!     frames::{LandmarkSet, OriginalImage},
//!     pose_estimation::{CameraModel, FaceModel, PoseSolver},
//! };
//!
//! # fn main() -> face_landmark_tracking::Result<()> {
//! let camera = CameraModel::from_image_size(640, 480);
//! let mut solver = PoseSolver::new(camera, FaceModel::canonical(), &PoseConfig::default());
//!
//! let keypoints = LandmarkSet::<OriginalImage>::from_tuples(&[
//!     (286.0, 208.0),
//!     (354.0, 208.0),
//!     (320.0, 241.0),
//!     (320.0, 277.0),
//!     (250.0, 233.0),
//!     (390.0, 233.0),
//! ]);
//! let pose = solver.solve(&keypoints)?;
//! let angles = pose.euler_angles();
//! println!("Pitch: {:.2}°, Yaw: {:.2}°, Roll: {:.2}°", angles[0], angles[1], angles[2]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Replaying a Recording
//!
//! ```no_run
//! use face_landmark_tracking::{config::Config, replay::{self, Recording}};
//!
//! # fn main() -> face_landmark_tracking::Result<()> {
//! let recording = Recording::from_file("recording.yaml")?;
//! for frame in replay::run(recording, &Config::default())? {
//!     println!("Frame {}: {} faces", frame.frame, frame.faces.len());
//! }
//! # Ok(())
//! # }
//! ```

/// Tagged landmark sets and boxes for the three coordinate frames
pub mod frames;

/// Square letterbox padding and its inverse
pub mod letterbox;

/// Two-anchor similarity alignment of face crops
pub mod alignment;

/// Kalman landmark stabilizers
pub mod filters;

/// Head pose solver
pub mod pose_estimation;

/// Per-frame pipeline and tracking session
pub mod orchestrator;

/// Replay of recorded detector and mesher output
pub mod replay;

/// Utility functions for image sampling and numeric conversions
pub mod utils;

/// Error types and result handling
pub mod error;

/// Constants used throughout the library
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
