//! Kalman stabilization of tracked landmarks.
//!
//! Raw detector landmarks jitter from frame to frame. Each tracked landmark is
//! smoothed by its own constant-velocity Kalman filter, and the filters are
//! grouped in a [`StabilizerBank`] owned by the tracking session.

/// Constant-velocity Kalman filter for one landmark
pub mod kalman;

/// Fixed-size bank of per-landmark filters
pub mod bank;

pub use bank::StabilizerBank;
pub use kalman::ScalarKalmanStabilizer;
