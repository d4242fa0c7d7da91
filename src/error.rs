//! Error types for the landmark tracking library.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// Anchor landmarks coincide or are collinear where a transform or pose
    /// solve needs a non-degenerate configuration
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// No face was detected in the frame
    #[error("No face detected")]
    NoDetection,

    /// A covariance or transform matrix is singular or produced non-finite values
    #[error("Numeric instability: {0}")]
    NumericInstability(String),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// External face detector failed
    #[error("Detector error: {0}")]
    Detector(String),

    /// External face mesher failed
    #[error("Mesher error: {0}")]
    Mesher(String),

    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error only affects the current face or frame.
    ///
    /// Configuration and I/O failures are the only errors a tracking loop
    /// should not simply log and continue past.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ConfigError(_) | Self::Io(_))
    }
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
