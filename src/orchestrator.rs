//! Per-frame face tracking pipeline.
//!
//! [`FrameOrchestrator`] pads each frame, runs the external detector, aligns
//! every detected face for the external mesher, maps the mesh back to camera
//! coordinates, solves head pose and stabilizes the primary face. State that
//! persists across frames lives in an explicitly owned [`TrackingSession`].

use crate::{
    alignment::SimilarityAligner,
    config::{Config, StabilizationPolicy},
    filters::StabilizerBank,
    frames::{AlignedCrop, BoundingBox, LandmarkSet, OriginalImage, PaddedImage},
    letterbox::Letterbox,
    pose_estimation::{CameraModel, FaceModel, PoseEstimate, PoseSolver},
    Error, Result,
};
use image::RgbImage;
use log::{debug, info, warn};

/// One face found by the detector, in padded-image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Face bounding box
    pub bbox: BoundingBox<PaddedImage>,
    /// Coarse keypoints in detector order, sides named as seen on the padded frame
    pub landmarks: LandmarkSet<PaddedImage>,
    /// Detection confidence
    pub score: f32,
}

/// Mesh landmarks predicted on an aligned crop
#[derive(Debug, Clone, PartialEq)]
pub struct MeshOutput {
    /// Dense landmarks in crop coordinates
    pub landmarks: LandmarkSet<AlignedCrop>,
    /// Face presence confidence
    pub confidence: f32,
}

/// External face detection model
pub trait FaceDetector {
    /// Detect faces in a square padded frame
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails
    fn detect(&mut self, padded: &RgbImage) -> Result<Vec<Detection>>;
}

/// External face mesh model
pub trait FaceMesher {
    /// Predict dense landmarks on an aligned face crop
    ///
    /// # Errors
    ///
    /// Returns an error if inference fails
    fn infer(&mut self, crop: &RgbImage) -> Result<MeshOutput>;
}

/// Tracking state that persists across frames.
///
/// Lifecycle: [`TrackingSession::new`] at session start, [`TrackingSession::reset`]
/// to re-initialize, [`TrackingSession::teardown`] at session end.
#[derive(Debug)]
pub struct TrackingSession {
    stabilizer: StabilizerBank<OriginalImage>,
    pose_solver: PoseSolver,
}

impl TrackingSession {
    /// Start a session, loading the face model named in the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the face model
    /// cannot be loaded
    pub fn new(config: &Config, camera: CameraModel) -> Result<Self> {
        let model = match &config.pose.face_model {
            Some(path) => FaceModel::from_file(path)?,
            None => FaceModel::canonical(),
        };
        Self::with_model(config, camera, model)
    }

    /// Start a session with an explicit face model.
    ///
    /// Detector keypoints are labelled on the padded frame. With mirroring
    /// enabled the session solves pose against the reflected model, so the
    /// keypoint the detector calls image-left matches the model point on
    /// that side of the camera image.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid or the model does
    /// not have one point per tracked landmark
    pub fn with_model(config: &Config, camera: CameraModel, model: FaceModel) -> Result<Self> {
        config.validate()?;
        if model.len() != config.stabilizer.landmark_count {
            return Err(Error::ConfigError(format!(
                "Face model has {} points but {} landmarks are tracked",
                model.len(),
                config.stabilizer.landmark_count
            )));
        }

        info!(
            "Starting tracking session: {} landmarks, q={}, r={}, mirror={}",
            config.stabilizer.landmark_count,
            config.stabilizer.process_noise,
            config.stabilizer.measurement_noise,
            config.tracking.mirror
        );

        let model = if config.tracking.mirror { model.mirrored() } else { model };
        Ok(Self {
            stabilizer: StabilizerBank::from_config(&config.stabilizer)?,
            pose_solver: PoseSolver::new(camera, model, &config.pose),
        })
    }

    /// Landmark stabilizers
    #[must_use]
    pub fn stabilizer(&self) -> &StabilizerBank<OriginalImage> {
        &self.stabilizer
    }

    /// Head pose solver
    #[must_use]
    pub fn pose_solver(&self) -> &PoseSolver {
        &self.pose_solver
    }

    /// Forget all cross-frame state
    pub fn reset(&mut self) {
        info!("Resetting tracking session");
        self.stabilizer.reset();
        self.pose_solver.reset();
    }

    /// End the session
    pub fn teardown(self) {
        info!("Tracking session ended");
    }

    /// Smooth the primary face's landmarks, falling back to what is available
    fn stabilize(&mut self, landmarks: &LandmarkSet<OriginalImage>) -> (LandmarkSet<OriginalImage>, bool) {
        match self.stabilizer.stabilize(landmarks) {
            Ok(smoothed) => (smoothed, true),
            Err(Error::NumericInstability(msg)) => {
                warn!("Partial stabilizer update: {msg}");
                (self.stabilizer.results(), true)
            }
            Err(e) => {
                warn!("Emitting raw landmarks: {e}");
                (landmarks.clone(), false)
            }
        }
    }
}

/// Everything produced for one face in one frame, in camera coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct FaceResult {
    /// Face bounding box
    pub bbox: BoundingBox<OriginalImage>,
    /// Detection confidence
    pub score: f32,
    /// Coarse landmarks, smoothed when `stabilized` is set
    pub landmarks: LandmarkSet<OriginalImage>,
    /// Whether `landmarks` came out of the stabilizer bank
    pub stabilized: bool,
    /// Dense mesh landmarks, when alignment and inference succeeded
    pub mesh: Option<LandmarkSet<OriginalImage>>,
    /// Mesher confidence for `mesh`
    pub mesh_confidence: Option<f32>,
    /// Head pose, when the solve succeeded
    pub pose: Option<PoseEstimate>,
}

/// Results for one frame, faces in detector order
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    /// Zero-based index of the frame within the session
    pub frame_index: u64,
    /// One entry per detected face
    pub faces: Vec<FaceResult>,
}

impl FrameResult {
    /// The first face in detector order
    ///
    /// # Errors
    ///
    /// Returns `NoDetection` for a frame without faces
    pub fn primary_face(&self) -> Result<&FaceResult> {
        self.faces.first().ok_or(Error::NoDetection)
    }
}

/// Drives detection, alignment, mesh inference, pose and stabilization per frame
pub struct FrameOrchestrator<D: FaceDetector, M: FaceMesher> {
    aligner: SimilarityAligner,
    session: TrackingSession,
    detector: D,
    mesher: M,
    mirror: bool,
    stabilization: StabilizationPolicy,
    frame_index: u64,
}

impl<D: FaceDetector, M: FaceMesher> FrameOrchestrator<D, M> {
    /// Assemble a pipeline around an existing session
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the configuration is invalid
    pub fn new(config: &Config, session: TrackingSession, detector: D, mesher: M) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            aligner: SimilarityAligner::from_config(&config.aligner),
            session,
            detector,
            mesher,
            mirror: config.tracking.mirror,
            stabilization: config.tracking.stabilization,
            frame_index: 0,
        })
    }

    /// The owned tracking session
    #[must_use]
    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    /// Mutable access to the session, e.g. to reset it between clips
    pub fn session_mut(&mut self) -> &mut TrackingSession {
        &mut self.session
    }

    /// Number of frames processed so far
    #[must_use]
    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    /// Stop the pipeline and hand back the session
    #[must_use]
    pub fn into_session(self) -> TrackingSession {
        self.session
    }

    /// Process one camera frame.
    ///
    /// Per-face failures are logged and leave that face's mesh or pose empty;
    /// they never abort the frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Detector` if detection fails, with no session state
    /// touched.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameResult> {
        let frame_index = self.frame_index;
        self.frame_index += 1;

        let letterbox = Letterbox::for_image(frame, self.mirror);
        let padded = letterbox.pad(frame);

        let detections = self.detector.detect(&padded).map_err(|e| match e {
            Error::Detector(_) => e,
            other => Error::Detector(other.to_string()),
        })?;

        if detections.is_empty() {
            debug!("Frame {frame_index}: no faces");
            return Ok(FrameResult {
                frame_index,
                faces: Vec::new(),
            });
        }
        debug!("Frame {frame_index}: {} faces", detections.len());

        let mut faces = Vec::with_capacity(detections.len());
        for (face_index, detection) in detections.iter().enumerate() {
            let mesh = match self.mesh_face(&padded, detection) {
                Ok(Some((mesh, confidence))) => Some((letterbox.to_original(&mesh), confidence)),
                Ok(None) => None,
                Err(e) => {
                    warn!("Frame {frame_index}, face {face_index}: no mesh: {e}");
                    None
                }
            };

            let coarse = letterbox.to_original(&detection.landmarks);
            let pose = match self.session.pose_solver.solve(&coarse) {
                Ok(pose) => Some(pose),
                Err(e) => {
                    warn!("Frame {frame_index}, face {face_index}: pose unavailable: {e}");
                    None
                }
            };

            let primary = face_index == 0 && self.stabilization == StabilizationPolicy::PrimaryFace;
            let (landmarks, stabilized) = if primary {
                self.session.stabilize(&coarse)
            } else {
                (coarse, false)
            };

            let (mesh, mesh_confidence) = match mesh {
                Some((landmarks, confidence)) => (Some(landmarks), Some(confidence)),
                None => (None, None),
            };

            faces.push(FaceResult {
                bbox: letterbox.bbox_to_original(&detection.bbox),
                score: detection.score,
                landmarks,
                stabilized,
                mesh,
                mesh_confidence,
                pose,
            });
        }

        Ok(FrameResult { frame_index, faces })
    }

    /// Align, infer and map the mesh back into padded space
    fn mesh_face(
        &mut self,
        padded: &RgbImage,
        detection: &Detection,
    ) -> Result<Option<(LandmarkSet<PaddedImage>, f32)>> {
        let (crop, transform) = self.aligner.align(padded, &detection.landmarks)?;
        let output = self.mesher.infer(&crop).map_err(|e| match e {
            Error::Mesher(_) => e,
            other => Error::Mesher(other.to_string()),
        })?;
        if output.landmarks.is_empty() {
            return Ok(None);
        }
        let mesh = self.aligner.inverse(&output.landmarks, &transform)?;
        Ok(Some((mesh, output.confidence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingDetector;

    impl FaceDetector for FailingDetector {
        fn detect(&mut self, _padded: &RgbImage) -> Result<Vec<Detection>> {
            Err(Error::InvalidInput("model not loaded".to_string()))
        }
    }

    struct NoMesh;

    impl FaceMesher for NoMesh {
        fn infer(&mut self, _crop: &RgbImage) -> Result<MeshOutput> {
            Ok(MeshOutput {
                landmarks: LandmarkSet::empty(),
                confidence: 0.0,
            })
        }
    }

    fn session() -> TrackingSession {
        TrackingSession::new(&Config::default(), CameraModel::from_image_size(64, 48)).unwrap()
    }

    #[test]
    fn test_detector_errors_are_wrapped() {
        let mut orchestrator =
            FrameOrchestrator::new(&Config::default(), session(), FailingDetector, NoMesh).unwrap();
        let result = orchestrator.process_frame(&RgbImage::new(64, 48));
        assert!(matches!(result, Err(Error::Detector(_))));
        assert_eq!(orchestrator.frames_processed(), 1);
    }

    #[test]
    fn test_model_size_must_match_landmarks() {
        let mut config = Config::default();
        config.stabilizer.landmark_count = 5;
        let result = TrackingSession::new(&config, CameraModel::from_image_size(64, 48));
        assert!(matches!(result, Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.aligner.crop_size = 0;
        assert!(FrameOrchestrator::new(&config, session(), FailingDetector, NoMesh).is_err());
    }
}
