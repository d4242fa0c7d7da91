//! Replay of recorded detector and mesher output.
//!
//! A recording stores, per frame, what the external models produced: face
//! boxes, coarse keypoints and scores in camera coordinates, plus optional
//! mesh landmarks in aligned-crop coordinates. Replaying it drives the full
//! pipeline without any inference runtime, which is how the CLI and the
//! integration tests exercise tracking end to end.

use crate::{
    alignment::SimilarityAligner,
    config::Config,
    frames::{BoundingBox, LandmarkSet, OriginalImage},
    letterbox::Letterbox,
    orchestrator::{
        Detection, FaceDetector, FaceMesher, FaceResult, FrameOrchestrator, FrameResult, MeshOutput,
        TrackingSession,
    },
    pose_estimation::{CameraModel, PoseEstimate},
    Error, Result,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

/// A recorded session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recording {
    /// Camera frame width in pixels
    pub width: u32,
    /// Camera frame height in pixels
    pub height: u32,
    /// Frames in capture order
    #[serde(default)]
    pub frames: Vec<RecordedFrame>,
}

/// Model output for one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordedFrame {
    /// Faces in detector order
    #[serde(default)]
    pub detections: Vec<RecordedDetection>,
}

/// One recorded face
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedDetection {
    /// `[x_min, y_min, x_max, y_max]` in camera coordinates
    pub bbox: [f64; 4],
    /// Flattened keypoints `x0, y0, x1, y1, ...` in camera coordinates
    pub landmarks: Vec<f64>,
    /// Detection confidence
    pub score: f32,
    /// Mesher output for this face
    #[serde(default)]
    pub mesh: Option<RecordedMesh>,
}

/// Recorded mesher output in aligned-crop coordinates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedMesh {
    /// Flattened landmarks `x0, y0, x1, y1, ...`
    pub landmarks: Vec<f64>,
    /// Face presence confidence
    #[serde(default = "default_mesh_confidence")]
    pub confidence: f32,
}

fn default_mesh_confidence() -> f32 {
    1.0
}

impl Recording {
    /// Load a recording from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a recording from YAML
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the YAML is malformed or the frame size is zero
    pub fn from_yaml(content: &str) -> Result<Self> {
        let recording: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::InvalidInput(format!("Failed to parse recording: {e}")))?;
        if recording.width == 0 || recording.height == 0 {
            return Err(Error::InvalidInput(format!(
                "Recording frame size {}x{} is empty",
                recording.width, recording.height
            )));
        }
        Ok(recording)
    }

    /// Split into a detector and a mesher replaying this recording.
    ///
    /// Both share one queue: each detected frame loads the recorded meshes of
    /// the faces the aligner can crop, which the mesher then hands out in face
    /// order. Faces that fail alignment never reach the mesher, so their
    /// recorded meshes are dropped up front.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if any flattened landmark list has odd length
    pub fn into_replay(self, config: &Config) -> Result<(ReplayDetector, ReplayMesher)> {
        let letterbox = Letterbox::for_dimensions(self.width, self.height, config.tracking.mirror);
        let aligner = SimilarityAligner::from_config(&config.aligner);
        let frames = self
            .frames
            .into_iter()
            .map(|frame| {
                frame
                    .detections
                    .into_iter()
                    .map(|d| replay_face(&letterbox, &aligner, d))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<VecDeque<_>>>()?;

        let pending = Rc::new(RefCell::new(VecDeque::new()));
        Ok((
            ReplayDetector {
                letterbox,
                frames,
                pending: Rc::clone(&pending),
            },
            ReplayMesher { pending },
        ))
    }
}

fn replay_face(
    letterbox: &Letterbox,
    aligner: &SimilarityAligner,
    recorded: RecordedDetection,
) -> Result<(Detection, Option<Option<MeshOutput>>)> {
    let [x_min, y_min, x_max, y_max] = recorded.bbox;
    let bbox = BoundingBox::<OriginalImage>::new(x_min, y_min, x_max, y_max);
    let landmarks = letterbox.to_padded(&LandmarkSet::<OriginalImage>::from_flat(&recorded.landmarks)?);
    let mesh = recorded
        .mesh
        .map(|mesh| {
            LandmarkSet::from_flat(&mesh.landmarks).map(|landmarks| MeshOutput {
                landmarks,
                confidence: mesh.confidence,
            })
        })
        .transpose()?;

    // Outer None: the face is never meshed and takes no queue slot
    let slot = match aligner.transform_for(&landmarks).and_then(|t| t.invert()) {
        Ok(_) => Some(mesh),
        Err(e) => {
            log::debug!("Recorded face cannot be aligned ({e}); dropping its mesh");
            None
        }
    };

    Ok((
        Detection {
            bbox: letterbox.bbox_to_padded(&bbox),
            landmarks,
            score: recorded.score,
        },
        slot,
    ))
}

type PendingMeshes = Rc<RefCell<VecDeque<Option<MeshOutput>>>>;

/// Detector that returns recorded detections frame by frame
#[derive(Debug)]
pub struct ReplayDetector {
    letterbox: Letterbox,
    frames: VecDeque<Vec<(Detection, Option<Option<MeshOutput>>)>>,
    pending: PendingMeshes,
}

impl ReplayDetector {
    /// Frames not yet replayed
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FaceDetector for ReplayDetector {
    fn detect(&mut self, padded: &RgbImage) -> Result<Vec<Detection>> {
        let side = self.letterbox.side;
        if padded.dimensions() != (side, side) {
            return Err(Error::Detector(format!(
                "Recording expects {side}x{side} padded frames, got {}x{}",
                padded.width(),
                padded.height()
            )));
        }
        let frame = self
            .frames
            .pop_front()
            .ok_or_else(|| Error::Detector("Recording exhausted".to_string()))?;

        let (detections, meshes): (Vec<_>, Vec<_>) = frame.into_iter().unzip();
        *self.pending.borrow_mut() = meshes.into_iter().flatten().collect();
        Ok(detections)
    }
}

/// Mesher that returns the recorded meshes of the current frame in face order
#[derive(Debug)]
pub struct ReplayMesher {
    pending: PendingMeshes,
}

impl FaceMesher for ReplayMesher {
    fn infer(&mut self, _crop: &RgbImage) -> Result<MeshOutput> {
        Ok(self
            .pending
            .borrow_mut()
            .pop_front()
            .flatten()
            .unwrap_or_else(|| MeshOutput {
                landmarks: LandmarkSet::empty(),
                confidence: 0.0,
            }))
    }
}

/// Serializable head pose
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoseReport {
    /// Rotation vector (axis-angle, radians)
    pub rotation: [f64; 3],
    /// Translation in model units
    pub translation: [f64; 3],
    /// Pitch, yaw, roll in degrees
    pub euler_degrees: [f64; 3],
    /// RMS reprojection error in pixels
    pub reprojection_error: f64,
}

impl From<&PoseEstimate> for PoseReport {
    fn from(pose: &PoseEstimate) -> Self {
        let euler = pose.euler_angles();
        Self {
            rotation: pose.rotation.into(),
            translation: pose.translation.into(),
            euler_degrees: euler.into(),
            reprojection_error: pose.reprojection_error,
        }
    }
}

/// Serializable per-face output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceReport {
    /// `[x_min, y_min, x_max, y_max]`
    pub bbox: [f64; 4],
    /// Detection confidence
    pub score: f32,
    /// Flattened coarse landmarks
    pub landmarks: Vec<f64>,
    /// Whether the landmarks are smoothed
    pub stabilized: bool,
    /// Flattened mesh landmarks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mesh: Option<Vec<f64>>,
    /// Head pose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseReport>,
}

impl From<&FaceResult> for FaceReport {
    fn from(face: &FaceResult) -> Self {
        Self {
            bbox: face.bbox.to_array(),
            score: face.score,
            landmarks: face.landmarks.to_flat(),
            stabilized: face.stabilized,
            mesh: face.mesh.as_ref().map(LandmarkSet::to_flat),
            pose: face.pose.as_ref().map(PoseReport::from),
        }
    }
}

/// Serializable per-frame output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameReport {
    /// Frame index
    pub frame: u64,
    /// Faces in detector order
    pub faces: Vec<FaceReport>,
    /// Frame-level failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&FrameResult> for FrameReport {
    fn from(result: &FrameResult) -> Self {
        Self {
            frame: result.frame_index,
            faces: result.faces.iter().map(FaceReport::from).collect(),
            error: None,
        }
    }
}

/// Replay a recording through the full pipeline
///
/// Frames are blank images of the recorded size; all geometry comes from the
/// recording. A failing frame is reported and replay continues.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the recording is malformed
pub fn run(recording: Recording, config: &Config) -> Result<Vec<FrameReport>> {
    let (width, height) = (recording.width, recording.height);
    let frame_count = recording.frames.len();
    log::info!("Replaying {frame_count} frames at {width}x{height}");

    let session = TrackingSession::new(config, CameraModel::from_image_size(width, height))?;
    let (detector, mesher) = recording.into_replay(config)?;
    let mut orchestrator = FrameOrchestrator::new(config, session, detector, mesher)?;

    let frame = RgbImage::new(width, height);
    let mut reports = Vec::with_capacity(frame_count);
    for _ in 0..frame_count {
        let index = orchestrator.frames_processed();
        let report = match orchestrator.process_frame(&frame) {
            Ok(result) => FrameReport::from(&result),
            Err(e) => {
                log::warn!("Frame {index} failed: {e}");
                FrameReport {
                    frame: index,
                    faces: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        reports.push(report);
    }

    orchestrator.into_session().teardown();
    Ok(reports)
}
