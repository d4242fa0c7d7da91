//! Helper functions and utilities for tests
#![allow(dead_code)]

use face_landmark_tracking::{
    config::PoseConfig,
    frames::{BoundingBox, LandmarkSet, OriginalImage},
    letterbox::Letterbox,
    orchestrator::{Detection, FaceDetector, FaceMesher, MeshOutput},
    pose_estimation::{CameraModel, FaceModel, PoseEstimate, PoseSolver},
    Error, Result,
};
use image::RgbImage;
use nalgebra::Vector3;
use rand::{rngs::StdRng, Rng};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

/// Project the canonical face model into a 640x480 frame
pub fn synthetic_face(rotation: Vector3<f64>, translation: Vector3<f64>) -> Result<LandmarkSet<OriginalImage>> {
    let solver = PoseSolver::new(
        CameraModel::from_image_size(FRAME_WIDTH, FRAME_HEIGHT),
        FaceModel::canonical(),
        &PoseConfig::default(),
    );
    solver.project(&PoseEstimate {
        rotation,
        translation,
        reprojection_error: 0.0,
    })
}

/// A frontal face centred at `(x, y)` offset from the optical axis, 600 mm away
pub fn frontal_face(offset_x: f64, offset_y: f64) -> Result<LandmarkSet<OriginalImage>> {
    synthetic_face(Vector3::zeros(), Vector3::new(offset_x, offset_y, 600.0))
}

/// Camera-space keypoints of a frontal face as a detector labels them.
///
/// The detector names keypoints by their side of the padded frame it sees;
/// when that frame is mirrored, the image-left eye in camera coordinates is the
/// reflected model's.
pub fn detected_face(mirror: bool, offset_x: f64, offset_y: f64) -> Result<LandmarkSet<OriginalImage>> {
    let model = if mirror {
        FaceModel::canonical().mirrored()
    } else {
        FaceModel::canonical()
    };
    let solver = PoseSolver::new(
        CameraModel::from_image_size(FRAME_WIDTH, FRAME_HEIGHT),
        model,
        &PoseConfig::default(),
    );
    solver.project(&PoseEstimate {
        rotation: Vector3::zeros(),
        translation: Vector3::new(offset_x, offset_y, 600.0),
        reprojection_error: 0.0,
    })
}

/// Bounding box around a landmark set with a fixed margin
pub fn bbox_around(landmarks: &LandmarkSet<OriginalImage>) -> BoundingBox<OriginalImage> {
    let (mut x_min, mut y_min) = (f64::INFINITY, f64::INFINITY);
    let (mut x_max, mut y_max) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in landmarks {
        x_min = x_min.min(p.x);
        y_min = y_min.min(p.y);
        x_max = x_max.max(p.x);
        y_max = y_max.max(p.y);
    }
    BoundingBox::new(x_min - 10.0, y_min - 10.0, x_max + 10.0, y_max + 10.0)
}

/// Build a detection in padded space from camera-space landmarks
pub fn detection(letterbox: &Letterbox, landmarks: &LandmarkSet<OriginalImage>, score: f32) -> Detection {
    Detection {
        bbox: letterbox.bbox_to_padded(&bbox_around(landmarks)),
        landmarks: letterbox.to_padded(landmarks),
        score,
    }
}

/// Detector that replays a fixed script and counts its calls
#[derive(Debug, Default)]
pub struct ScriptedDetector {
    pub frames: VecDeque<Result<Vec<Detection>>>,
    pub calls: Rc<RefCell<usize>>,
}

impl ScriptedDetector {
    pub fn new(frames: Vec<Result<Vec<Detection>>>) -> Self {
        Self {
            frames: frames.into(),
            calls: Rc::default(),
        }
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _padded: &RgbImage) -> Result<Vec<Detection>> {
        *self.calls.borrow_mut() += 1;
        self.frames
            .pop_front()
            .unwrap_or_else(|| Err(Error::Detector("script exhausted".to_string())))
    }
}

/// Mesher that returns the same crop-space landmarks for every face
#[derive(Debug, Clone)]
pub struct FixedMesher {
    pub landmarks: LandmarkSet<face_landmark_tracking::frames::AlignedCrop>,
    pub calls: Rc<RefCell<usize>>,
}

impl FixedMesher {
    pub fn new(points: &[(f64, f64)]) -> Self {
        Self {
            landmarks: LandmarkSet::from_tuples(points),
            calls: Rc::default(),
        }
    }
}

impl FaceMesher for FixedMesher {
    fn infer(&mut self, crop: &RgbImage) -> Result<MeshOutput> {
        *self.calls.borrow_mut() += 1;
        if crop.width() == 0 {
            return Err(Error::Mesher("empty crop".to_string()));
        }
        Ok(MeshOutput {
            landmarks: self.landmarks.clone(),
            confidence: 0.95,
        })
    }
}

/// Standard normal sample via Box-Muller
pub fn gaussian(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Sample variance of a series
pub fn variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Blank camera frame
pub fn blank_frame() -> RgbImage {
    RgbImage::new(FRAME_WIDTH, FRAME_HEIGHT)
}

/// Assert two landmark sets agree within `tolerance`
pub fn assert_landmarks_close<F: face_landmark_tracking::frames::CoordinateFrame>(
    actual: &LandmarkSet<F>,
    expected: &LandmarkSet<F>,
    tolerance: f64,
) {
    let distance = actual
        .max_distance(expected)
        .unwrap_or_else(|| panic!("landmark counts differ: {} vs {}", actual.len(), expected.len()));
    assert!(distance < tolerance, "landmarks differ by {distance}");
}
