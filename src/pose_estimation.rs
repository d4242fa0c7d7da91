use crate::{
    config::PoseConfig,
    constants::{CAMERA_CENTER_FACTOR, COLLINEARITY_RATIO, EPSILON, MIN_POSE_POINTS, NUM_DISTORTION_COEFFS},
    frames::{LandmarkSet, OriginalImage},
    utils::safe_cast::usize_to_f64,
    Error, Result,
};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Point2, Point3, Rotation3, Vector3, Vector6};
use std::fs;
use std::path::Path;

const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;
const JACOBIAN_STEP: f64 = 1e-6;

/// Pinhole camera intrinsics with Brown-Conrady distortion
#[derive(Debug, Clone, PartialEq)]
pub struct CameraModel {
    /// Focal length in pixels along x
    pub focal_x: f64,
    /// Focal length in pixels along y
    pub focal_y: f64,
    /// Principal point x
    pub center_x: f64,
    /// Principal point y
    pub center_y: f64,
    /// Distortion coefficients (k1, k2, p1, p2)
    pub distortion: [f64; NUM_DISTORTION_COEFFS],
}

impl CameraModel {
    /// Approximate intrinsics for a frame of the given size.
    ///
    /// Uses the image width as focal length, the image center as principal
    /// point and no lens distortion.
    #[must_use]
    pub fn from_image_size(width: u32, height: u32) -> Self {
        let focal_length = f64::from(width);
        Self {
            focal_x: focal_length,
            focal_y: focal_length,
            center_x: f64::from(width) / CAMERA_CENTER_FACTOR,
            center_y: f64::from(height) / CAMERA_CENTER_FACTOR,
            distortion: [0.0; NUM_DISTORTION_COEFFS],
        }
    }

    /// Replace the distortion coefficients
    #[must_use]
    pub fn with_distortion(mut self, distortion: [f64; NUM_DISTORTION_COEFFS]) -> Self {
        self.distortion = distortion;
        self
    }

    /// The 3x3 intrinsic matrix
    #[must_use]
    pub fn intrinsic_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal_x,
            0.0,
            self.center_x,
            0.0,
            self.focal_y,
            self.center_y,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Project a camera-space point to pixels, `None` if it is behind the camera
    #[must_use]
    pub fn project(&self, point: &Point3<f64>) -> Option<Point2<f64>> {
        if point.z <= EPSILON {
            return None;
        }
        let x = point.x / point.z;
        let y = point.y / point.z;

        let [k1, k2, p1, p2] = self.distortion;
        let r2 = x * x + y * y;
        let radial = 1.0 + k1 * r2 + k2 * r2 * r2;
        let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;

        Some(Point2::new(
            self.focal_x * xd + self.center_x,
            self.focal_y * yd + self.center_y,
        ))
    }
}

/// 3-D reference points matching the tracked landmarks, in millimetres.
///
/// Axes follow the camera: x right, y down, z away from the viewer, so an
/// identity rotation is a face looking straight into the camera.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceModel {
    points: Vec<Point3<f64>>,
}

impl FaceModel {
    /// Model for the six detector keypoints: image-left eye, image-right eye,
    /// nose tip, mouth center, image-left ear tragion, image-right ear tragion.
    ///
    /// "Image-left" refers to the frame the detector saw. When that frame is
    /// mirrored, solve against [`Self::mirrored`] instead.
    #[must_use]
    pub fn canonical() -> Self {
        Self {
            points: vec![
                Point3::new(-32.0, -30.0, 0.0),
                Point3::new(32.0, -30.0, 0.0),
                Point3::new(0.0, 0.0, -25.0),
                Point3::new(0.0, 35.0, -5.0),
                Point3::new(-75.0, -10.0, 80.0),
                Point3::new(75.0, -10.0, 80.0),
            ],
        }
    }

    /// Build a model from explicit points
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than the minimum number of points are given
    /// or any coordinate is non-finite
    pub fn new(points: Vec<Point3<f64>>) -> Result<Self> {
        if points.len() < MIN_POSE_POINTS {
            return Err(Error::InvalidInput(format!(
                "Face model needs at least {MIN_POSE_POINTS} points, got {}",
                points.len()
            )));
        }
        if points.iter().any(|p| p.iter().any(|v| !v.is_finite())) {
            return Err(Error::InvalidInput("Face model contains non-finite coordinates".to_string()));
        }
        Ok(Self { points })
    }

    /// Load a model from a text file with one coordinate value per line
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or has an invalid format
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        log::info!("Loading face model from {}", path.as_ref().display());
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse model points from text, one value per line, x y z per point
    fn parse(content: &str) -> Result<Self> {
        let values: Vec<f64> = content
            .lines()
            .filter_map(|line| line.trim().parse::<f64>().ok())
            .collect();

        if values.is_empty() || values.len() % 3 != 0 {
            return Err(Error::InvalidInput(format!(
                "Expected a multiple of 3 coordinate values, got {}",
                values.len()
            )));
        }

        Self::new(
            values
                .chunks_exact(3)
                .map(|xyz| Point3::new(xyz[0], xyz[1], xyz[2]))
                .collect(),
        )
    }

    /// The model reflected across its vertical plane (`x -> -x`).
    ///
    /// Keypoints picked on a mirrored frame label each feature by its mirrored
    /// side, which in camera coordinates is the reflected face.
    #[must_use]
    pub fn mirrored(&self) -> Self {
        Self {
            points: self.points.iter().map(|p| Point3::new(-p.x, p.y, p.z)).collect(),
        }
    }

    /// Model points in landmark order
    #[must_use]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Number of model points
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the model has no points
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for FaceModel {
    fn default() -> Self {
        Self::canonical()
    }
}

/// Head pose: model-to-camera rotation (axis-angle) and translation
#[derive(Debug, Clone, PartialEq)]
pub struct PoseEstimate {
    /// Rotation vector; direction is the axis, norm the angle in radians
    pub rotation: Vector3<f64>,
    /// Translation of the model origin in camera space
    pub translation: Vector3<f64>,
    /// RMS reprojection error in pixels
    pub reprojection_error: f64,
}

impl PoseEstimate {
    /// Rotation as a matrix
    #[must_use]
    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        Rotation3::new(self.rotation)
    }

    /// Pitch, yaw and roll in degrees
    #[must_use]
    pub fn euler_angles(&self) -> Vector3<f64> {
        rotation_matrix_to_euler(self.rotation_matrix().matrix())
    }

    fn params(&self) -> Vector6<f64> {
        Vector6::new(
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        )
    }
}

/// Convert a rotation matrix to pitch, yaw and roll in degrees
#[must_use]
pub fn rotation_matrix_to_euler(rotation_matrix: &Matrix3<f64>) -> Vector3<f64> {
    let r13 = rotation_matrix[(0, 2)];
    let r21 = rotation_matrix[(1, 0)];
    let r22 = rotation_matrix[(1, 1)];
    let r23 = rotation_matrix[(1, 2)];
    let r33 = rotation_matrix[(2, 2)];

    let pitch = (-r23).clamp(-1.0, 1.0).asin();
    let yaw = r13.atan2(r33);
    let roll = r21.atan2(r22);

    Vector3::new(pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}

/// Head pose solver minimising reprojection error with Levenberg-Marquardt.
///
/// The last successful solution seeds the next solve when warm starting is
/// enabled.
#[derive(Debug, Clone)]
pub struct PoseSolver {
    camera: CameraModel,
    model: FaceModel,
    max_iterations: usize,
    convergence_epsilon: f64,
    warm_start: bool,
    previous: Option<PoseEstimate>,
}

impl PoseSolver {
    /// Create a solver for a camera and face model
    #[must_use]
    pub fn new(camera: CameraModel, model: FaceModel, config: &PoseConfig) -> Self {
        log::info!(
            "Initializing PoseSolver: {} model points, focal {:.1}",
            model.len(),
            camera.focal_x
        );
        Self {
            camera,
            model,
            max_iterations: config.max_iterations,
            convergence_epsilon: config.convergence_epsilon,
            warm_start: config.warm_start,
            previous: None,
        }
    }

    /// Camera intrinsics used for every solve
    #[must_use]
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Reference face model
    #[must_use]
    pub fn model(&self) -> &FaceModel {
        &self.model
    }

    /// The pose that will seed the next solve, if any
    #[must_use]
    pub fn last_pose(&self) -> Option<&PoseEstimate> {
        self.previous.as_ref()
    }

    /// Forget the warm start
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Solve for the head pose from landmarks in camera-image space.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the landmark count differs from the model or
    /// a landmark is non-finite, `DegenerateGeometry` for too few or collinear
    /// landmarks, and `NumericInstability` if no finite solution is found. The
    /// warm start is only replaced on success.
    pub fn solve(&mut self, landmarks: &LandmarkSet<OriginalImage>) -> Result<PoseEstimate> {
        if landmarks.len() != self.model.len() {
            return Err(Error::InvalidInput(format!(
                "Expected {} landmarks, got {}",
                self.model.len(),
                landmarks.len()
            )));
        }
        if landmarks.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(Error::InvalidInput("Landmarks contain non-finite values".to_string()));
        }
        check_spread(landmarks.points())?;

        let image_points = landmarks.points();
        let warm = if self.warm_start { self.previous.as_ref() } else { None };

        let (params, cost) = match warm {
            Some(previous) => self.refine(previous.params(), image_points).or_else(|e| {
                log::debug!("Warm-started pose solve failed ({e}), retrying from default guess");
                self.refine(self.default_guess(image_points), image_points)
            }),
            None => self.refine(self.default_guess(image_points), image_points),
        }?;

        let rotation = Rotation3::new(Vector3::new(params[0], params[1], params[2])).scaled_axis();
        let pose = PoseEstimate {
            rotation,
            translation: Vector3::new(params[3], params[4], params[5]),
            reprojection_error: (cost / usize_to_f64(image_points.len())).sqrt(),
        };

        log::debug!(
            "Pose solved: reprojection error {:.3} px, depth {:.1}",
            pose.reprojection_error,
            pose.translation.z
        );

        self.previous = Some(pose.clone());
        Ok(pose)
    }

    /// Project the face model under `pose` into the image
    ///
    /// # Errors
    ///
    /// Returns `NumericInstability` if a model point falls behind the camera
    pub fn project(&self, pose: &PoseEstimate) -> Result<LandmarkSet<OriginalImage>> {
        let rotation = pose.rotation_matrix();
        self.model
            .points()
            .iter()
            .map(|p| {
                self.camera
                    .project(&(rotation * p + pose.translation))
                    .ok_or_else(|| Error::NumericInstability("Model point projects behind the camera".to_string()))
            })
            .collect::<Result<Vec<_>>>()
            .map(LandmarkSet::new)
    }

    /// Zero rotation with a weak-perspective translation from the landmark spread
    fn default_guess(&self, image_points: &[Point2<f64>]) -> Vector6<f64> {
        let n = usize_to_f64(image_points.len());
        let image_center = image_points.iter().fold(Vector3::zeros(), |acc: Vector3<f64>, p| {
            acc + Vector3::new(p.x, p.y, 0.0)
        }) / n;
        let model_center = self
            .model
            .points()
            .iter()
            .fold(Vector3::zeros(), |acc: Vector3<f64>, p| acc + p.coords)
            / n;

        let image_spread = (image_points
            .iter()
            .map(|p| (p.x - image_center.x).powi(2) + (p.y - image_center.y).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();
        let model_spread = (self
            .model
            .points()
            .iter()
            .map(|p| (p.x - model_center.x).powi(2) + (p.y - model_center.y).powi(2))
            .sum::<f64>()
            / n)
            .sqrt();

        let focal = (self.camera.focal_x + self.camera.focal_y) / 2.0;
        let depth = focal * model_spread / image_spread.max(EPSILON);

        Vector6::new(
            0.0,
            0.0,
            0.0,
            (image_center.x - self.camera.center_x) * depth / self.camera.focal_x - model_center.x,
            (image_center.y - self.camera.center_y) * depth / self.camera.focal_y - model_center.y,
            depth - model_center.z,
        )
    }

    fn residuals(&self, params: &Vector6<f64>, image_points: &[Point2<f64>]) -> Option<DVector<f64>> {
        let rotation = Rotation3::new(Vector3::new(params[0], params[1], params[2]));
        let translation = Vector3::new(params[3], params[4], params[5]);

        let mut residuals = DVector::zeros(2 * image_points.len());
        for (i, (model, observed)) in self.model.points().iter().zip(image_points).enumerate() {
            let projected = self.camera.project(&(rotation * model + translation))?;
            residuals[2 * i] = projected.x - observed.x;
            residuals[2 * i + 1] = projected.y - observed.y;
        }
        Some(residuals)
    }

    fn jacobian(&self, params: &Vector6<f64>, image_points: &[Point2<f64>]) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(2 * image_points.len(), 6);
        for j in 0..6 {
            let step = JACOBIAN_STEP * params[j].abs().max(1.0);
            let mut plus = *params;
            let mut minus = *params;
            plus[j] += step;
            minus[j] -= step;
            let column = (self.residuals(&plus, image_points)? - self.residuals(&minus, image_points)?) / (2.0 * step);
            jacobian.set_column(j, &column);
        }
        Some(jacobian)
    }

    /// Levenberg-Marquardt refinement, returning the parameters and squared error
    fn refine(&self, initial: Vector6<f64>, image_points: &[Point2<f64>]) -> Result<(Vector6<f64>, f64)> {
        let mut params = initial;
        let mut residual = self
            .residuals(&params, image_points)
            .ok_or_else(|| Error::NumericInstability("Initial pose places the face behind the camera".to_string()))?;
        let mut cost = residual.norm_squared();
        let mut lambda = LAMBDA_INITIAL;

        for _ in 0..self.max_iterations {
            if cost < EPSILON * EPSILON {
                break;
            }
            let jacobian = self
                .jacobian(&params, image_points)
                .ok_or_else(|| Error::NumericInstability("Pose Jacobian is undefined".to_string()))?;
            let jt = jacobian.transpose();
            let jtj = (&jt * &jacobian).fixed_view::<6, 6>(0, 0).into_owned();
            let gradient = (&jt * &residual).fixed_rows::<6>(0).into_owned();

            let mut improved = false;
            let mut converged = false;
            while lambda < LAMBDA_MAX {
                let mut damped = jtj;
                for k in 0..6 {
                    damped[(k, k)] += lambda * jtj[(k, k)].max(EPSILON);
                }
                let Some(cholesky) = damped.cholesky() else {
                    lambda *= 10.0;
                    continue;
                };
                let step = cholesky.solve(&(-gradient));
                let candidate = params + step;

                match self.residuals(&candidate, image_points) {
                    Some(r) if r.norm_squared().is_finite() && r.norm_squared() < cost => {
                        converged = step.norm() <= self.convergence_epsilon * (params.norm() + self.convergence_epsilon);
                        params = candidate;
                        cost = r.norm_squared();
                        residual = r;
                        lambda = (lambda / 10.0).max(LAMBDA_MIN);
                        improved = true;
                        break;
                    }
                    _ => lambda *= 10.0,
                }
            }

            if !improved || converged {
                break;
            }
        }

        if !cost.is_finite() || params.iter().any(|v| !v.is_finite()) {
            return Err(Error::NumericInstability("Pose solve diverged".to_string()));
        }
        if params[5] <= 0.0 {
            return Err(Error::NumericInstability(
                "Pose solve converged behind the camera".to_string(),
            ));
        }
        Ok((params, cost))
    }
}

/// Reject landmark sets whose points all lie on one line
fn check_spread(points: &[Point2<f64>]) -> Result<()> {
    if points.len() < MIN_POSE_POINTS {
        return Err(Error::DegenerateGeometry(format!(
            "Pose solve needs at least {MIN_POSE_POINTS} landmarks, got {}",
            points.len()
        )));
    }

    let n = usize_to_f64(points.len());
    let (mx, my) = points.iter().fold((0.0, 0.0), |(x, y), p| (x + p.x, y + p.y));
    let (mx, my) = (mx / n, my / n);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let (dx, dy) = (p.x - mx, p.y - my);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    let eigen = Matrix2::new(sxx, sxy, sxy, syy).symmetric_eigen();
    let major = eigen.eigenvalues.max();
    let minor = eigen.eigenvalues.min();
    if major <= EPSILON || minor <= major * COLLINEARITY_RATIO {
        return Err(Error::DegenerateGeometry("Pose landmarks are collinear".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver() -> PoseSolver {
        PoseSolver::new(
            CameraModel::from_image_size(640, 480),
            FaceModel::canonical(),
            &PoseConfig::default(),
        )
    }

    #[test]
    fn test_euler_angle_conversion() {
        let angles = rotation_matrix_to_euler(&Matrix3::identity());
        assert!(angles.iter().all(|a| a.abs() < 1e-9));

        let yaw_only = Rotation3::from_euler_angles(0.0, 0.3, 0.0);
        let angles = rotation_matrix_to_euler(yaw_only.matrix());
        assert!((angles[1] - 0.3f64.to_degrees()).abs() < 1e-9);
        assert!(angles[0].abs() < 1e-9);
    }

    #[test]
    fn test_camera_from_image_size() {
        let camera = CameraModel::from_image_size(640, 480);
        let k = camera.intrinsic_matrix();
        assert_eq!(k[(0, 0)], 640.0);
        assert_eq!(k[(1, 1)], 640.0);
        assert_eq!(k[(0, 2)], 320.0);
        assert_eq!(k[(1, 2)], 240.0);
        assert_eq!(camera.distortion, [0.0; 4]);
    }

    #[test]
    fn test_project_behind_camera() {
        let camera = CameraModel::from_image_size(640, 480);
        assert!(camera.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
        let center = camera.project(&Point3::new(0.0, 0.0, 10.0)).unwrap();
        assert_eq!((center.x, center.y), (320.0, 240.0));
    }

    #[test]
    fn test_distortion_moves_off_axis_points() {
        let camera = CameraModel::from_image_size(640, 480).with_distortion([0.1, 0.0, 0.0, 0.0]);
        let p = camera.project(&Point3::new(1.0, 0.0, 2.0)).unwrap();
        // x = 0.5, r^2 = 0.25, radial factor 1.025
        assert!((p.x - (320.0 + 640.0 * 0.5 * 1.025)).abs() < 1e-9);
        assert!((p.y - 240.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_model_points() {
        let points = FaceModel::parse("0.0\n1.0\n2.0\n3.0\n4.0\n5.0\n6.0\n7.0\n8.0\n9.0\n10.0\n11.0\n").unwrap();
        assert_eq!(points.len(), 4);
        assert_eq!(points.points()[0], Point3::new(0.0, 1.0, 2.0));

        assert!(FaceModel::parse("1.0\n2.0\n3.0\n4.0").is_err());
        assert!(FaceModel::parse("").is_err());
        // Three points is below the minimum
        assert!(FaceModel::parse("1\n2\n3\n4\n5\n6\n7\n8\n9").is_err());
    }

    #[test]
    fn test_collinear_landmarks_are_degenerate() {
        let mut solver = solver();
        let line = LandmarkSet::<OriginalImage>::from_tuples(&[
            (100.0, 100.0),
            (110.0, 110.0),
            (120.0, 120.0),
            (130.0, 130.0),
            (140.0, 140.0),
            (150.0, 150.0),
        ]);
        assert!(matches!(solver.solve(&line), Err(Error::DegenerateGeometry(_))));
        assert!(solver.last_pose().is_none());
    }

    #[test]
    fn test_wrong_landmark_count() {
        let mut solver = solver();
        let few = LandmarkSet::<OriginalImage>::from_tuples(&[(1.0, 2.0), (3.0, 5.0), (8.0, 1.0)]);
        assert!(matches!(solver.solve(&few), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_mirrored_model_reflects_x() {
        let model = FaceModel::canonical();
        let mirrored = model.mirrored();
        assert_eq!(mirrored.len(), model.len());
        for (a, b) in model.points().iter().zip(mirrored.points()) {
            assert_eq!((a.x, a.y, a.z), (-b.x, b.y, b.z));
        }
        // The canonical face is symmetric, so reflecting swaps the eye pair
        assert_eq!(mirrored.points()[0], model.points()[1]);
        assert_eq!(mirrored.mirrored(), model);
    }

    #[test]
    fn test_default_guess_is_frontal() {
        let solver = solver();
        let truth = PoseEstimate {
            rotation: Vector3::zeros(),
            translation: Vector3::new(0.0, 0.0, 600.0),
            reprojection_error: 0.0,
        };
        let projected = solver.project(&truth).unwrap();
        let guess = solver.default_guess(projected.points());
        assert!(guess.fixed_rows::<3>(0).norm() < 1e-12);
        assert!(guess[5] > 300.0 && guess[5] < 1200.0);
    }
}
