//! Alignment and frame mapping across the padded, crop and camera frames

use face_landmark_tracking::{
    alignment::SimilarityAligner,
    frames::{LandmarkSet, OriginalImage, PaddedImage},
    letterbox::Letterbox,
    Error,
};
use image::{Rgb, RgbImage};

#[test]
fn test_crop_places_eye_pixels_on_targets() {
    let mut image = RgbImage::new(400, 400);
    for (x, y) in [(150, 220), (230, 180)] {
        for dx in 0..3 {
            for dy in 0..3 {
                image.put_pixel(x + dx - 1, y + dy - 1, Rgb([255, 255, 255]));
            }
        }
    }

    let aligner = SimilarityAligner::new(128, (0.3, 0.4), 0, 1);
    let landmarks = LandmarkSet::<PaddedImage>::from_tuples(&[(150.0, 220.0), (230.0, 180.0)]);
    let (crop, transform) = aligner.align(&image, &landmarks).unwrap();

    // Baseline of ~89 px mapped onto 0.4 * 128 px
    assert!((transform.scale() - 51.2 / 80.0f64.hypot(40.0)).abs() < 1e-9);
    assert!((transform.angle_degrees() + 40.0f64.atan2(80.0).to_degrees()).abs() < 1e-9);

    let left = (0.3 * 128.0f64).round() as u32;
    let right = (0.7 * 128.0f64).round() as u32;
    let row = (0.4 * 128.0f64).round() as u32;
    assert_eq!(*crop.get_pixel(left, row), Rgb([255, 255, 255]));
    assert_eq!(*crop.get_pixel(right, row), Rgb([255, 255, 255]));
    assert_eq!(*crop.get_pixel(64, 120), Rgb([0, 0, 0]));
}

#[test]
fn test_round_trip_through_all_frames() {
    for mirror in [false, true] {
        let letterbox = Letterbox::for_dimensions(1280, 720, mirror);
        let original = LandmarkSet::<OriginalImage>::from_tuples(&[
            (600.0, 300.0),
            (700.0, 320.0),
            (650.0, 380.0),
            (640.0, 430.0),
            (520.0, 330.0),
            (780.0, 350.0),
        ]);

        let aligner = SimilarityAligner::default();
        let padded = letterbox.to_padded(&original);
        let transform = aligner.transform_for(&padded).unwrap();
        let in_crop = transform.apply(&padded);
        let back = letterbox.to_original(&aligner.inverse(&in_crop, &transform).unwrap());

        // Tolerance in normalized crop units
        let normalized = back.max_distance(&original).unwrap() * transform.scale() / 192.0;
        assert!(normalized <= 1e-3);
        assert!(back.max_distance(&original).unwrap() < 1e-9);
    }
}

#[test]
fn test_degenerate_anchors_are_reported() {
    let aligner = SimilarityAligner::default();
    let image = RgbImage::new(64, 64);
    let landmarks = LandmarkSet::<PaddedImage>::from_tuples(&[(10.0, 10.0), (10.0, 10.0), (30.0, 40.0)]);
    let result = aligner.align(&image, &landmarks);
    assert!(matches!(result, Err(Error::DegenerateGeometry(_))));
    assert!(result.unwrap_err().is_recoverable());
}
