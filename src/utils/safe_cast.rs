//! Safe numeric conversions for pixel coordinates and landmark counts

/// Convert a floored coordinate into a pixel index if it lies inside `0..len`
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Range checked before the cast
pub fn pixel_index(value: f64, len: u32) -> Option<u32> {
    if value.is_finite() && value >= 0.0 && value < f64::from(len) {
        Some(value as u32)
    } else {
        None
    }
}

/// Round and clamp a channel value into `0..=255`, mapping NaN to 0
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamping ensures safe truncation
pub fn f64_to_u8_clamp(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Convert a landmark count or index into `f64`
#[must_use]
#[allow(clippy::cast_precision_loss)] // Landmark counts are far below 2^52
pub fn usize_to_f64(value: usize) -> f64 {
    value as f64
}
