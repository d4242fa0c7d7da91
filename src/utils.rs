//! Utility functions for pixel sampling and numeric conversions.

pub mod safe_cast;

use image::{Rgb, RgbImage};
use safe_cast::{f64_to_u8_clamp, pixel_index};

/// Sample an RGB image at a sub-pixel location with bilinear interpolation.
///
/// Neighbours outside the image contribute black, so points more than one
/// pixel outside the image sample to zero.
#[must_use]
pub fn bilinear_sample(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    if !x.is_finite() || !y.is_finite() {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;

    let fetch = |px: f64, py: f64| -> [f64; 3] {
        match (pixel_index(px, image.width()), pixel_index(py, image.height())) {
            (Some(ix), Some(iy)) => {
                let p = image.get_pixel(ix, iy);
                [f64::from(p[0]), f64::from(p[1]), f64::from(p[2])]
            }
            _ => [0.0; 3],
        }
    };

    let tl = fetch(x0, y0);
    let tr = fetch(x0 + 1.0, y0);
    let bl = fetch(x0, y0 + 1.0);
    let br = fetch(x0 + 1.0, y0 + 1.0);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy) + tr[c] * fx * (1.0 - fy) + bl[c] * (1.0 - fx) * fy + br[c] * fx * fy;
        *value = f64_to_u8_clamp(v);
    }
    Rgb(out)
}
