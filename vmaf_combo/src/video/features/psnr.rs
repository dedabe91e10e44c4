//! Peak Signal-to-Noise Ratio.
//!
//! PSNR is most easily defined via the mean squared error between two images.
//!
//! See https://en.wikipedia.org/wiki/Peak_signal-to-noise_ratio for more details.

use crate::video::plane::PlaneRef;

/// Keeps identical planes from producing an infinite PSNR before it is clamped.
const MSE_FLOOR: f64 = 1e-10;

/// PSNR between two planes, capped at `psnr_max` so that identical frames
/// don't skew the series with infinities.
pub(super) fn calculate_plane_psnr(
    reference: PlaneRef<'_>,
    distorted: PlaneRef<'_>,
    peak: f64,
    psnr_max: f64,
) -> f64 {
    let n_pixels = (reference.width() * reference.height()) as f64;
    let mse = calculate_plane_total_squared_error(reference, distorted) / n_pixels;
    calculate_psnr(mse, peak, psnr_max)
}

pub(super) fn calculate_psnr(mse: f64, peak: f64, psnr_max: f64) -> f64 {
    let psnr = 10.0 * (peak * peak / mse.max(MSE_FLOOR)).log10();
    psnr.min(psnr_max)
}

/// Sum of the squared sample differences over the visible area of both planes.
fn calculate_plane_total_squared_error(plane1: PlaneRef<'_>, plane2: PlaneRef<'_>) -> f64 {
    plane1
        .rows()
        .zip(plane2.rows())
        .flat_map(|(row1, row2)| row1.iter().zip(row2.iter()))
        .map(|(&a, &b)| {
            let err = (a - b) as f64;
            err * err
        })
        .sum()
}
