//! Anti-noise signal-to-noise ratio.
//!
//! Both planes are low-pass filtered before comparison, the reference more
//! lightly than the distorted plane, so that fine noise which the eye cannot
//! resolve counts for less than structural error.

use super::psnr::calculate_psnr;
use super::AnsnrScore;
use crate::video::convolution::{convolve_plane, CpuCapability, FILTER_5};
use crate::video::plane::PlaneRef;

/// Separable form of the 3x3 `[1 2 1; 2 4 2; 1 2 1] / 16` kernel.
const ANSNR_FILTER_REF: [f32; 3] = [0.25, 0.5, 0.25];

const SIGNAL_FLOOR: f64 = 1e-10;

/// Mean squared noise below which the planes count as identical. The two
/// kernels round differently in `f32`, so identical input never gives
/// exactly zero.
const NOISE_FLOOR: f64 = 1e-6;

pub(super) fn calculate_plane_ansnr(
    reference: PlaneRef<'_>,
    distorted: PlaneRef<'_>,
    peak: f64,
    psnr_max: f64,
    cpu: CpuCapability,
) -> AnsnrScore {
    let ref_filtered = convolve_plane(&ANSNR_FILTER_REF, reference, cpu);
    let dis_filtered = convolve_plane(&FILTER_5, distorted, cpu);

    let (signal, noise) = ref_filtered.iter().zip(dis_filtered.iter()).fold(
        (0.0f64, 0.0f64),
        |(signal, noise), (&r, &d)| {
            let (r, d) = (r as f64, d as f64);
            (signal + r * r, noise + (r - d) * (r - d))
        },
    );

    let n_pixels = ref_filtered.len() as f64;
    if noise / n_pixels < NOISE_FLOOR {
        return AnsnrScore {
            score: psnr_max,
            psnr: psnr_max,
        };
    }
    AnsnrScore {
        score: 10.0 * (signal.max(SIGNAL_FLOOR) / noise).log10(),
        psnr: calculate_psnr(noise / n_pixels, peak, psnr_max),
    }
}
