//! Structural Similarity index and its multi-scale variant.
//!
//! The SSIM index is a full reference metric; in other words, the measurement
//! or prediction of image quality is based on an initial uncompressed or
//! distortion-free image as reference. SSIM is designed to improve on
//! traditional methods such as peak signal-to-noise ratio (PSNR) and mean
//! squared error (MSE).
//!
//! See https://en.wikipedia.org/wiki/Structural_similarity for more details.

use super::{MsSsimScore, SsimScore};
use crate::video::convolution::{convolve_plane, CpuCapability};
use crate::video::plane::PlaneRef;
use std::cmp;

/// Number of scales MS-SSIM combines.
pub const MS_SSIM_SCALES: usize = 5;

// These come from the original MS-SSIM implementation paper:
// https://ece.uwaterloo.ca/~z70wang/publications/msssim.pdf
// They don't add up to 1 due to rounding done in the paper.
const MS_WEIGHT: [f64; MS_SSIM_SCALES] = [0.0448, 0.2856, 0.3001, 0.2363, 0.1333];

const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;
const SAMPLE_MAX: f64 = 255.0;

const GAUSSIAN_SIGMA: f64 = 1.5;
const GAUSSIAN_RADIUS: usize = 5;

pub(super) fn calculate_plane_ssim(
    reference: PlaneRef<'_>,
    distorted: PlaneRef<'_>,
    cpu: CpuCapability,
) -> SsimScore {
    let kernel = build_gaussian_kernel(GAUSSIAN_SIGMA, GAUSSIAN_RADIUS);
    calculate_plane_ssim_internal(reference, distorted, &kernel, cpu)
}

pub(super) fn calculate_plane_msssim(
    reference: PlaneRef<'_>,
    distorted: PlaneRef<'_>,
    cpu: CpuCapability,
) -> MsSsimScore {
    let kernel = build_gaussian_kernel(GAUSSIAN_SIGMA, GAUSSIAN_RADIUS);
    let mut result = MsSsimScore::default();

    let first = calculate_plane_ssim_internal(reference, distorted, &kernel, cpu);
    result.l[0] = first.l;
    result.c[0] = first.c;
    result.s[0] = first.s;

    let mut width = reference.width();
    let mut height = reference.height();
    let mut plane1 = msssim_downscale(reference);
    let mut plane2 = msssim_downscale(distorted);
    for i in 1..MS_SSIM_SCALES {
        width = cmp::max(width / 2, 1);
        height = cmp::max(height / 2, 1);
        let ref_scaled = PlaneRef::new(&plane1, width, height, width);
        let dis_scaled = PlaneRef::new(&plane2, width, height, width);
        let scale = calculate_plane_ssim_internal(ref_scaled, dis_scaled, &kernel, cpu);
        result.l[i] = scale.l;
        result.c[i] = scale.c;
        result.s[i] = scale.s;
        if i + 1 < MS_SSIM_SCALES {
            let next1 = msssim_downscale(ref_scaled);
            let next2 = msssim_downscale(dis_scaled);
            plane1 = next1;
            plane2 = next2;
        }
    }

    // Structure can go negative for anti-correlated planes; a fractional
    // power of it is undefined.
    let cs = result
        .c
        .iter()
        .zip(result.s.iter())
        .zip(MS_WEIGHT.iter())
        .map(|((c, s), weight)| c.max(0.0).powf(*weight) * s.max(0.0).powf(*weight))
        .product::<f64>();
    let last = MS_SSIM_SCALES - 1;
    result.score = result.l[last].max(0.0).powf(MS_WEIGHT[last]) * cs;
    result
}

/// SSIM with each moment taken over a Gaussian window, edges mirrored.
fn calculate_plane_ssim_internal(
    plane1: PlaneRef<'_>,
    plane2: PlaneRef<'_>,
    kernel: &[f32],
    cpu: CpuCapability,
) -> SsimScore {
    let width = plane1.width();
    let height = plane1.height();

    let mut x2 = Vec::with_capacity(width * height);
    let mut y2 = Vec::with_capacity(width * height);
    let mut xy = Vec::with_capacity(width * height);
    for (line1, line2) in plane1.rows().zip(plane2.rows()) {
        for (&x, &y) in line1.iter().zip(line2.iter()) {
            x2.push(x * x);
            y2.push(y * y);
            xy.push(x * y);
        }
    }
    let packed = |data: &[f32]| convolve_plane(kernel, PlaneRef::new(data, width, height, width), cpu);

    let mu_x = convolve_plane(kernel, plane1, cpu);
    let mu_y = convolve_plane(kernel, plane2, cpu);
    let ex2 = packed(&x2);
    let ey2 = packed(&y2);
    let exy = packed(&xy);

    let c1 = (SSIM_K1 * SAMPLE_MAX).powi(2);
    let c2 = (SSIM_K2 * SAMPLE_MAX).powi(2);
    let c3 = c2 / 2.0;

    let mut sum = SsimScore::default();
    for (mx, my, x2, y2, xy) in izip!(&mu_x, &mu_y, &ex2, &ey2, &exy) {
        let (mx, my) = (*mx as f64, *my as f64);
        let var_x = (*x2 as f64 - mx * mx).max(0.0);
        let var_y = (*y2 as f64 - my * my).max(0.0);
        let cov = *xy as f64 - mx * my;
        let (sd_x, sd_y) = (var_x.sqrt(), var_y.sqrt());

        let l = (2.0 * mx * my + c1) / (mx * mx + my * my + c1);
        let c = (2.0 * sd_x * sd_y + c2) / (var_x + var_y + c2);
        let s = (cov + c3) / (sd_x * sd_y + c3);
        sum.l += l;
        sum.c += c;
        sum.s += s;
        sum.score += l * c * s;
    }

    let n = (width * height) as f64;
    SsimScore {
        score: sum.score / n,
        l: sum.l / n,
        c: sum.c / n,
        s: sum.s / n,
    }
}

/// A normalized Gaussian of `2 * radius + 1` taps.
pub(super) fn build_gaussian_kernel(sigma: f64, radius: usize) -> Vec<f32> {
    let nhisigma2 = -0.5 / sigma.powi(2);
    let taps: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let d = i as f64 - radius as f64;
            (nhisigma2 * d * d).exp()
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.into_iter().map(|v| (v / sum) as f32).collect()
}

/// Averages 2x2 blocks. Planes narrower or shorter than two samples keep
/// that dimension at one.
fn msssim_downscale(input: PlaneRef<'_>) -> Vec<f32> {
    let input_width = input.width();
    let input_height = input.height();
    let output_width = cmp::max(input_width / 2, 1);
    let output_height = cmp::max(input_height / 2, 1);
    let mut output = Vec::with_capacity(output_width * output_height);
    for j in 0..output_height {
        let j0 = cmp::min(2 * j, input_height - 1);
        let j1 = cmp::min(j0 + 1, input_height - 1);
        let (row0, row1) = (input.row(j0), input.row(j1));
        for i in 0..output_width {
            let i0 = cmp::min(2 * i, input_width - 1);
            let i1 = cmp::min(i0 + 1, input_width - 1);
            output.push((row0[i0] + row0[i1] + row1[i0] + row1[i1]) / 4.0);
        }
    }
    output
}
