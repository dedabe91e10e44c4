//! Visual Information Fidelity, pixel-domain variant.
//!
//! VIF models the reference as the output of a natural source passed through
//! the human visual channel, and the distorted video as the same source passed
//! through a distortion channel first. The score is the share of the reference
//! information that survives the distortion, summed over four scales.
//!
//! See https://live.ece.utexas.edu/research/Quality/VIF.htm for more details.

use super::ssim::build_gaussian_kernel;
use super::{ScaleScore, VifScore, FEATURE_SCALES};
use crate::video::convolution::{convolve_plane, CpuCapability};
use crate::video::plane::PlaneRef;
use std::cmp;

/// Variance of the visual noise added in both channels.
const SIGMA_NSQ: f64 = 2.0;
const EPS: f64 = 1e-10;

/// Gaussian window length per scale. The window for scale `n` also low-passes
/// before decimating into scale `n`.
const FILTER_TAPS: [usize; FEATURE_SCALES] = [17, 9, 5, 3];

pub(super) fn calculate_plane_vif(
    reference: PlaneRef<'_>,
    distorted: PlaneRef<'_>,
    cpu: CpuCapability,
) -> VifScore {
    let mut result = VifScore::default();

    let mut width = reference.width();
    let mut height = reference.height();
    let mut ref_plane = pack(reference);
    let mut dis_plane = pack(distorted);

    for (scale, &taps) in FILTER_TAPS.iter().enumerate() {
        let kernel = build_gaussian_kernel(taps as f64 / 5.0, taps / 2);
        if scale > 0 {
            let ref_lp = convolve_plane(&kernel, PlaneRef::new(&ref_plane, width, height, width), cpu);
            let dis_lp = convolve_plane(&kernel, PlaneRef::new(&dis_plane, width, height, width), cpu);
            let (w, h) = (cmp::max(width / 2, 1), cmp::max(height / 2, 1));
            ref_plane = decimate(&ref_lp, width, height, w, h);
            dis_plane = decimate(&dis_lp, width, height, w, h);
            width = w;
            height = h;
        }
        result.scales[scale] = vif_statistic(&ref_plane, &dis_plane, width, height, &kernel, cpu);
    }

    result.num = result.scales.iter().map(|s| s.num).sum();
    result.den = result.scales.iter().map(|s| s.den).sum();
    result.score = if result.den > 0.0 {
        result.num / result.den
    } else {
        1.0
    };
    result
}

fn vif_statistic(
    ref_plane: &[f32],
    dis_plane: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    cpu: CpuCapability,
) -> ScaleScore {
    let plane = |data: &[f32]| convolve_plane(kernel, PlaneRef::new(data, width, height, width), cpu);
    let ref_sq: Vec<f32> = ref_plane.iter().map(|v| v * v).collect();
    let dis_sq: Vec<f32> = dis_plane.iter().map(|v| v * v).collect();
    let ref_dis: Vec<f32> = ref_plane.iter().zip(dis_plane).map(|(r, d)| r * d).collect();

    let mu1 = plane(ref_plane);
    let mu2 = plane(dis_plane);
    let ref_sq = plane(&ref_sq);
    let dis_sq = plane(&dis_sq);
    let ref_dis = plane(&ref_dis);

    let mut score = ScaleScore::default();
    for (mu1, mu2, xx, yy, xy) in izip!(&mu1, &mu2, &ref_sq, &dis_sq, &ref_dis) {
        let (mu1, mu2) = (*mu1 as f64, *mu2 as f64);
        let mut sigma1_sq = (*xx as f64 - mu1 * mu1).max(0.0);
        let sigma2_sq = (*yy as f64 - mu2 * mu2).max(0.0);
        let sigma12 = *xy as f64 - mu1 * mu2;

        let mut g = sigma12 / (sigma1_sq + EPS);
        let mut sv_sq = sigma2_sq - g * sigma12;
        if sigma1_sq < EPS {
            g = 0.0;
            sv_sq = sigma2_sq;
            sigma1_sq = 0.0;
        }
        if sigma2_sq < EPS {
            g = 0.0;
            sv_sq = 0.0;
        }
        if g < 0.0 {
            sv_sq = sigma2_sq;
            g = 0.0;
        }
        let sv_sq = sv_sq.max(EPS);

        score.num += (1.0 + g * g * sigma1_sq / (sv_sq + SIGMA_NSQ)).log2();
        score.den += (1.0 + sigma1_sq / SIGMA_NSQ).log2();
    }
    score
}

fn pack(plane: PlaneRef<'_>) -> Vec<f32> {
    plane.rows().flatten().copied().collect()
}

fn decimate(src: &[f32], width: usize, height: usize, out_width: usize, out_height: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(out_width * out_height);
    for y in 0..out_height {
        let row = &src[cmp::min(2 * y, height - 1) * width..][..width];
        out.extend((0..out_width).map(|x| row[cmp::min(2 * x, width - 1)]));
    }
    out
}
