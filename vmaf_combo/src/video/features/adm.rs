//! Additive distortion metric, a detail-loss measure in the wavelet domain.
//!
//! Each scale splits both planes into one approximation and three detail
//! bands with a Daubechies-2 wavelet. The distorted detail is decoupled into
//! the part that is a faithful (attenuated) copy of the reference detail and
//! an additive impairment. The restored part, after contrast-sensitivity
//! weighting and masking by the impairment, is compared to the reference.
//!
//! This is a simplified form of the ADM feature of VMAF: the band weights come
//! from Watson's DWT quantization model at a fixed viewing condition, and
//! masking uses the impairment at the same position only.

use super::{AdmScore, ScaleScore, FEATURE_SCALES};
use crate::video::convolution::mirror;
use crate::video::plane::PlaneRef;
use std::f64::consts::PI;

#[allow(clippy::excessive_precision)]
const DB2_LO: [f32; 4] = [0.482962913, 0.836516304, 0.224143868, -0.129409523];
#[allow(clippy::excessive_precision)]
const DB2_HI: [f32; 4] = [-0.129409523, -0.224143868, 0.836516304, -0.482962913];

/// Below this the denominator is treated as zero and the frame scores 1.
const ADM_NUMDEN_LIMIT: f64 = 1e-10;
const MASKING_DIVISOR: f32 = 30.0;

/// Display resolution in pixels per degree: 1080 lines viewed from three
/// picture heights.
const PIXELS_PER_DEGREE: f64 = 3.0 * 1080.0 * PI / 180.0;

/// Approximation and detail bands of one decomposition level.
struct Bands {
    a: Vec<f32>,
    h: Vec<f32>,
    v: Vec<f32>,
    d: Vec<f32>,
    width: usize,
    height: usize,
}

pub(super) fn calculate_plane_adm(
    reference: PlaneRef<'_>,
    distorted: PlaneRef<'_>,
    border_factor: f64,
) -> AdmScore {
    let mut result = AdmScore::default();

    let mut ref_bands = dwt2(reference);
    let mut dis_bands = dwt2(distorted);
    for scale in 0..FEATURE_SCALES {
        result.scales[scale] = adm_scale(&ref_bands, &dis_bands, scale, border_factor);
        if scale + 1 < FEATURE_SCALES {
            let (w, h) = (ref_bands.width, ref_bands.height);
            let next_ref = dwt2(PlaneRef::new(&ref_bands.a, w, h, w));
            let next_dis = dwt2(PlaneRef::new(&dis_bands.a, w, h, w));
            ref_bands = next_ref;
            dis_bands = next_dis;
        }
    }

    result.num = result.scales.iter().map(|s| s.num).sum();
    result.den = result.scales.iter().map(|s| s.den).sum();
    result.score = if result.den < ADM_NUMDEN_LIMIT {
        1.0
    } else {
        result.num / result.den
    };
    result
}

/// One level of the separable 2D transform, mirrored at the edges.
fn dwt2(src: PlaneRef<'_>) -> Bands {
    let width = src.width();
    let height = src.height();
    let out_width = (width + 1) / 2;
    let out_height = (height + 1) / 2;

    let mut lo = vec![0f32; out_width * height];
    let mut hi = vec![0f32; out_width * height];
    for y in 0..height {
        let row = src.row(y);
        for i in 0..out_width {
            let (l, h) = analyze(|k| row[mirror(2 * i as isize - 1 + k as isize, width)]);
            lo[y * out_width + i] = l;
            hi[y * out_width + i] = h;
        }
    }

    let mut bands = Bands {
        a: vec![0f32; out_width * out_height],
        h: vec![0f32; out_width * out_height],
        v: vec![0f32; out_width * out_height],
        d: vec![0f32; out_width * out_height],
        width: out_width,
        height: out_height,
    };
    for j in 0..out_height {
        for x in 0..out_width {
            let tap = |k: usize| mirror(2 * j as isize - 1 + k as isize, height) * out_width + x;
            let (a, h) = analyze(|k| lo[tap(k)]);
            let (v, d) = analyze(|k| hi[tap(k)]);
            let idx = j * out_width + x;
            bands.a[idx] = a;
            bands.h[idx] = h;
            bands.v[idx] = v;
            bands.d[idx] = d;
        }
    }
    bands
}

#[inline(always)]
fn analyze<F: Fn(usize) -> f32>(sample: F) -> (f32, f32) {
    let mut lo = 0.;
    let mut hi = 0.;
    for k in 0..4 {
        let s = sample(k);
        lo += DB2_LO[k] * s;
        hi += DB2_HI[k] * s;
    }
    (lo, hi)
}

/// Contrast sensitivity of a detail band, as the inverse of Watson's
/// quantization step for it.
fn csf_weight(scale: usize, diagonal: bool) -> f32 {
    const A: f64 = 0.495;
    const K: f64 = 0.466;
    const F0: f64 = 0.401;
    let g = if diagonal { 0.534 } else { 1.0 };
    let f = PIXELS_PER_DEGREE / 2f64.powi(scale as i32 + 1);
    let y = A * 10f64.powf(K * (f.log10() - (g * F0).log10()).powi(2));
    (1.0 / (2.0 * y)) as f32
}

fn adm_scale(ref_bands: &Bands, dis_bands: &Bands, scale: usize, border_factor: f64) -> ScaleScore {
    let width = ref_bands.width;
    let height = ref_bands.height;
    let (left, right) = pooling_range(width, border_factor);
    let (top, bottom) = pooling_range(height, border_factor);

    let weights = [
        csf_weight(scale, false),
        csf_weight(scale, false),
        csf_weight(scale, true),
    ];
    let ref_detail = [&ref_bands.h, &ref_bands.v, &ref_bands.d];
    let dis_detail = [&dis_bands.h, &dis_bands.v, &dis_bands.d];

    let mut num_cubes = [0f64; 3];
    let mut den_cubes = [0f64; 3];
    for y in top..bottom {
        for x in left..right {
            let idx = y * width + x;
            let mut restored = [0f32; 3];
            let mut mask = 0f32;
            for band in 0..3 {
                let r = ref_detail[band][idx];
                let d = dis_detail[band][idx];
                let k = if r.abs() > 1e-6 {
                    (d / r).max(0.0).min(1.0)
                } else {
                    0.0
                };
                restored[band] = k * r;
                mask += (weights[band] * (d - restored[band])).abs();
            }
            let mask = mask / MASKING_DIVISOR;
            for band in 0..3 {
                let rst = ((weights[band] * restored[band]).abs() - mask).max(0.0) as f64;
                let org = (weights[band] * ref_detail[band][idx]).abs() as f64;
                num_cubes[band] += rst * rst * rst;
                den_cubes[band] += org * org * org;
            }
        }
    }

    ScaleScore {
        num: num_cubes.iter().map(|v| v.cbrt()).sum(),
        den: den_cubes.iter().map(|v| v.cbrt()).sum(),
    }
}

/// The half-open range left after dropping `border_factor` of `len` at each
/// end. Never empty.
fn pooling_range(len: usize, border_factor: f64) -> (usize, usize) {
    let border = (len as f64 * border_factor) as usize;
    if 2 * border >= len {
        (0, len)
    } else {
        (border, len - border)
    }
}
