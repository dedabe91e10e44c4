use super::{convolution_edge, convolution_y_inner, floorn};
use crate::video::plane::PlaneRef;
use core::arch::x86_64::*;

/// Vertical pass, eight columns at a time.
///
/// Taps are accumulated in the same order as the scalar pass, without fused
/// multiply-add, so both produce identical output.
#[target_feature(enable = "avx")]
pub(super) unsafe fn convolution_y_avx(
    filter: &[f32],
    src: PlaneRef<'_>,
    dst: &mut [f32],
    dst_stride: usize,
) {
    let radius = filter.len() / 2;
    let width = src.width();
    let height = src.height();
    let width_mod8 = floorn(width, 8);
    let src_stride = src.stride();
    let src_ptr = src.data().as_ptr();

    for i in 0..height {
        if i < radius || i + radius >= height {
            for j in 0..width {
                dst[i * dst_stride + j] =
                    convolution_edge(false, filter, src.data(), src_stride, width, height, i, j);
            }
            continue;
        }

        let top = i - radius;
        let out = dst[i * dst_stride..][..width].as_mut_ptr();
        for j in (0..width_mod8).step_by(8) {
            let mut sum = _mm256_setzero_ps();
            for k in 0..filter.len() {
                let f = _mm256_broadcast_ss(&filter[k]);
                let g = _mm256_loadu_ps(src_ptr.add((top + k) * src_stride + j));
                sum = _mm256_add_ps(sum, _mm256_mul_ps(f, g));
            }
            _mm256_storeu_ps(out.add(j), sum);
        }
        for j in width_mod8..width {
            dst[i * dst_stride + j] = convolution_y_inner(filter, src, top, j);
        }
    }
}
