//! Separable convolution with mirrored edges, used for the temporal blur
//! behind the motion feature and by the native feature implementations.

use crate::video::plane::PlaneRef;

#[cfg(target_arch = "x86_64")]
mod avx;

/// The low-pass kernel applied to the reference plane before motion is scored.
#[allow(clippy::excessive_precision)]
pub const FILTER_5: [f32; 5] = [
    0.054488685,
    0.244201342,
    0.402619947,
    0.244201342,
    0.054488685,
];

/// Which instruction set the convolution may use.
///
/// Detected once and passed down explicitly, so two runs in one process can
/// make different choices (tests force [`CpuCapability::Scalar`], for example).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CpuCapability {
    /// Portable scalar code only.
    Scalar,
    /// 256-bit AVX vertical pass.
    Avx,
}

impl CpuCapability {
    /// The best capability the running CPU supports.
    pub fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx") {
                return CpuCapability::Avx;
            }
        }
        CpuCapability::Scalar
    }
}

impl Default for CpuCapability {
    fn default() -> Self {
        CpuCapability::detect()
    }
}

pub(crate) fn floorn(n: usize, m: usize) -> usize {
    n - n % m
}

/// Reflects an out-of-range tap position back into `0..len`.
#[inline(always)]
pub(crate) fn mirror(mut pos: isize, len: usize) -> usize {
    let len = len as isize;
    if len == 1 {
        return 0;
    }
    loop {
        if pos < 0 {
            pos = -pos;
        } else if pos >= len {
            pos = 2 * len - pos - 1;
        } else {
            return pos as usize;
        }
    }
}

/// Convolves `src` with `filter` along both axes, writing `dst`.
///
/// `tmp` receives the vertical pass and must be able to hold a plane with
/// `src`'s stride. `dst_stride` is in samples.
pub(crate) fn convolution_f32(
    filter: &[f32],
    src: PlaneRef<'_>,
    dst: &mut [f32],
    dst_stride: usize,
    tmp: &mut [f32],
    cpu: CpuCapability,
) -> Result<(), &'static str> {
    let width = src.width();
    let height = src.height();
    let tmp_stride = src.stride();
    if filter.len() % 2 == 0 {
        return Err("filter length must be odd");
    }
    if width == 0 || height == 0 {
        return Err("empty plane");
    }
    if dst_stride < width || dst.len() < (height - 1) * dst_stride + width {
        return Err("destination plane is too small");
    }
    if tmp.len() < (height - 1) * tmp_stride + width {
        return Err("scratch buffer is too small");
    }

    match cpu {
        #[cfg(target_arch = "x86_64")]
        CpuCapability::Avx if is_x86_feature_detected!("avx") => unsafe {
            avx::convolution_y_avx(filter, src, tmp, tmp_stride);
        },
        _ => convolution_y(filter, src, tmp, tmp_stride),
    }
    convolution_x(filter, tmp, tmp_stride, dst, dst_stride, width, height);
    Ok(())
}

/// Convenience wrapper that allocates its own output, packed with stride == width.
pub(crate) fn convolve_plane(filter: &[f32], src: PlaneRef<'_>, cpu: CpuCapability) -> Vec<f32> {
    let mut tmp = vec![0f32; src.data().len().max(src.stride() * src.height())];
    let mut dst = vec![0f32; src.width() * src.height()];
    let res = convolution_f32(filter, src, &mut dst, src.width(), &mut tmp, cpu);
    debug_assert!(res.is_ok(), "{:?}", res);
    dst
}

fn convolution_y(filter: &[f32], src: PlaneRef<'_>, dst: &mut [f32], dst_stride: usize) {
    let radius = filter.len() / 2;
    let width = src.width();
    let height = src.height();
    for i in 0..height {
        let out_row = &mut dst[i * dst_stride..][..width];
        if i >= radius && i + radius < height {
            for j in 0..width {
                out_row[j] = convolution_y_inner(filter, src, i - radius, j);
            }
        } else {
            for j in 0..width {
                out_row[j] = convolution_edge(false, filter, src.data(), src.stride(), width, height, i, j);
            }
        }
    }
}

#[inline(always)]
pub(crate) fn convolution_y_inner(filter: &[f32], src: PlaneRef<'_>, top: usize, j: usize) -> f32 {
    let mut accum = 0.;
    for k in 0..filter.len() {
        accum += filter[k] * src.row(top + k)[j];
    }
    accum
}

fn convolution_x(
    filter: &[f32],
    src: &[f32],
    src_stride: usize,
    dst: &mut [f32],
    dst_stride: usize,
    width: usize,
    height: usize,
) {
    let radius = filter.len() / 2;
    let borders_right = width.saturating_sub(radius);
    for i in 0..height {
        let in_row = &src[i * src_stride..][..width];
        let out_row = &mut dst[i * dst_stride..][..width];
        for j in 0..width {
            out_row[j] = if j >= radius && j < borders_right {
                let mut accum = 0.;
                for k in 0..filter.len() {
                    accum += filter[k] * in_row[j - radius + k];
                }
                accum
            } else {
                convolution_edge(true, filter, src, src_stride, width, height, i, j)
            };
        }
    }
}

#[inline(always)]
pub(crate) fn convolution_edge(
    horizontal: bool,
    filter: &[f32],
    src: &[f32],
    stride: usize,
    width: usize,
    height: usize,
    i: usize,
    j: usize,
) -> f32 {
    let radius = filter.len() as isize / 2;

    let mut accum = 0.;
    for k in 0..filter.len() {
        let tap = k as isize - radius;
        let (i_tap, j_tap) = if horizontal {
            (i, mirror(j as isize + tap, width))
        } else {
            (mirror(i as isize + tap, height), j)
        };
        accum += filter[k] * src[i_tap * stride + j_tap];
    }
    accum
}
