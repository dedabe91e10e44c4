//! Pixel formats and the conversion of raw luma samples into `f32` planes.

use crate::video::plane::SamplePlane;
use crate::ComboError;
use num_traits::{AsPrimitive, PrimInt};
use std::fmt::{self, Debug, Display};
use std::str::FromStr;

/// A trait for types which may represent a stored luma sample.
/// Currently implemented for `u8` and `u16`.
/// `u8` should be used for 8-bit video, and `u16` for 10-bit video.
pub trait Pixel: PrimInt + AsPrimitive<f32> + Debug + Display + Send + Sync + 'static {
    /// Decodes one sample from its little-endian byte representation.
    fn from_le_bytes(bytes: &[u8]) -> Self;
}

impl Pixel for u8 {
    #[inline(always)]
    fn from_le_bytes(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl Pixel for u16 {
    #[inline(always)]
    fn from_le_bytes(bytes: &[u8]) -> Self {
        u16::from(bytes[1]) << 8 | u16::from(bytes[0])
    }
}

/// Available chroma sampling formats.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChromaSampling {
    /// Both vertically and horizontally subsampled.
    Cs420,
    /// Horizontally subsampled.
    Cs422,
    /// Not subsampled.
    Cs444,
}

/// The planar YUV layouts a run can be configured for.
///
/// Only the luma plane takes part in feature extraction. The format decides
/// how raw samples are turned into `f32`, how many chroma bytes follow each
/// luma plane in raw input, and the peak values used by PSNR and ANSNR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit 4:2:0.
    Yuv420p,
    /// 8-bit 4:2:2.
    Yuv422p,
    /// 8-bit 4:4:4.
    Yuv444p,
    /// 10-bit little-endian 4:2:0.
    Yuv420p10le,
    /// 10-bit little-endian 4:2:2.
    Yuv422p10le,
    /// 10-bit little-endian 4:4:4.
    Yuv444p10le,
}

impl PixelFormat {
    /// The tag used on the command line and in the C interface.
    pub fn name(self) -> &'static str {
        use self::PixelFormat::*;
        match self {
            Yuv420p => "yuv420p",
            Yuv422p => "yuv422p",
            Yuv444p => "yuv444p",
            Yuv420p10le => "yuv420p10le",
            Yuv422p10le => "yuv422p10le",
            Yuv444p10le => "yuv444p10le",
        }
    }

    /// Bits per stored sample.
    pub fn bit_depth(self) -> usize {
        use self::PixelFormat::*;
        match self {
            Yuv420p | Yuv422p | Yuv444p => 8,
            Yuv420p10le | Yuv422p10le | Yuv444p10le => 10,
        }
    }

    /// The chroma subsampling of the format.
    pub fn chroma_sampling(self) -> ChromaSampling {
        use self::PixelFormat::*;
        match self {
            Yuv420p | Yuv420p10le => ChromaSampling::Cs420,
            Yuv422p | Yuv422p10le => ChromaSampling::Cs422,
            Yuv444p | Yuv444p10le => ChromaSampling::Cs444,
        }
    }

    /// Bytes per stored sample.
    pub fn bytes_per_sample(self) -> usize {
        if self.bit_depth() > 8 {
            2
        } else {
            1
        }
    }

    /// The number of chroma samples (U and V together) that follow a luma
    /// plane of `width` x `height` samples, or `None` if it overflows.
    pub fn chroma_samples(self, width: usize, height: usize) -> Option<usize> {
        let luma = width.checked_mul(height)?;
        match self.chroma_sampling() {
            ChromaSampling::Cs420 => Some(luma / 2),
            ChromaSampling::Cs422 => Some(luma),
            ChromaSampling::Cs444 => luma.checked_mul(2),
        }
    }

    /// Peak sample value on the 8-bit scale used by PSNR and ANSNR.
    ///
    /// 10-bit input is normalized to 8 bits when read, so its peak is 1023 / 4.
    pub fn peak(self) -> f64 {
        if self.bit_depth() > 8 {
            255.75
        } else {
            255.0
        }
    }

    /// The ceiling PSNR and ANSNR are clamped to.
    pub fn psnr_max(self) -> f64 {
        if self.bit_depth() > 8 {
            72.0
        } else {
            60.0
        }
    }

    /// The sample reader for this format, selected once per run.
    pub fn sample_reader(self) -> SampleReader {
        if self.bit_depth() > 8 {
            SampleReader::Word10Le
        } else {
            SampleReader::Byte
        }
    }

    /// Checks that a luma plane of this size is valid for the format.
    pub fn validate_dimensions(self, width: usize, height: usize) -> Result<(), ComboError> {
        if self.chroma_sampling() == ChromaSampling::Cs420 && (width * height) % 2 != 0 {
            return Err(ComboError::OddPlaneArea { width, height });
        }
        Ok(())
    }
}

impl FromStr for PixelFormat {
    type Err = ComboError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use self::PixelFormat::*;
        Ok(match s {
            "yuv420p" => Yuv420p,
            "yuv422p" => Yuv422p,
            "yuv444p" => Yuv444p,
            "yuv420p10le" => Yuv420p10le,
            "yuv422p10le" => Yuv422p10le,
            "yuv444p10le" => Yuv444p10le,
            _ => {
                return Err(ComboError::UnknownFormat {
                    format: s.to_owned(),
                })
            }
        })
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts raw luma rows into the `f32` samples of a [`SamplePlane`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SampleReader {
    /// One byte per sample, copied as is.
    Byte,
    /// Two little-endian bytes per sample, divided by 4 to land on the 8-bit scale.
    Word10Le,
}

impl SampleReader {
    /// Bytes consumed per sample.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleReader::Byte => 1,
            SampleReader::Word10Le => 2,
        }
    }

    /// Fills `plane` from `source`, whose rows are `source_stride` bytes apart.
    ///
    /// `source` must hold at least `height` rows of `width` samples.
    pub fn read_plane(self, source: &[u8], source_stride: usize, plane: &mut SamplePlane<'_>) {
        match self {
            SampleReader::Byte => read_rows::<u8>(source, source_stride, plane, 1.0),
            SampleReader::Word10Le => read_rows::<u16>(source, source_stride, plane, 4.0),
        }
    }
}

fn read_rows<T: Pixel>(source: &[u8], source_stride: usize, plane: &mut SamplePlane<'_>, scale: f32) {
    let width = plane.width();
    let bytes = std::mem::size_of::<T>();
    for y in 0..plane.height() {
        let in_row = &source[y * source_stride..][..width * bytes];
        let out_row = plane.row_mut(y);
        for (out, raw) in out_row.iter_mut().zip(in_row.chunks_exact(bytes)) {
            let sample: f32 = T::from_le_bytes(raw).as_();
            *out = sample / scale;
        }
    }
}
