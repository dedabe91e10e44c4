use super::READ_FAILED;
use crate::video::pixel::{PixelFormat, SampleReader};
use crate::video::plane::{PlaneGeometry, SamplePlane};
use crate::video::source::{FrameSource, FrameStatus};
use crate::ComboError;
use std::io::{self, Read};

/// Headerless planar YUV, one file per video.
///
/// Every frame is a luma plane of `width * height` samples followed by the
/// chroma planes, whose size the pixel format decides.
#[derive(Debug)]
pub struct RawYuvSource<R: Read> {
    reference: R,
    distorted: R,
    width: usize,
    height: usize,
    reader: SampleReader,
    chroma_bytes: u64,
    luma: Vec<u8>,
    frames: usize,
}

impl<R: Read> RawYuvSource<R> {
    /// Reads `width` x `height` frames of `format` from both streams.
    ///
    /// Fails on the same sizes a run would reject, and on frames whose byte
    /// size cannot be represented.
    pub fn new(
        reference: R,
        distorted: R,
        width: usize,
        height: usize,
        format: PixelFormat,
    ) -> Result<Self, ComboError> {
        PlaneGeometry::new(width, height)?;
        format.validate_dimensions(width, height)?;
        let bytes = format.bytes_per_sample();
        let invalid = || ComboError::InvalidDimensions { width, height };
        let luma_bytes = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(bytes))
            .ok_or_else(invalid)?;
        let chroma_bytes = format
            .chroma_samples(width, height)
            .and_then(|n| n.checked_mul(bytes))
            .ok_or_else(invalid)?;
        Ok(RawYuvSource {
            reference,
            distorted,
            width,
            height,
            reader: format.sample_reader(),
            chroma_bytes: chroma_bytes as u64,
            luma: vec![0; luma_bytes],
            frames: 0,
        })
    }

    /// Number of frames delivered so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    fn read_plane<S: Read>(
        stream: &mut S,
        luma: &mut [u8],
        chroma_bytes: u64,
        reader: SampleReader,
        width: usize,
        plane: &mut SamplePlane<'_>,
    ) -> io::Result<bool> {
        if !fill(stream, luma)? {
            return Ok(false);
        }
        let skipped = io::copy(&mut (&mut *stream).take(chroma_bytes), &mut io::sink())?;
        if skipped != chroma_bytes {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        reader.read_plane(luma, width * reader.bytes_per_sample(), plane);
        Ok(true)
    }
}

/// Fills `buf` completely. Returns `false` if the stream was already at its end.
fn fill<S: Read>(stream: &mut S, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

impl<R: Read> FrameSource for RawYuvSource<R> {
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32> {
        let (width, chroma, reader) = (self.width, self.chroma_bytes, self.reader);
        for plane in &[&*reference, &*distorted] {
            if plane.width() != width || plane.height() != self.height {
                warn!(
                    "run planes are {}x{}, input frames are {}x{}",
                    plane.width(),
                    plane.height(),
                    width,
                    self.height
                );
                return Err(READ_FAILED);
            }
        }
        let got_ref = Self::read_plane(&mut self.reference, &mut self.luma, chroma, reader, width, reference)
            .map_err(|e| {
                warn!("reference frame {}: {}", self.frames, e);
                READ_FAILED
            })?;
        let got_dis = Self::read_plane(&mut self.distorted, &mut self.luma, chroma, reader, width, distorted)
            .map_err(|e| {
                warn!("distorted frame {}: {}", self.frames, e);
                READ_FAILED
            })?;

        match (got_ref, got_dis) {
            (true, true) => {
                self.frames += 1;
                Ok(FrameStatus::Delivered)
            }
            (false, false) => Ok(FrameStatus::EndOfStream),
            (true, false) | (false, true) => {
                warn!(
                    "inputs differ in length, stopping after {} frames",
                    self.frames
                );
                Ok(FrameStatus::EndOfStream)
            }
        }
    }
}
