use super::READ_FAILED;
use crate::video::pixel::{PixelFormat, SampleReader};
use crate::video::plane::SamplePlane;
use crate::video::source::{FrameSource, FrameStatus};
use std::error::Error;
use std::io::Read;

/// The pixel format a Y4M colorspace maps to, if it is one a run accepts.
fn map_y4m_color_space(color_space: y4m::Colorspace) -> Option<PixelFormat> {
    use crate::video::pixel::PixelFormat::*;
    use y4m::Colorspace::*;
    match color_space {
        C420jpeg | C420paldv | C420mpeg2 | C420 => Some(Yuv420p),
        C420p10 => Some(Yuv420p10le),
        C422 => Some(Yuv422p),
        C422p10 => Some(Yuv422p10le),
        C444 => Some(Yuv444p),
        C444p10 => Some(Yuv444p10le),
        _ => None,
    }
}

/// Reads reference and distorted frames from two Y4M streams.
pub struct Y4mSource<R: Read> {
    reference: y4m::Decoder<R>,
    distorted: y4m::Decoder<R>,
    format: PixelFormat,
    reader: SampleReader,
    frames: usize,
}

impl<R: Read> Y4mSource<R> {
    /// Parses both stream headers.
    ///
    /// Fails if either header is invalid, if the videos differ in size or
    /// colorspace, or if the colorspace has no matching [`PixelFormat`].
    pub fn new(reference: R, distorted: R) -> Result<Self, Box<dyn Error>> {
        let reference = y4m::Decoder::new(reference).map_err(|e| format!("{:?}", e))?;
        let distorted = y4m::Decoder::new(distorted).map_err(|e| format!("{:?}", e))?;
        if reference.get_width() != distorted.get_width()
            || reference.get_height() != distorted.get_height()
        {
            return Err("Video resolution does not match".into());
        }
        if std::mem::discriminant(&reference.get_colorspace())
            != std::mem::discriminant(&distorted.get_colorspace())
        {
            return Err("Colorspaces do not match".into());
        }
        let format = map_y4m_color_space(reference.get_colorspace())
            .ok_or_else(|| format!("unsupported colorspace {:?}", reference.get_colorspace()))?;
        Ok(Y4mSource {
            reference,
            distorted,
            format,
            reader: format.sample_reader(),
            frames: 0,
        })
    }

    /// Luma width of both videos.
    pub fn width(&self) -> usize {
        self.reference.get_width()
    }

    /// Luma height of both videos.
    pub fn height(&self) -> usize {
        self.reference.get_height()
    }

    /// The pixel format both videos are in.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Number of frames delivered so far.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

/// Reads one frame's luma plane. `Ok(false)` at a clean end of stream.
fn read_luma<R: Read>(
    decoder: &mut y4m::Decoder<R>,
    reader: SampleReader,
    plane: &mut SamplePlane<'_>,
) -> Result<bool, y4m::Error> {
    let stride = decoder.get_width() * decoder.get_bytes_per_sample();
    match decoder.read_frame() {
        Ok(frame) => {
            reader.read_plane(frame.get_y_plane(), stride, plane);
            Ok(true)
        }
        Err(y4m::Error::EOF) => Ok(false),
        Err(e) => Err(e),
    }
}

impl<R: Read> FrameSource for Y4mSource<R> {
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32> {
        let frames = self.frames;
        let (width, height) = (self.width(), self.height());
        for plane in &[&*reference, &*distorted] {
            if plane.width() != width || plane.height() != height {
                warn!(
                    "run planes are {}x{}, input frames are {}x{}",
                    plane.width(),
                    plane.height(),
                    width,
                    height
                );
                return Err(READ_FAILED);
            }
        }
        let got_ref = read_luma(&mut self.reference, self.reader, reference).map_err(|e| {
            warn!("reference frame {}: {:?}", frames, e);
            READ_FAILED
        })?;
        let got_dis = read_luma(&mut self.distorted, self.reader, distorted).map_err(|e| {
            warn!("distorted frame {}: {:?}", frames, e);
            READ_FAILED
        })?;
        match (got_ref, got_dis) {
            (true, true) => {
                self.frames += 1;
                Ok(FrameStatus::Delivered)
            }
            (false, false) => Ok(FrameStatus::EndOfStream),
            _ => {
                warn!("inputs differ in length, stopping after {} frames", frames);
                Ok(FrameStatus::EndOfStream)
            }
        }
    }
}
