use crate::video::plane::SamplePlane;

/// Status code a source returns for a delivered frame.
pub const FRAME_DELIVERED: i32 = 0;

/// Status code a source returns once there are no more frames.
pub const END_OF_STREAM: i32 = 1;

/// The outcome of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Both planes hold a new frame.
    Delivered,
    /// There are no more frames. The planes are left untouched.
    EndOfStream,
}

impl FrameStatus {
    /// Interprets a C-style status: `0` is a frame, `1` is end of stream, and
    /// anything else is returned as the failure status.
    pub fn from_code(code: i32) -> Result<FrameStatus, i32> {
        match code {
            FRAME_DELIVERED => Ok(FrameStatus::Delivered),
            END_OF_STREAM => Ok(FrameStatus::EndOfStream),
            status => Err(status),
        }
    }

    /// The C-style status for this outcome.
    pub fn code(self) -> i32 {
        match self {
            FrameStatus::Delivered => FRAME_DELIVERED,
            FrameStatus::EndOfStream => END_OF_STREAM,
        }
    }
}

/// Supplies reference and distorted luma planes, one frame at a time.
///
/// A source fills the `width` x `height` samples of each plane on the 8-bit
/// scale (10-bit input divided by 4). It may change a plane's stride with
/// [`SamplePlane::set_stride`] on the first frame; the stride must then stay
/// the same for the rest of the run.
///
/// Failures are reported as an integer status other than `0` or `1`. The run
/// passes it through unchanged in [`ComboError::Reader`](crate::ComboError::Reader).
pub trait FrameSource {
    /// Reads the next frame into `reference` and `distorted`.
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32>;
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32> {
        (**self).read_frame(reference, distorted)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32> {
        (**self).read_frame(reference, distorted)
    }
}

/// A source backed by a closure returning a C-style status.
///
/// Created with [`read_fn`].
#[derive(Debug, Clone)]
pub struct ReadFn<F> {
    read: F,
}

/// Wraps a closure that fills both planes and returns `0` for a frame, `1` at
/// the end of the stream, or any other value on failure.
pub fn read_fn<F>(read: F) -> ReadFn<F>
where
    F: FnMut(&mut SamplePlane<'_>, &mut SamplePlane<'_>) -> i32,
{
    ReadFn { read }
}

impl<F> FrameSource for ReadFn<F>
where
    F: FnMut(&mut SamplePlane<'_>, &mut SamplePlane<'_>) -> i32,
{
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32> {
        FrameStatus::from_code((self.read)(reference, distorted))
    }
}
