//! Frame sources for raw planar YUV and Y4M input.
//!
//! Both read the luma plane of each frame from a reference and a distorted
//! stream and skip the chroma planes. A stream that fails or ends in the
//! middle of a frame is reported with [`READ_FAILED`].

mod raw;
#[cfg(feature = "y4m-decode")]
mod y4m;

pub use self::raw::*;
#[cfg(feature = "y4m-decode")]
pub use self::y4m::*;

/// Status reported when an input stream cannot deliver a whole frame.
pub const READ_FAILED: i32 = 2;
