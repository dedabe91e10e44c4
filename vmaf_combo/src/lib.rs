//! `vmaf_combo` extracts the per-frame feature series that VMAF is built on
//! (ADM, VIF, motion, plus PSNR, SSIM and MS-SSIM) by walking a reference and
//! a distorted video frame by frame.
//!
//! The heart of the crate is [`video::Combo`], which owns the aligned sample
//! buffers for one run, pulls frames from a [`video::FrameSource`], calls a
//! [`video::FeatureExtractor`] in the order the features require, and appends
//! one value per frame to every enabled [`video::MetricSeries`].

#![allow(clippy::cast_lossless)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::unreadable_literal)]
#![allow(clippy::too_many_arguments)]
#![deny(missing_docs)]

#[macro_use]
extern crate itertools;
#[macro_use]
extern crate thiserror;
#[macro_use]
extern crate tracing;

pub mod capi;
pub mod video;

use crate::video::Feature;
use std::error::Error as StdError;

/// The broad class of a [`ComboError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid width, height, format or stride.
    Parameter,
    /// An aligned buffer could not be acquired.
    Allocation,
    /// The frame source reported a failure status.
    Reader,
    /// A feature function reported a failure.
    MetricComputation,
}

/// Possible errors that may occur during a feature extraction run.
///
/// This enum may be added to in the future and should not be assumed to be exhaustive.
#[derive(Debug, Error)]
pub enum ComboError {
    /// Width or height is zero, or the width is too large for a stride to be computed.
    #[error("wrong width {width} or height {height}")]
    InvalidDimensions {
        #[doc(hidden)]
        width: usize,
        #[doc(hidden)]
        height: usize,
    },
    /// The plane size `height * stride` cannot be represented.
    #[error("height {height} too large")]
    HeightTooLarge {
        #[doc(hidden)]
        height: usize,
    },
    /// 4:2:0 input needs an even number of luma samples.
    #[error("(w * h) % 2 != 0, w = {width}, h = {height}")]
    OddPlaneArea {
        #[doc(hidden)]
        width: usize,
        #[doc(hidden)]
        height: usize,
    },
    /// The pixel format tag is not one of the supported formats.
    #[error("unknown format {format}")]
    UnknownFormat {
        #[doc(hidden)]
        format: String,
    },
    /// The frame source reported a stride that does not fit the run's planes.
    #[error("incompatible {plane} stride {stride} (expected {expected})")]
    IncompatibleStride {
        #[doc(hidden)]
        plane: &'static str,
        #[doc(hidden)]
        stride: usize,
        #[doc(hidden)]
        expected: usize,
    },
    /// A required argument was missing at an interface boundary.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        #[doc(hidden)]
        reason: &'static str,
    },
    /// An aligned buffer could not be allocated.
    #[error("aligned allocation failed for {buffer}")]
    Allocation {
        #[doc(hidden)]
        buffer: &'static str,
    },
    /// The frame source returned a status other than "frame" or "end of stream".
    #[error("read_frame failed with status {status}")]
    Reader {
        #[doc(hidden)]
        status: i32,
    },
    /// A feature function failed.
    #[error("compute_{feature} failed: {source}")]
    MetricComputation {
        #[doc(hidden)]
        feature: Feature,
        #[doc(hidden)]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl ComboError {
    /// Which class of failure this is.
    pub fn kind(&self) -> ErrorKind {
        use ComboError::*;
        match self {
            InvalidDimensions { .. }
            | HeightTooLarge { .. }
            | OddPlaneArea { .. }
            | UnknownFormat { .. }
            | IncompatibleStride { .. }
            | InvalidArgument { .. } => ErrorKind::Parameter,
            Allocation { .. } => ErrorKind::Allocation,
            Reader { .. } => ErrorKind::Reader,
            MetricComputation { .. } => ErrorKind::MetricComputation,
        }
    }

    /// The feature that failed, for metric computation errors.
    pub fn feature(&self) -> Option<Feature> {
        match self {
            ComboError::MetricComputation { feature, .. } => Some(*feature),
            _ => None,
        }
    }

    /// Integer status for callers that speak the C convention.
    ///
    /// Never zero. Reader failures pass the source's own status through unchanged.
    pub fn status(&self) -> i32 {
        match (self.kind(), self) {
            (_, ComboError::Reader { status }) => *status,
            (ErrorKind::Parameter, _) => -1,
            (ErrorKind::Allocation, _) => -2,
            _ => -3,
        }
    }

    /// Writes this error's message into a fixed-capacity buffer as a single
    /// NUL-terminated string, truncating if needed.
    ///
    /// Returns the number of message bytes written, excluding the terminator.
    /// A zero-length sink receives nothing.
    pub fn write_message(&self, sink: &mut [u8]) -> usize {
        if sink.is_empty() {
            return 0;
        }
        let capacity = sink.len() - 1;
        let message = self.to_string();
        let mut len = message.len().min(capacity);
        // Don't split a multi-byte character.
        while !message.is_char_boundary(len) {
            len -= 1;
        }
        sink[..len].copy_from_slice(&message.as_bytes()[..len]);
        sink[len] = 0;
        len
    }

    pub(crate) fn computation<E>(feature: Feature, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        ComboError::MetricComputation {
            feature,
            source: source.into(),
        }
    }
}

#[cfg(test)]
#[inline(always)]
pub(crate) fn assert_metric_eq(expected: f64, value: f64) {
    assert!(
        (expected - value).abs() < 0.01,
        "Expected {}, got {}",
        expected,
        value
    );
}
