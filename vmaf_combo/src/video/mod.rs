//! Frame-sequential extraction of video quality features.
//!
//! A run is driven by [`Combo`]: it reads reference and distorted luma planes
//! from a [`FrameSource`], hands them to a [`FeatureExtractor`] in a fixed
//! order, and appends one score per frame to every series enabled in a
//! [`ComboSeries`].

mod combo;
pub mod convolution;
#[cfg(feature = "decode")]
mod decode;
pub mod features;
mod pixel;
pub mod plane;
mod series;
mod source;

pub use self::combo::*;
pub use self::convolution::CpuCapability;
#[cfg(feature = "decode")]
pub use self::decode::*;
pub use self::features::{
    AdmScore, AnsnrScore, Feature, FeatureError, FeatureExtractor, FeatureResult, MsSsimScore,
    NativeFeatures, ScaleScore, SsimScore, VifScore,
};
pub use self::pixel::*;
pub use self::plane::{PlaneAllocator, PlaneRef, SamplePlane, SystemAllocator};
pub use self::series::*;
pub use self::source::*;
