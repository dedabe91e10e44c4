//! The per-frame feature functions a run calls, and a native implementation
//! of each.
//!
//! A run reaches every feature through [`FeatureExtractor`]. The pipeline only
//! decides *when* each one is called and on which samples; what a feature
//! computes is entirely up to the implementation. [`NativeFeatures`] is the
//! implementation this crate ships. Its scores follow the published
//! definitions of each feature but are not bit-exact with libvmaf, and its ADM
//! is a simplified wavelet-domain detail-loss measure.

mod adm;
mod ansnr;
mod motion;
mod psnr;
mod ssim;
mod vif;

use crate::video::convolution::CpuCapability;
use crate::video::plane::PlaneRef;
use std::error::Error;
use std::fmt;

pub use self::ssim::MS_SSIM_SCALES;

/// Error type returned by feature functions.
pub type FeatureError = Box<dyn Error + Send + Sync>;

/// Result type returned by feature functions.
pub type FeatureResult<T> = Result<T, FeatureError>;

/// Value added to every sample before the range-sensitive features run.
pub const OPT_RANGE_PIXEL_OFFSET: f32 = -128.0;

/// Fraction of each border ADM leaves out of its pooling.
pub const ADM_BORDER_FACTOR: f64 = 0.1;

/// Number of scales ADM and VIF report.
pub const FEATURE_SCALES: usize = 4;

/// The steps of a run that can fail with a metric computation error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Peak signal-to-noise ratio.
    Psnr,
    /// Structural similarity.
    Ssim,
    /// Multi-scale structural similarity.
    MsSsim,
    /// Additive distortion metric.
    Adm,
    /// Anti-noise signal-to-noise ratio.
    Ansnr,
    /// The low-pass filter applied before motion is scored.
    TemporalFilter,
    /// Temporal difference between consecutive blurred reference frames.
    Motion,
    /// Visual information fidelity.
    Vif,
}

impl Feature {
    /// Short name, as used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Psnr => "psnr",
            Feature::Ssim => "ssim",
            Feature::MsSsim => "ms_ssim",
            Feature::Adm => "adm",
            Feature::Ansnr => "ansnr",
            Feature::TemporalFilter => "temporal-filter",
            Feature::Motion => "motion",
            Feature::Vif => "vif",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// SSIM and its three components, each averaged over the plane.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SsimScore {
    /// The SSIM index.
    pub score: f64,
    /// Luminance term.
    pub l: f64,
    /// Contrast term.
    pub c: f64,
    /// Structure term.
    pub s: f64,
}

/// MS-SSIM and the per-scale components it combines.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MsSsimScore {
    /// The MS-SSIM index.
    pub score: f64,
    /// Luminance term per scale.
    pub l: [f64; MS_SSIM_SCALES],
    /// Contrast term per scale.
    pub c: [f64; MS_SSIM_SCALES],
    /// Structure term per scale.
    pub s: [f64; MS_SSIM_SCALES],
}

/// A numerator/denominator pair for one scale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScaleScore {
    /// Numerator.
    pub num: f64,
    /// Denominator.
    pub den: f64,
}

/// Output of ADM and VIF: a ratio, the sums it was taken from, and the
/// contribution of every scale.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScaledScore {
    /// `num / den`, or 1 when there is nothing to compare.
    pub score: f64,
    /// Sum of the per-scale numerators.
    pub num: f64,
    /// Sum of the per-scale denominators.
    pub den: f64,
    /// Per-scale pairs, finest first.
    pub scales: [ScaleScore; FEATURE_SCALES],
}

/// ADM output.
pub type AdmScore = ScaledScore;

/// VIF output.
pub type VifScore = ScaledScore;

/// ANSNR output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AnsnrScore {
    /// Anti-noise SNR.
    pub score: f64,
    /// PSNR of the filtered planes.
    pub psnr: f64,
}

/// The feature functions a run calls for every frame.
///
/// Planes carry their own width, height and stride. The pipeline guarantees
/// that `psnr`, `ssim` and `ms_ssim` see the samples as read, and that every
/// other function sees them after [`OPT_RANGE_PIXEL_OFFSET`] was added.
pub trait FeatureExtractor {
    /// PSNR, clamped to `psnr_max`.
    fn psnr(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
        peak: f64,
        psnr_max: f64,
    ) -> FeatureResult<f64>;

    /// SSIM with its luminance, contrast and structure terms.
    fn ssim(&mut self, reference: PlaneRef<'_>, distorted: PlaneRef<'_>) -> FeatureResult<SsimScore>;

    /// MS-SSIM with per-scale terms.
    fn ms_ssim(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
    ) -> FeatureResult<MsSsimScore>;

    /// ADM, ignoring `border_factor` of each border when pooling.
    fn adm(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
        border_factor: f64,
    ) -> FeatureResult<AdmScore>;

    /// ANSNR and the PSNR of the filtered planes, clamped to `psnr_max`.
    fn ansnr(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
        peak: f64,
        psnr_max: f64,
    ) -> FeatureResult<AnsnrScore>;

    /// Motion between the previous and current blurred reference planes.
    fn motion(&mut self, previous: PlaneRef<'_>, current: PlaneRef<'_>) -> FeatureResult<f64>;

    /// VIF over four scales.
    fn vif(&mut self, reference: PlaneRef<'_>, distorted: PlaneRef<'_>) -> FeatureResult<VifScore>;
}

impl<F: FeatureExtractor + ?Sized> FeatureExtractor for &mut F {
    fn psnr(&mut self, r: PlaneRef<'_>, d: PlaneRef<'_>, peak: f64, max: f64) -> FeatureResult<f64> {
        (**self).psnr(r, d, peak, max)
    }
    fn ssim(&mut self, r: PlaneRef<'_>, d: PlaneRef<'_>) -> FeatureResult<SsimScore> {
        (**self).ssim(r, d)
    }
    fn ms_ssim(&mut self, r: PlaneRef<'_>, d: PlaneRef<'_>) -> FeatureResult<MsSsimScore> {
        (**self).ms_ssim(r, d)
    }
    fn adm(&mut self, r: PlaneRef<'_>, d: PlaneRef<'_>, border: f64) -> FeatureResult<AdmScore> {
        (**self).adm(r, d, border)
    }
    fn ansnr(
        &mut self,
        r: PlaneRef<'_>,
        d: PlaneRef<'_>,
        peak: f64,
        max: f64,
    ) -> FeatureResult<AnsnrScore> {
        (**self).ansnr(r, d, peak, max)
    }
    fn motion(&mut self, p: PlaneRef<'_>, c: PlaneRef<'_>) -> FeatureResult<f64> {
        (**self).motion(p, c)
    }
    fn vif(&mut self, r: PlaneRef<'_>, d: PlaneRef<'_>) -> FeatureResult<VifScore> {
        (**self).vif(r, d)
    }
}

/// The feature implementations bundled with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeFeatures {
    cpu: CpuCapability,
}

impl NativeFeatures {
    /// Native features using the given instruction set for their filters.
    pub fn new(cpu: CpuCapability) -> Self {
        NativeFeatures { cpu }
    }
}

fn check_dimensions(reference: PlaneRef<'_>, distorted: PlaneRef<'_>) -> FeatureResult<()> {
    if reference.width() != distorted.width() || reference.height() != distorted.height() {
        return Err(format!(
            "plane dimensions differ: {}x{} vs {}x{}",
            reference.width(),
            reference.height(),
            distorted.width(),
            distorted.height()
        )
        .into());
    }
    if reference.width() == 0 || reference.height() == 0 {
        return Err("empty plane".into());
    }
    Ok(())
}

impl FeatureExtractor for NativeFeatures {
    fn psnr(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
        peak: f64,
        psnr_max: f64,
    ) -> FeatureResult<f64> {
        check_dimensions(reference, distorted)?;
        Ok(psnr::calculate_plane_psnr(reference, distorted, peak, psnr_max))
    }

    fn ssim(&mut self, reference: PlaneRef<'_>, distorted: PlaneRef<'_>) -> FeatureResult<SsimScore> {
        check_dimensions(reference, distorted)?;
        Ok(ssim::calculate_plane_ssim(reference, distorted, self.cpu))
    }

    fn ms_ssim(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
    ) -> FeatureResult<MsSsimScore> {
        check_dimensions(reference, distorted)?;
        Ok(ssim::calculate_plane_msssim(reference, distorted, self.cpu))
    }

    fn adm(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
        border_factor: f64,
    ) -> FeatureResult<AdmScore> {
        check_dimensions(reference, distorted)?;
        if !(0.0..0.5).contains(&border_factor) {
            return Err(format!("border factor {} out of range", border_factor).into());
        }
        Ok(adm::calculate_plane_adm(reference, distorted, border_factor))
    }

    fn ansnr(
        &mut self,
        reference: PlaneRef<'_>,
        distorted: PlaneRef<'_>,
        peak: f64,
        psnr_max: f64,
    ) -> FeatureResult<AnsnrScore> {
        check_dimensions(reference, distorted)?;
        Ok(ansnr::calculate_plane_ansnr(reference, distorted, peak, psnr_max, self.cpu))
    }

    fn motion(&mut self, previous: PlaneRef<'_>, current: PlaneRef<'_>) -> FeatureResult<f64> {
        check_dimensions(previous, current)?;
        Ok(motion::calculate_plane_motion(previous, current))
    }

    fn vif(&mut self, reference: PlaneRef<'_>, distorted: PlaneRef<'_>) -> FeatureResult<VifScore> {
        check_dimensions(reference, distorted)?;
        Ok(vif::calculate_plane_vif(reference, distorted, self.cpu))
    }
}
