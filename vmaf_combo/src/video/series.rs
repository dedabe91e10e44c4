use crate::video::features::{AdmScore, VifScore, FEATURE_SCALES};
use std::slice;

/// An append-only sequence of per-frame scores, in frame order.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MetricSeries {
    values: Vec<f64>,
}

impl MetricSeries {
    /// An empty series.
    pub fn new() -> Self {
        MetricSeries::default()
    }

    /// Number of frames recorded.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no frame has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The score of frame `index`.
    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    /// All scores, in frame order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Iterates over the scores in frame order.
    pub fn iter(&self) -> std::iter::Copied<slice::Iter<'_, f64>> {
        self.values.iter().copied()
    }

    pub(crate) fn push(&mut self, value: f64) {
        self.values.push(value);
    }
}

const ADM_NUM_SCALE: [&str; FEATURE_SCALES] = [
    "adm_num_scale0",
    "adm_num_scale1",
    "adm_num_scale2",
    "adm_num_scale3",
];
const ADM_DEN_SCALE: [&str; FEATURE_SCALES] = [
    "adm_den_scale0",
    "adm_den_scale1",
    "adm_den_scale2",
    "adm_den_scale3",
];
const VIF_NUM_SCALE: [&str; FEATURE_SCALES] = [
    "vif_num_scale0",
    "vif_num_scale1",
    "vif_num_scale2",
    "vif_num_scale3",
];
const VIF_DEN_SCALE: [&str; FEATURE_SCALES] = [
    "vif_den_scale0",
    "vif_den_scale1",
    "vif_den_scale2",
    "vif_den_scale3",
];

/// Every series a run can produce. A series left as `None` is disabled: the
/// run never writes to it, and skips the feature entirely if all of that
/// feature's series are disabled.
///
/// ANSNR is always computed but has no series of its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComboSeries {
    /// ADM numerator, summed over scales.
    pub adm_num: Option<MetricSeries>,
    /// ADM denominator, summed over scales.
    pub adm_den: Option<MetricSeries>,
    /// ADM numerator per scale.
    pub adm_num_scale: [Option<MetricSeries>; FEATURE_SCALES],
    /// ADM denominator per scale.
    pub adm_den_scale: [Option<MetricSeries>; FEATURE_SCALES],
    /// Motion. The first frame is always 0.
    pub motion: Option<MetricSeries>,
    /// VIF numerator per scale.
    pub vif_num_scale: [Option<MetricSeries>; FEATURE_SCALES],
    /// VIF denominator per scale.
    pub vif_den_scale: [Option<MetricSeries>; FEATURE_SCALES],
    /// VIF.
    pub vif: Option<MetricSeries>,
    /// PSNR.
    pub psnr: Option<MetricSeries>,
    /// SSIM.
    pub ssim: Option<MetricSeries>,
    /// MS-SSIM.
    pub ms_ssim: Option<MetricSeries>,
}

fn enabled() -> Option<MetricSeries> {
    Some(MetricSeries::new())
}

fn enabled_scales() -> [Option<MetricSeries>; FEATURE_SCALES] {
    [enabled(), enabled(), enabled(), enabled()]
}

fn scaled<'a>(
    names: &'static [&'static str; FEATURE_SCALES],
    slots: &'a [Option<MetricSeries>; FEATURE_SCALES],
) -> impl Iterator<Item = (&'static str, &'a Option<MetricSeries>)> + 'a {
    names.iter().copied().zip(slots.iter())
}

impl ComboSeries {
    /// No series enabled.
    pub fn new() -> Self {
        ComboSeries::default()
    }

    /// Every series enabled.
    pub fn all() -> Self {
        ComboSeries::vmaf_features()
            .with_psnr()
            .with_ssim()
            .with_ms_ssim()
    }

    /// The ADM, motion and VIF series a VMAF model is fed from.
    pub fn vmaf_features() -> Self {
        ComboSeries::new().with_adm().with_motion().with_vif()
    }

    /// Enables every ADM series.
    pub fn with_adm(mut self) -> Self {
        self.adm_num = enabled();
        self.adm_den = enabled();
        self.adm_num_scale = enabled_scales();
        self.adm_den_scale = enabled_scales();
        self
    }

    /// Enables motion.
    pub fn with_motion(mut self) -> Self {
        self.motion = enabled();
        self
    }

    /// Enables every VIF series.
    pub fn with_vif(mut self) -> Self {
        self.vif = enabled();
        self.vif_num_scale = enabled_scales();
        self.vif_den_scale = enabled_scales();
        self
    }

    /// Enables PSNR.
    pub fn with_psnr(mut self) -> Self {
        self.psnr = enabled();
        self
    }

    /// Enables SSIM.
    pub fn with_ssim(mut self) -> Self {
        self.ssim = enabled();
        self
    }

    /// Enables MS-SSIM.
    pub fn with_ms_ssim(mut self) -> Self {
        self.ms_ssim = enabled();
        self
    }

    /// Enables the series called `name`. Returns `false` if there is no such series.
    pub fn enable(&mut self, name: &str) -> bool {
        match self.slot_mut(name) {
            Some(slot) => {
                if slot.is_none() {
                    *slot = enabled();
                }
                true
            }
            None => false,
        }
    }

    /// The series called `name`, if it exists and is enabled.
    pub fn get(&self, name: &str) -> Option<&MetricSeries> {
        self.iter().find(|(n, _)| *n == name).map(|(_, series)| series)
    }

    /// The enabled series with their names, in a fixed order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &MetricSeries)> + '_ {
        std::iter::once(("adm_num", &self.adm_num))
            .chain(std::iter::once(("adm_den", &self.adm_den)))
            .chain(scaled(&ADM_NUM_SCALE, &self.adm_num_scale))
            .chain(scaled(&ADM_DEN_SCALE, &self.adm_den_scale))
            .chain(std::iter::once(("motion", &self.motion)))
            .chain(scaled(&VIF_NUM_SCALE, &self.vif_num_scale))
            .chain(scaled(&VIF_DEN_SCALE, &self.vif_den_scale))
            .chain(std::iter::once(("vif", &self.vif)))
            .chain(std::iter::once(("psnr", &self.psnr)))
            .chain(std::iter::once(("ssim", &self.ssim)))
            .chain(std::iter::once(("ms_ssim", &self.ms_ssim)))
            .filter_map(|(name, slot)| slot.as_ref().map(|series| (name, series)))
    }

    /// Whether any ADM series is enabled.
    pub fn adm_enabled(&self) -> bool {
        self.adm_num.is_some()
            || self.adm_den.is_some()
            || self.adm_num_scale.iter().any(Option::is_some)
            || self.adm_den_scale.iter().any(Option::is_some)
    }

    /// Whether motion, and with it the temporal filter, is enabled.
    pub fn motion_enabled(&self) -> bool {
        self.motion.is_some()
    }

    /// Whether any VIF series is enabled.
    pub fn vif_enabled(&self) -> bool {
        self.vif.is_some()
            || self.vif_num_scale.iter().any(Option::is_some)
            || self.vif_den_scale.iter().any(Option::is_some)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<MetricSeries>> {
        let scale = |names: &[&str; FEATURE_SCALES]| names.iter().position(|n| *n == name);
        Some(match name {
            "adm_num" => &mut self.adm_num,
            "adm_den" => &mut self.adm_den,
            "motion" => &mut self.motion,
            "vif" => &mut self.vif,
            "psnr" => &mut self.psnr,
            "ssim" => &mut self.ssim,
            "ms_ssim" => &mut self.ms_ssim,
            _ => {
                if let Some(i) = scale(&ADM_NUM_SCALE) {
                    &mut self.adm_num_scale[i]
                } else if let Some(i) = scale(&ADM_DEN_SCALE) {
                    &mut self.adm_den_scale[i]
                } else if let Some(i) = scale(&VIF_NUM_SCALE) {
                    &mut self.vif_num_scale[i]
                } else if let Some(i) = scale(&VIF_DEN_SCALE) {
                    &mut self.vif_den_scale[i]
                } else {
                    return None;
                }
            }
        })
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ComboSeries {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        for (name, series) in self.iter() {
            map.serialize_entry(name, series)?;
        }
        map.end()
    }
}

/// The scores of one frame, held back until every feature of the frame has
/// succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FrameScores {
    pub psnr: Option<f64>,
    pub ssim: Option<f64>,
    pub ms_ssim: Option<f64>,
    pub adm: Option<AdmScore>,
    pub motion: Option<f64>,
    pub vif: Option<VifScore>,
}

fn append(slot: &mut Option<MetricSeries>, value: Option<f64>) {
    if let (Some(series), Some(value)) = (slot.as_mut(), value) {
        series.push(value);
    }
}

impl FrameScores {
    /// Appends this frame to every enabled series.
    pub fn commit(&self, series: &mut ComboSeries) {
        append(&mut series.psnr, self.psnr);
        append(&mut series.ssim, self.ssim);
        append(&mut series.ms_ssim, self.ms_ssim);
        if let Some(adm) = self.adm {
            append(&mut series.adm_num, Some(adm.num));
            append(&mut series.adm_den, Some(adm.den));
            for (i, scale) in adm.scales.iter().enumerate() {
                append(&mut series.adm_num_scale[i], Some(scale.num));
                append(&mut series.adm_den_scale[i], Some(scale.den));
            }
        }
        append(&mut series.motion, self.motion);
        if let Some(vif) = self.vif {
            append(&mut series.vif, Some(vif.score));
            for (i, scale) in vif.scales.iter().enumerate() {
                append(&mut series.vif_num_scale[i], Some(scale.num));
                append(&mut series.vif_den_scale[i], Some(scale.den));
            }
        }
    }
}
