use crate::video::convolution::{convolution_f32, CpuCapability, FILTER_5};
use crate::video::features::{
    Feature, FeatureExtractor, NativeFeatures, ADM_BORDER_FACTOR, OPT_RANGE_PIXEL_OFFSET,
};
use crate::video::pixel::PixelFormat;
use crate::video::plane::{PlaneAllocator, PlaneGeometry, RunBuffers, SystemAllocator};
use crate::video::series::{ComboSeries, FrameScores};
use crate::video::source::{FrameSource, FrameStatus};
use crate::ComboError;
use std::fmt;
use std::mem::size_of;

/// Extracts every series enabled in `series` from the frames `source`
/// delivers, using the bundled feature implementations.
///
/// `format` is one of the tags accepted by [`PixelFormat`]'s `FromStr`.
/// Returns the number of frames processed.
pub fn calculate_video_features<S: FrameSource>(
    source: S,
    width: usize,
    height: usize,
    format: &str,
    series: &mut ComboSeries,
) -> Result<usize, ComboError> {
    let config = ComboConfig::new(width, height, format)?;
    let features = NativeFeatures::new(config.cpu());
    Combo::new(config).run(source, features, series)
}

/// The validated parameters of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComboConfig {
    geometry: PlaneGeometry,
    format: PixelFormat,
    cpu: CpuCapability,
}

impl ComboConfig {
    /// Validates the luma plane size and the pixel format tag.
    ///
    /// Nothing is allocated or read here; any problem with the parameters is
    /// reported before a run starts.
    pub fn new(width: usize, height: usize, format: &str) -> Result<Self, ComboError> {
        let geometry = PlaneGeometry::new(width, height)?;
        let format: PixelFormat = format.parse()?;
        ComboConfig::with_geometry(geometry, format)
    }

    /// As [`new`](ComboConfig::new), for an already parsed format.
    pub fn with_format(width: usize, height: usize, format: PixelFormat) -> Result<Self, ComboError> {
        ComboConfig::with_geometry(PlaneGeometry::new(width, height)?, format)
    }

    fn with_geometry(geometry: PlaneGeometry, format: PixelFormat) -> Result<Self, ComboError> {
        format.validate_dimensions(geometry.width(), geometry.height())?;
        Ok(ComboConfig {
            geometry,
            format,
            cpu: CpuCapability::detect(),
        })
    }

    /// Overrides the detected instruction set.
    pub fn with_cpu(mut self, cpu: CpuCapability) -> Self {
        self.cpu = cpu;
        self
    }

    /// Luma width.
    pub fn width(&self) -> usize {
        self.geometry.width()
    }

    /// Luma height.
    pub fn height(&self) -> usize {
        self.geometry.height()
    }

    /// Plane dimensions and stride.
    pub fn geometry(&self) -> &PlaneGeometry {
        &self.geometry
    }

    /// Pixel format of the input.
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Instruction set the temporal filter may use.
    pub fn cpu(&self) -> CpuCapability {
        self.cpu
    }
}

/// Which feature groups a run computes, decided once from the enabled series.
#[derive(Debug, Clone, Copy)]
struct EnabledFeatures {
    psnr: bool,
    ssim: bool,
    ms_ssim: bool,
    adm: bool,
    motion: bool,
    vif: bool,
}

impl EnabledFeatures {
    fn of(series: &ComboSeries) -> Self {
        EnabledFeatures {
            psnr: series.psnr.is_some(),
            ssim: series.ssim.is_some(),
            ms_ssim: series.ms_ssim.is_some(),
            adm: series.adm_enabled(),
            motion: series.motion_enabled(),
            vif: series.vif_enabled(),
        }
    }
}

/// Drives one reference/distorted video pair through the feature functions.
///
/// Every frame goes through the same steps, in this order:
///
/// 1. PSNR, SSIM and MS-SSIM on the samples as read.
/// 2. [`OPT_RANGE_PIXEL_OFFSET`] is added to both planes in place.
/// 3. ADM, then ANSNR.
/// 4. The reference is low-pass filtered with [`FILTER_5`] and motion is
///    scored against the previous frame's filtered reference (0 on the first
///    frame).
/// 5. VIF.
///
/// A feature whose series are all disabled is not called. ANSNR has no
/// series and is always called. The frame's scores are appended only once
/// every step succeeded, so a failing frame leaves no trace in the series.
pub struct Combo<'a> {
    config: ComboConfig,
    allocator: &'a dyn PlaneAllocator,
    progress: Option<Box<dyn FnMut(usize) + 'a>>,
}

impl fmt::Debug for Combo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Combo")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl<'a> Combo<'a> {
    /// A run over the process heap, without progress reporting.
    pub fn new(config: ComboConfig) -> Self {
        Combo {
            config,
            allocator: &SystemAllocator,
            progress: None,
        }
    }

    /// Acquires the run's buffers from `allocator` instead of the heap.
    pub fn with_allocator(mut self, allocator: &'a dyn PlaneAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// Calls `progress_callback` with the number of completed frames after
    /// each frame is committed.
    pub fn with_progress<F: FnMut(usize) + 'a>(mut self, progress_callback: F) -> Self {
        self.progress = Some(Box::new(progress_callback));
        self
    }

    /// The run's parameters.
    pub fn config(&self) -> &ComboConfig {
        &self.config
    }

    /// Processes frames until `source` reports the end of the stream.
    ///
    /// Returns the number of frames processed. On failure the series hold the
    /// frames completed before the failing one. All buffers are released
    /// before this returns, whatever the outcome.
    pub fn run<S: FrameSource, E: FeatureExtractor>(
        &mut self,
        mut source: S,
        mut features: E,
        series: &mut ComboSeries,
    ) -> Result<usize, ComboError> {
        let config = self.config;
        let enabled = EnabledFeatures::of(series);
        debug!(
            "starting run: {}x{} {}, {:?}, {:?}",
            config.width(),
            config.height(),
            config.format(),
            config.cpu(),
            enabled
        );

        let mut buffers = RunBuffers::allocate(config.geometry(), self.allocator)?;
        let mut strides = None;
        let mut frames = 0;
        loop {
            let status = source
                .read_frame(&mut buffers.reference, &mut buffers.distorted)
                .map_err(|status| ComboError::Reader { status })?;
            if status == FrameStatus::EndOfStream {
                break;
            }
            check_strides(&buffers, &mut strides)?;

            let scores = process_frame(&mut buffers, &mut features, frames, &config, &enabled)?;
            scores.commit(series);
            trace!("frame {} committed", frames);
            frames += 1;

            if let Some(progress) = self.progress.as_mut() {
                progress(frames);
            }
        }

        debug!("run finished after {} frames", frames);
        Ok(frames)
    }
}

/// Fixes the strides on the first frame and rejects any later change.
fn check_strides(
    buffers: &RunBuffers<'_>,
    strides: &mut Option<(usize, usize)>,
) -> Result<(), ComboError> {
    let current = (buffers.reference.stride(), buffers.distorted.stride());
    let (reference, distorted) = *strides.get_or_insert(current);
    if current.0 != reference {
        return Err(ComboError::IncompatibleStride {
            plane: "reference",
            stride: current.0,
            expected: reference,
        });
    }
    if current.1 != distorted {
        return Err(ComboError::IncompatibleStride {
            plane: "distorted",
            stride: current.1,
            expected: distorted,
        });
    }
    Ok(())
}

fn process_frame<E: FeatureExtractor>(
    buffers: &mut RunBuffers<'_>,
    features: &mut E,
    frame: usize,
    config: &ComboConfig,
    enabled: &EnabledFeatures,
) -> Result<FrameScores, ComboError> {
    let peak = config.format().peak();
    let psnr_max = config.format().psnr_max();
    let mut scores = FrameScores::default();

    {
        let reference = buffers.reference.as_plane_ref();
        let distorted = buffers.distorted.as_plane_ref();
        if enabled.psnr {
            let psnr = features
                .psnr(reference, distorted, peak, psnr_max)
                .map_err(|e| ComboError::computation(Feature::Psnr, e))?;
            scores.psnr = Some(psnr);
        }
        if enabled.ssim {
            let ssim = features
                .ssim(reference, distorted)
                .map_err(|e| ComboError::computation(Feature::Ssim, e))?;
            scores.ssim = Some(ssim.score);
        }
        if enabled.ms_ssim {
            let ms_ssim = features
                .ms_ssim(reference, distorted)
                .map_err(|e| ComboError::computation(Feature::MsSsim, e))?;
            scores.ms_ssim = Some(ms_ssim.score);
        }
    }

    buffers.reference.offset(OPT_RANGE_PIXEL_OFFSET);
    buffers.distorted.offset(OPT_RANGE_PIXEL_OFFSET);

    let reference = buffers.reference.as_plane_ref();
    let distorted = buffers.distorted.as_plane_ref();
    if enabled.adm {
        let adm = features
            .adm(reference, distorted, ADM_BORDER_FACTOR)
            .map_err(|e| ComboError::computation(Feature::Adm, e))?;
        scores.adm = Some(adm);
    }
    let ansnr = features
        .ansnr(reference, distorted, peak, psnr_max)
        .map_err(|e| ComboError::computation(Feature::Ansnr, e))?;
    trace!("frame {}: ansnr {:.3}, psnr {:.3}", frame, ansnr.score, ansnr.psnr);

    if enabled.motion {
        let blur_stride = buffers.blur.stride() / size_of::<f32>();
        convolution_f32(
            &FILTER_5,
            reference,
            buffers.blur.as_mut_slice(),
            blur_stride,
            &mut buffers.scratch,
            config.cpu(),
        )
        .map_err(|e| ComboError::computation(Feature::TemporalFilter, e))?;

        let motion = if frame == 0 {
            0.0
        } else {
            features
                .motion(buffers.prev_blur.as_plane_ref(), buffers.blur.as_plane_ref())
                .map_err(|e| ComboError::computation(Feature::Motion, e))?
        };
        scores.motion = Some(motion);
        buffers.prev_blur.copy_from(&buffers.blur);
    }

    if enabled.vif {
        let vif = features
            .vif(reference, distorted)
            .map_err(|e| ComboError::computation(Feature::Vif, e))?;
        scores.vif = Some(vif);
    }

    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::plane::tests::CountingAllocator;
    use crate::video::plane::AlignedBuffer;
    use crate::video::source::{read_fn, END_OF_STREAM, FRAME_DELIVERED};
    use crate::video::SamplePlane;
    use crate::ErrorKind;

    fn ramp_source(frames: usize) -> impl FrameSource {
        let mut delivered = 0;
        read_fn(move |r: &mut SamplePlane<'_>, d: &mut SamplePlane<'_>| {
            if delivered == frames {
                return END_OF_STREAM;
            }
            for y in 0..r.height() {
                for (x, (rp, dp)) in r.row_mut(y).iter_mut().zip(d.row_mut(y).iter_mut()).enumerate() {
                    *rp = ((x * 7 + y * 13 + delivered * 5) % 256) as f32;
                    *dp = *rp + if (x + y) % 2 == 0 { 2.0 } else { -2.0 };
                }
            }
            delivered += 1;
            FRAME_DELIVERED
        })
    }

    #[test]
    fn config_validates_before_anything_else() {
        assert!(matches!(
            ComboConfig::new(0, 4, "yuv420p"),
            Err(ComboError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            ComboConfig::new(4, 4, "yuv999p"),
            Err(ComboError::UnknownFormat { .. })
        ));
        assert!(matches!(
            ComboConfig::new(3, 3, "yuv420p"),
            Err(ComboError::OddPlaneArea { .. })
        ));
        let config = ComboConfig::new(3, 3, "yuv444p").unwrap();
        assert_eq!(config.geometry().stride(), 32);
        let config = config.with_cpu(CpuCapability::Scalar);
        assert_eq!(config.cpu(), CpuCapability::Scalar);
    }

    #[test]
    fn native_run_fills_every_series() {
        let config = ComboConfig::new(16, 12, "yuv420p")
            .unwrap()
            .with_cpu(CpuCapability::Scalar);
        let mut series = ComboSeries::all();
        let mut progress = Vec::new();
        let frames = Combo::new(config)
            .with_progress(|n| progress.push(n))
            .run(ramp_source(3), NativeFeatures::new(config.cpu()), &mut series)
            .unwrap();
        assert_eq!(frames, 3);
        assert_eq!(progress, vec![1, 2, 3]);
        for (name, values) in series.iter() {
            assert_eq!(values.len(), 3, "{}", name);
            assert!(values.iter().all(f64::is_finite), "{}", name);
        }
        let motion = series.get("motion").unwrap();
        assert_eq!(motion.get(0), Some(0.0));
        assert!(motion.get(1).unwrap() > 0.0);
    }

    #[test]
    fn buffers_are_released_on_success_and_failure() {
        let allocator = CountingAllocator::default();
        let config = ComboConfig::new(8, 8, "yuv444p").unwrap();
        let mut series = ComboSeries::vmaf_features();
        Combo::new(config)
            .with_allocator(&allocator)
            .run(ramp_source(2), NativeFeatures::default(), &mut series)
            .unwrap();
        assert_eq!(allocator.allocated.get(), 5);
        assert_eq!(allocator.released.get(), 5);

        let allocator = CountingAllocator::default();
        let err = Combo::new(config)
            .with_allocator(&allocator)
            .run(read_fn(|_, _| -3), NativeFeatures::default(), &mut series)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Reader);
        assert_eq!(allocator.allocated.get(), allocator.released.get());
    }

    #[test]
    fn stride_may_only_change_on_the_first_frame() {
        let config = ComboConfig::new(4, 4, "yuv444p").unwrap();
        let mut frame = 0;
        let source = read_fn(move |r, _| {
            frame += 1;
            match frame {
                1 => r.set_stride(16).map_or(-9, |_| FRAME_DELIVERED),
                2 => FRAME_DELIVERED,
                _ => r.set_stride(32).map_or(-9, |_| FRAME_DELIVERED),
            }
        });
        let mut series = ComboSeries::new().with_psnr();
        let err = Combo::new(config)
            .run(source, NativeFeatures::default(), &mut series)
            .unwrap_err();
        assert!(matches!(
            err,
            ComboError::IncompatibleStride {
                plane: "reference",
                stride: 32,
                expected: 16
            }
        ));
        assert_eq!(series.psnr.unwrap().len(), 2);
    }

    #[test]
    fn temporal_filter_failure_is_tagged() {
        let config = ComboConfig::new(8, 8, "yuv444p")
            .unwrap()
            .with_cpu(CpuCapability::Scalar);
        let mut buffers = RunBuffers::allocate(config.geometry(), &SystemAllocator).unwrap();
        buffers.scratch = AlignedBuffer::new(4, &SystemAllocator, "temp_buf").unwrap();
        let enabled = EnabledFeatures::of(&ComboSeries::new().with_psnr().with_motion());

        let err = process_frame(&mut buffers, &mut NativeFeatures::default(), 0, &config, &enabled)
            .unwrap_err();
        assert_eq!(err.feature(), Some(Feature::TemporalFilter));
        assert!(err.to_string().starts_with("compute_temporal-filter failed"));

        // without motion the filter never runs
        let enabled = EnabledFeatures::of(&ComboSeries::new().with_psnr());
        assert!(process_frame(&mut buffers, &mut NativeFeatures::default(), 0, &config, &enabled).is_ok());
    }
}
