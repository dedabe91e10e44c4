use std::alloc::Layout;
use std::cell::Cell;
use std::ptr::NonNull;
use vmaf_combo::video::*;
use vmaf_combo::{ComboError, ErrorKind};

#[inline(always)]
fn assert_metric_eq(expected: f64, value: f64) {
    assert!(
        (expected - value).abs() < 0.01,
        "Expected {}, got {}",
        expected,
        value
    );
}

/// Records every call and can fail the n-th call (counting from 1) of one feature.
#[derive(Default)]
struct Recorder {
    calls: Vec<Feature>,
    fail_on: Option<(Feature, usize)>,
    peaks: Vec<(f64, f64)>,
    motion_args: Vec<(f64, f64)>,
}

fn plane_sum(plane: PlaneRef<'_>) -> f64 {
    plane.rows().flatten().map(|&v| v as f64).sum()
}

impl Recorder {
    fn failing(feature: Feature, call: usize) -> Self {
        Recorder {
            fail_on: Some((feature, call)),
            ..Default::default()
        }
    }

    fn record(&mut self, feature: Feature) -> FeatureResult<()> {
        self.calls.push(feature);
        let count = self.calls.iter().filter(|&&f| f == feature).count();
        if self.fail_on == Some((feature, count)) {
            return Err(format!("injected failure in call {}", count).into());
        }
        Ok(())
    }

    fn count(&self, feature: Feature) -> usize {
        self.calls.iter().filter(|&&f| f == feature).count()
    }
}

impl FeatureExtractor for Recorder {
    fn psnr(
        &mut self,
        reference: PlaneRef<'_>,
        _: PlaneRef<'_>,
        peak: f64,
        psnr_max: f64,
    ) -> FeatureResult<f64> {
        self.record(Feature::Psnr)?;
        self.peaks.push((peak, psnr_max));
        Ok(reference.row(0)[0] as f64)
    }

    fn ssim(&mut self, reference: PlaneRef<'_>, _: PlaneRef<'_>) -> FeatureResult<SsimScore> {
        self.record(Feature::Ssim)?;
        Ok(SsimScore {
            score: reference.row(0)[0] as f64,
            ..Default::default()
        })
    }

    fn ms_ssim(&mut self, _: PlaneRef<'_>, _: PlaneRef<'_>) -> FeatureResult<MsSsimScore> {
        self.record(Feature::MsSsim)?;
        Ok(MsSsimScore {
            score: 0.5,
            ..Default::default()
        })
    }

    fn adm(&mut self, reference: PlaneRef<'_>, _: PlaneRef<'_>, border: f64) -> FeatureResult<AdmScore> {
        self.record(Feature::Adm)?;
        let mut adm = AdmScore {
            score: 1.0,
            num: reference.row(0)[0] as f64,
            den: border,
            ..Default::default()
        };
        adm.scales[3] = ScaleScore { num: 3.0, den: 4.0 };
        Ok(adm)
    }

    fn ansnr(
        &mut self,
        _: PlaneRef<'_>,
        _: PlaneRef<'_>,
        _: f64,
        _: f64,
    ) -> FeatureResult<AnsnrScore> {
        self.record(Feature::Ansnr)?;
        Ok(AnsnrScore::default())
    }

    fn motion(&mut self, previous: PlaneRef<'_>, current: PlaneRef<'_>) -> FeatureResult<f64> {
        self.record(Feature::Motion)?;
        self.motion_args.push((plane_sum(previous), plane_sum(current)));
        Ok(7.0)
    }

    fn vif(&mut self, _: PlaneRef<'_>, distorted: PlaneRef<'_>) -> FeatureResult<VifScore> {
        self.record(Feature::Vif)?;
        let mut vif = VifScore {
            score: distorted.row(0)[0] as f64,
            ..Default::default()
        };
        vif.scales[0] = ScaleScore { num: 1.0, den: 2.0 };
        Ok(vif)
    }
}

/// Delivers `frames` frames whose reference samples are `100 + frame` and
/// distorted samples `90 + frame`, then the end of the stream.
fn counting_source<'a>(frames: usize, reads: &'a Cell<usize>) -> impl FrameSource + 'a {
    read_fn(move |r, d| {
        let frame = reads.get();
        reads.set(frame + 1);
        if frame == frames {
            return END_OF_STREAM;
        }
        for y in 0..r.height() {
            for v in r.row_mut(y) {
                *v = 100.0 + frame as f32;
            }
            for v in d.row_mut(y) {
                *v = 90.0 + frame as f32;
            }
        }
        FRAME_DELIVERED
    })
}

fn config(width: usize, height: usize, format: &str) -> ComboConfig {
    ComboConfig::new(width, height, format)
        .unwrap()
        .with_cpu(CpuCapability::Scalar)
}

#[derive(Default)]
struct CountingAllocator {
    allocated: Cell<usize>,
    released: Cell<usize>,
    fail_at: Option<usize>,
}

unsafe impl PlaneAllocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if self.fail_at == Some(self.allocated.get()) {
            return None;
        }
        let ptr = SystemAllocator.allocate(layout)?;
        self.allocated.set(self.allocated.get() + 1);
        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        self.released.set(self.released.get() + 1);
        SystemAllocator.release(ptr, layout);
    }
}

#[test]
fn three_frames_fill_every_series() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::all();
    let frames = Combo::new(config(4, 4, "yuv420p"))
        .run(counting_source(3, &reads), &mut recorder, &mut series)
        .unwrap();

    assert_eq!(frames, 3);
    assert_eq!(reads.get(), 4);
    for (name, values) in series.iter() {
        assert_eq!(values.len(), 3, "{}", name);
    }
    let motion = series.get("motion").unwrap();
    assert_eq!(motion.values(), &[0.0, 7.0, 7.0]);
    assert_eq!(series.get("adm_num_scale3").unwrap().get(2), Some(3.0));
    assert_eq!(series.get("adm_den_scale3").unwrap().get(2), Some(4.0));
    assert_eq!(series.get("vif_den_scale0").unwrap().get(0), Some(2.0));
    assert_metric_eq(0.5, series.get("ms_ssim").unwrap().get(1).unwrap());
}

#[test]
fn features_run_in_a_fixed_order() {
    use Feature::*;
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::all();
    Combo::new(config(4, 4, "yuv444p"))
        .run(counting_source(2, &reads), &mut recorder, &mut series)
        .unwrap();
    assert_eq!(
        recorder.calls,
        vec![
            Psnr, Ssim, MsSsim, Adm, Ansnr, Vif, // first frame has no motion call
            Psnr, Ssim, MsSsim, Adm, Ansnr, Motion, Vif,
        ]
    );
}

#[test]
fn offset_applies_only_to_range_sensitive_features() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::all();
    Combo::new(config(4, 4, "yuv420p"))
        .run(counting_source(2, &reads), &mut recorder, &mut series)
        .unwrap();

    // psnr and ssim report the raw reference sample
    assert_eq!(series.psnr.as_ref().unwrap().values(), &[100.0, 101.0]);
    assert_eq!(series.ssim.as_ref().unwrap().values(), &[100.0, 101.0]);
    // adm reports the offset reference sample, vif the offset distorted one
    assert_eq!(series.adm_num.as_ref().unwrap().values(), &[-28.0, -27.0]);
    assert_eq!(series.vif.as_ref().unwrap().values(), &[-38.0, -37.0]);
    assert_metric_eq(0.1, series.adm_den.as_ref().unwrap().get(0).unwrap());
}

#[test]
fn motion_compares_consecutive_filtered_frames() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::new().with_motion();
    Combo::new(config(8, 6, "yuv420p"))
        .run(counting_source(4, &reads), &mut recorder, &mut series)
        .unwrap();

    assert_eq!(recorder.motion_args.len(), 3);
    for pair in recorder.motion_args.windows(2) {
        // the previous plane of a call is the current plane of the one before
        assert_metric_eq(pair[0].1, pair[1].0);
    }
    // flat frames stay flat through the filter: (100 + frame - 128) * 48
    assert_metric_eq(-28.0 * 48.0, recorder.motion_args[0].0);
    assert_metric_eq(-27.0 * 48.0, recorder.motion_args[0].1);
}

#[test]
fn disabled_features_are_never_called() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::new().with_psnr();
    let frames = Combo::new(config(4, 4, "yuv420p"))
        .run(counting_source(3, &reads), &mut recorder, &mut series)
        .unwrap();

    assert_eq!(frames, 3);
    assert_eq!(recorder.count(Feature::Psnr), 3);
    assert_eq!(recorder.count(Feature::Ansnr), 3);
    for feature in &[
        Feature::Ssim,
        Feature::MsSsim,
        Feature::Adm,
        Feature::Motion,
        Feature::Vif,
    ] {
        assert_eq!(recorder.count(*feature), 0, "{}", feature);
    }
    assert!(series.ssim.is_none());
    assert!(series.adm_num.is_none());
    assert!(series.motion.is_none());
}

#[test]
fn one_scale_series_enables_its_feature() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::new();
    assert!(series.enable("vif_den_scale0"));
    Combo::new(config(4, 4, "yuv420p"))
        .run(counting_source(2, &reads), &mut recorder, &mut series)
        .unwrap();
    assert_eq!(recorder.count(Feature::Vif), 2);
    assert_eq!(recorder.count(Feature::Adm), 0);
    assert_eq!(series.iter().count(), 1);
    assert_eq!(series.vif_den_scale[0].as_ref().unwrap().len(), 2);
}

#[test]
fn ten_bit_formats_use_their_peak() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::new().with_psnr();
    Combo::new(config(4, 4, "yuv422p10le"))
        .run(counting_source(1, &reads), &mut recorder, &mut series)
        .unwrap();
    assert_eq!(recorder.peaks, vec![(255.75, 72.0)]);

    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    Combo::new(config(4, 4, "yuv444p"))
        .run(counting_source(1, &reads), &mut recorder, &mut series)
        .unwrap();
    assert_eq!(recorder.peaks, vec![(255.0, 60.0)]);
}

#[test]
fn empty_stream_produces_empty_series() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::all();
    let frames = Combo::new(config(4, 4, "yuv420p"))
        .run(counting_source(0, &reads), &mut recorder, &mut series)
        .unwrap();
    assert_eq!(frames, 0);
    assert!(recorder.calls.is_empty());
    assert!(series.iter().all(|(_, values)| values.is_empty()));
}

#[test]
fn reader_status_is_propagated() {
    let mut reads = 0;
    let source = read_fn(|_, _| {
        reads += 1;
        if reads <= 2 {
            FRAME_DELIVERED
        } else {
            -17
        }
    });
    let mut recorder = Recorder::default();
    let mut series = ComboSeries::all();
    let err = Combo::new(config(4, 4, "yuv420p"))
        .run(source, &mut recorder, &mut series)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Reader);
    assert_eq!(err.status(), -17);
    assert!(err.to_string().contains("-17"));
    assert_eq!(series.psnr.as_ref().unwrap().len(), 2);
}

#[test]
fn unknown_format_fails_before_reading() {
    let reads = Cell::new(0);
    let mut series = ComboSeries::all();
    let err = calculate_video_features(counting_source(3, &reads), 4, 4, "yuv999p", &mut series)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert_eq!(err.to_string(), "unknown format yuv999p");
    assert_eq!(reads.get(), 0);
    assert!(series.iter().all(|(_, values)| values.is_empty()));
}

#[test]
fn bad_dimensions_fail_before_reading() {
    let reads = Cell::new(0);
    let mut series = ComboSeries::all();
    for &(width, height) in &[(0, 4), (4, 0), (usize::MAX, 1), (1, usize::MAX)] {
        let err = calculate_video_features(
            counting_source(3, &reads),
            width,
            height,
            "yuv444p",
            &mut series,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parameter);
    }
    let err = calculate_video_features(counting_source(3, &reads), 3, 5, "yuv420p", &mut series)
        .unwrap_err();
    assert!(matches!(err, ComboError::OddPlaneArea { width: 3, height: 5 }));
    assert_eq!(reads.get(), 0);
}

#[test]
fn allocation_failure_releases_what_was_acquired() {
    for fail_at in 0..5 {
        let allocator = CountingAllocator {
            fail_at: Some(fail_at),
            ..Default::default()
        };
        let reads = Cell::new(0);
        let mut recorder = Recorder::default();
        let mut series = ComboSeries::all();
        let err = Combo::new(config(4, 4, "yuv420p"))
            .with_allocator(&allocator)
            .run(counting_source(3, &reads), &mut recorder, &mut series)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        assert_eq!(reads.get(), 0);
        assert_eq!(allocator.allocated.get(), fail_at);
        assert_eq!(allocator.released.get(), fail_at);
    }
}

#[test]
fn every_buffer_is_released_exactly_once() {
    let allocator = CountingAllocator::default();
    let reads = Cell::new(0);
    let mut series = ComboSeries::all();
    Combo::new(config(4, 4, "yuv420p"))
        .with_allocator(&allocator)
        .run(counting_source(3, &reads), Recorder::default(), &mut series)
        .unwrap();
    assert_eq!(allocator.allocated.get(), 5);
    assert_eq!(allocator.released.get(), 5);

    let allocator = CountingAllocator::default();
    let reads = Cell::new(0);
    Combo::new(config(4, 4, "yuv420p"))
        .with_allocator(&allocator)
        .run(
            counting_source(3, &reads),
            Recorder::failing(Feature::Vif, 2),
            &mut series,
        )
        .unwrap_err();
    assert_eq!(allocator.allocated.get(), 5);
    assert_eq!(allocator.released.get(), 5);
}

#[test]
fn failing_frame_is_not_committed() {
    let reads = Cell::new(0);
    let mut recorder = Recorder::failing(Feature::Adm, 3);
    let mut series = ComboSeries::all();
    let err = Combo::new(config(4, 4, "yuv420p"))
        .run(counting_source(5, &reads), &mut recorder, &mut series)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MetricComputation);
    assert_eq!(err.feature(), Some(Feature::Adm));
    assert!(err.to_string().starts_with("compute_adm failed"));
    // psnr, ssim and ms_ssim ran for the third frame but were not appended
    assert_eq!(recorder.count(Feature::Psnr), 3);
    for name in &["psnr", "ssim", "ms_ssim", "adm_num", "motion", "vif"] {
        assert_eq!(series.get(name).unwrap().len(), 2, "{}", name);
    }
    assert_eq!(reads.get(), 3);
}

#[test]
fn failures_are_tagged_with_their_feature() {
    for &(feature, call) in &[
        (Feature::Psnr, 1),
        (Feature::Ssim, 2),
        (Feature::MsSsim, 1),
        (Feature::Ansnr, 2),
        (Feature::Motion, 1),
        (Feature::Vif, 3),
    ] {
        let reads = Cell::new(0);
        let mut series = ComboSeries::all();
        let err = Combo::new(config(4, 4, "yuv420p"))
            .run(
                counting_source(4, &reads),
                Recorder::failing(feature, call),
                &mut series,
            )
            .unwrap_err();
        assert_eq!(err.feature(), Some(feature));
        assert!(err.to_string().contains(&format!("compute_{}", feature)));
        assert_ne!(err.status(), 0);
    }
}

#[test]
fn ansnr_failure_aborts_even_without_series() {
    let reads = Cell::new(0);
    let mut series = ComboSeries::new();
    let err = Combo::new(config(4, 4, "yuv420p"))
        .run(
            counting_source(2, &reads),
            Recorder::failing(Feature::Ansnr, 1),
            &mut series,
        )
        .unwrap_err();
    assert_eq!(err.feature(), Some(Feature::Ansnr));
}

#[test]
fn native_features_over_a_short_clip() {
    let mut frame = 0;
    let source = read_fn(|r, d| {
        if frame == 3 {
            return END_OF_STREAM;
        }
        for y in 0..r.height() {
            for (x, (rv, dv)) in r.row_mut(y).iter_mut().zip(d.row_mut(y)).enumerate() {
                *rv = ((x * 9 + y * 5 + frame * 4) % 200) as f32 + 20.0;
                *dv = *rv + if (x ^ y) & 1 == 0 { 3.0 } else { -3.0 };
            }
        }
        frame += 1;
        FRAME_DELIVERED
    });
    let mut series = ComboSeries::all();
    let frames = calculate_video_features(source, 32, 24, "yuv420p", &mut series).unwrap();
    assert_eq!(frames, 3);

    let psnr = series.get("psnr").unwrap();
    // every sample is off by exactly 3
    for value in psnr.iter() {
        assert_metric_eq(38.5884, value);
    }
    for value in series.get("ssim").unwrap().iter() {
        assert!(value > 0.0 && value < 1.0);
    }
    let motion = series.get("motion").unwrap();
    assert_eq!(motion.get(0), Some(0.0));
    assert!(motion.get(2).unwrap() > 0.0);
    for value in series.get("vif").unwrap().iter() {
        assert!(value.is_finite() && value > 0.0);
    }
}

#[cfg(feature = "decode")]
#[test]
fn raw_yuv_files_end_to_end() {
    use std::io::Cursor;

    let (width, height) = (8, 4);
    let luma = width * height;
    let chroma = PixelFormat::Yuv420p.chroma_samples(width, height).unwrap();
    let mut reference = Vec::new();
    let mut distorted = Vec::new();
    for frame in 0..2u8 {
        reference.extend((0..luma).map(|i| (i as u8).wrapping_mul(5).wrapping_add(frame)));
        reference.extend(std::iter::repeat(128).take(chroma));
        distorted.extend((0..luma).map(|i| (i as u8).wrapping_mul(5).wrapping_add(frame) ^ 1));
        distorted.extend(std::iter::repeat(128).take(chroma));
    }

    let source = RawYuvSource::new(
        Cursor::new(reference),
        Cursor::new(distorted),
        width,
        height,
        PixelFormat::Yuv420p,
    )
    .unwrap();
    let mut series = ComboSeries::new().with_psnr().with_motion();
    let frames = calculate_video_features(source, width, height, "yuv420p", &mut series).unwrap();
    assert_eq!(frames, 2);
    // every sample differs by exactly one
    for value in series.psnr.as_ref().unwrap().iter() {
        assert_metric_eq(48.1308, value);
    }
    assert_eq!(series.motion.as_ref().unwrap().len(), 2);
}
