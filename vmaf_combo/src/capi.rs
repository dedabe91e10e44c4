//! C interface to a feature extraction run.
//!
//! Frames are pulled through a callback, series live in an opaque handle, and
//! failures come back as a non-zero status plus a message written into a
//! caller-supplied buffer.

extern crate libc;

use libc::{c_char, c_double, c_float, c_int, c_void, size_t};
use std::borrow::Cow;
use std::convert::TryFrom;
use std::ffi::CStr;
use std::slice;

use crate::video::*;
use crate::ComboError;

/// Fills the reference and distorted luma planes of the next frame.
///
/// Each plane is `height` rows of `width` floats. On entry `ref_stride` and
/// `dis_stride` hold the current distance between rows, in bytes, and the
/// callback may store a different one for its plane. A new stride must be a
/// multiple of 4, hold a full row, and keep every row inside the
/// `height * stride` bytes passed in on the first call. It may only change on
/// the first frame.
///
/// Returns `0` for a frame, `1` at the end of the stream, and any other value
/// on failure.
pub type ReadFrameCallback = unsafe extern fn(
    ref_data: *mut c_float,
    ref_stride: *mut c_int,
    dis_data: *mut c_float,
    dis_stride: *mut c_int,
    user_data: *mut c_void,
) -> c_int;

/// Status handed back through the run when a reported stride does not fit.
const STRIDE_REJECTED: i32 = -1;

struct CallbackSource {
    read_frame: ReadFrameCallback,
    user_data: *mut c_void,
    stride_error: Option<ComboError>,
}

impl CallbackSource {
    fn apply_stride(
        &mut self,
        plane: &mut SamplePlane<'_>,
        name: &'static str,
        reported: c_int,
    ) -> Result<(), i32> {
        let expected = plane.stride();
        let stride = usize::try_from(reported).unwrap_or(0);
        if stride == expected {
            return Ok(());
        }
        plane.set_stride(stride).map_err(|_| {
            self.stride_error = Some(ComboError::IncompatibleStride {
                plane: name,
                stride,
                expected,
            });
            STRIDE_REJECTED
        })
    }
}

impl FrameSource for CallbackSource {
    fn read_frame(
        &mut self,
        reference: &mut SamplePlane<'_>,
        distorted: &mut SamplePlane<'_>,
    ) -> Result<FrameStatus, i32> {
        // Both were checked against c_int before the run started.
        let mut ref_stride = reference.stride() as c_int;
        let mut dis_stride = distorted.stride() as c_int;
        let status = unsafe {
            (self.read_frame)(
                reference.as_mut_slice().as_mut_ptr(),
                &mut ref_stride,
                distorted.as_mut_slice().as_mut_ptr(),
                &mut dis_stride,
                self.user_data,
            )
        };
        let status = FrameStatus::from_code(status)?;
        if status == FrameStatus::Delivered {
            self.apply_stride(reference, "reference", ref_stride)?;
            self.apply_stride(distorted, "distorted", dis_stride)?;
        }
        Ok(status)
    }
}

#[inline(always)]
unsafe fn series_name<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

/// Create an empty series set with nothing enabled
///
/// Free it with `vmaf_combo_series_free`.
#[no_mangle]
pub extern fn vmaf_combo_series_new() -> *mut ComboSeries {
    Box::into_raw(Box::new(ComboSeries::new()))
}

/// Enable the series called `name`
///
/// Returns `0`, or `-1` if there is no such series
#[no_mangle]
pub unsafe extern fn vmaf_combo_series_enable(series: *mut ComboSeries, name: *const c_char) -> c_int {
    match (series.as_mut(), series_name(name)) {
        (Some(series), Some(name)) => {
            if series.enable(name) {
                0
            } else {
                -1
            }
        }
        _ => -1,
    }
}

/// Number of frames recorded in the series called `name`
///
/// Returns `-1` if the series does not exist or is not enabled
#[no_mangle]
pub unsafe extern fn vmaf_combo_series_len(series: *const ComboSeries, name: *const c_char) -> c_int {
    series
        .as_ref()
        .and_then(|series| series.get(series_name(name)?))
        .and_then(|values| c_int::try_from(values.len()).ok())
        .unwrap_or(-1)
}

/// Read the score of frame `index` from the series called `name` into `value`
///
/// Returns `0`, or `-1` if there is no such series or frame
#[no_mangle]
pub unsafe extern fn vmaf_combo_series_get(
    series: *const ComboSeries,
    name: *const c_char,
    index: size_t,
    value: *mut c_double,
) -> c_int {
    if value.is_null() {
        return -1;
    }
    let score = series
        .as_ref()
        .and_then(|series| series.get(series_name(name)?))
        .and_then(|values| values.get(index));
    match score {
        Some(score) => {
            *value = score;
            0
        }
        None => -1,
    }
}

/// Free a series set
#[no_mangle]
pub unsafe extern fn vmaf_combo_series_free(series: *mut ComboSeries) {
    if !series.is_null() {
        std::mem::drop(Box::from_raw(series));
    }
}

fn run_with_callback(
    read_frame: ReadFrameCallback,
    user_data: *mut c_void,
    width: c_int,
    height: c_int,
    format: &str,
    series: &mut ComboSeries,
) -> Result<usize, ComboError> {
    let invalid = ComboError::InvalidDimensions {
        width: width.max(0) as usize,
        height: height.max(0) as usize,
    };
    let (w, h) = match (usize::try_from(width), usize::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(invalid),
    };
    let config = ComboConfig::new(w, h, format)?;
    if c_int::try_from(config.geometry().stride()).is_err() {
        return Err(invalid);
    }
    let mut source = CallbackSource {
        read_frame,
        user_data,
        stride_error: None,
    };
    Combo::new(config)
        .run(&mut source, NativeFeatures::new(config.cpu()), series)
        .map_err(|err| source.stride_error.take().unwrap_or(err))
}

/// Extract every enabled series from the frames `read_frame` delivers
///
/// `fmt` is one of `yuv420p`, `yuv422p`, `yuv444p`, `yuv420p10le`,
/// `yuv422p10le` or `yuv444p10le`.
///
/// Returns `0` on success. On failure returns a non-zero status (the
/// callback's own status if it failed) and, if `errmsg` is not `NULL`, writes
/// a NUL-terminated message of at most `errmsg_len` bytes into it. The series
/// then hold the frames completed before the failure.
#[no_mangle]
pub unsafe extern fn vmaf_combo_run(
    read_frame: Option<ReadFrameCallback>,
    user_data: *mut c_void,
    width: c_int,
    height: c_int,
    fmt: *const c_char,
    series: *mut ComboSeries,
    errmsg: *mut c_char,
    errmsg_len: size_t,
) -> c_int {
    let format: Cow<'_, str> = if fmt.is_null() {
        "(null)".into()
    } else {
        CStr::from_ptr(fmt).to_string_lossy()
    };
    let result = match (read_frame, series.as_mut()) {
        (Some(read_frame), Some(series)) => {
            run_with_callback(read_frame, user_data, width, height, &format, series)
        }
        _ => Err(ComboError::InvalidArgument {
            reason: "missing read_frame callback or series",
        }),
    };
    match result {
        Ok(_) => 0,
        Err(e) => {
            if !errmsg.is_null() {
                let sink = slice::from_raw_parts_mut(errmsg as *mut u8, errmsg_len);
                e.write_message(sink);
            }
            e.status()
        }
    }
}
