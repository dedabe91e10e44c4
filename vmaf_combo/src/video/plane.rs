//! Aligned sample buffers and the planes built on them.
//!
//! Every buffer a run needs is acquired through a [`PlaneAllocator`] and
//! released by its owner's destructor, so each successful allocation is paired
//! with exactly one release no matter how the run ends.

use crate::ComboError;
use std::alloc::{self, Layout};
use std::mem::size_of;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::slice;

/// Alignment, in bytes, of every buffer and of every plane stride.
pub const MAX_ALIGN: usize = 32;

const SAMPLE_SIZE: usize = size_of::<f32>();

#[inline(always)]
pub(crate) fn align_floor(x: usize) -> usize {
    x - x % MAX_ALIGN
}

#[inline(always)]
pub(crate) fn align_ceil(x: usize) -> Option<usize> {
    match x % MAX_ALIGN {
        0 => Some(x),
        rem => x.checked_add(MAX_ALIGN - rem),
    }
}

/// Source of the aligned memory a run works in.
///
/// # Safety
///
/// `allocate` must return either `None` or a pointer to a fresh block that is
/// valid for reads and writes of `layout.size()` bytes and aligned to
/// `layout.align()`. `release` is only ever called once per block, with the
/// layout it was allocated with.
pub unsafe trait PlaneAllocator {
    /// Acquires a block for `layout`, or `None` if none is available.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns a block obtained from [`allocate`](PlaneAllocator::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.allocate(layout)` and not have been released yet.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

unsafe impl PlaneAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { alloc::alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}

/// A zero-initialized, [`MAX_ALIGN`]-aligned run of `f32` samples.
///
/// The block goes back to its allocator when the buffer is dropped.
pub struct AlignedBuffer<'a> {
    ptr: NonNull<f32>,
    len: usize,
    layout: Layout,
    allocator: &'a dyn PlaneAllocator,
}

impl<'a> AlignedBuffer<'a> {
    /// Allocates `len` samples. `name` identifies the buffer in the error.
    pub fn new(
        len: usize,
        allocator: &'a dyn PlaneAllocator,
        name: &'static str,
    ) -> Result<Self, ComboError> {
        let failed = || ComboError::Allocation { buffer: name };
        let size = len.checked_mul(SAMPLE_SIZE).ok_or_else(failed)?;
        // Zero-sized blocks are not something an allocator has to hand out.
        let layout = Layout::from_size_align(size.max(MAX_ALIGN), MAX_ALIGN).map_err(|_| failed())?;
        let ptr = allocator.allocate(layout).ok_or_else(failed)?;
        unsafe {
            ptr.as_ptr().write_bytes(0, layout.size());
        }
        Ok(AlignedBuffer {
            ptr: ptr.cast(),
            len,
            layout,
            allocator,
        })
    }
}

impl Deref for AlignedBuffer<'_> {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [f32] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer<'_> {
    fn drop(&mut self) {
        unsafe { self.allocator.release(self.ptr.cast(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len)
            .field("align", &self.layout.align())
            .finish()
    }
}

/// The validated dimensions of a run's planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    width: usize,
    height: usize,
    stride: usize,
}

impl PlaneGeometry {
    /// Validates `width` x `height` and derives the aligned stride.
    ///
    /// Fails before anything is allocated if either dimension is zero, if the
    /// stride of a row cannot be represented, or if a whole plane cannot be.
    pub fn new(width: usize, height: usize) -> Result<Self, ComboError> {
        let limit = isize::MAX as usize;
        if width == 0 || height == 0 || width > align_floor(limit) / SAMPLE_SIZE {
            return Err(ComboError::InvalidDimensions { width, height });
        }
        let stride = align_ceil(width * SAMPLE_SIZE)
            .filter(|&stride| stride <= limit)
            .ok_or(ComboError::InvalidDimensions { width, height })?;
        if height > limit / stride {
            return Err(ComboError::HeightTooLarge { height });
        }
        Ok(PlaneGeometry {
            width,
            height,
            stride,
        })
    }

    /// Samples per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes between the starts of consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Bytes in one plane.
    pub fn plane_size(&self) -> usize {
        self.stride * self.height
    }

    fn plane_samples(&self) -> usize {
        self.plane_size() / SAMPLE_SIZE
    }
}

/// A read-only view of a plane, as handed to feature functions.
#[derive(Debug, Clone, Copy)]
pub struct PlaneRef<'a> {
    data: &'a [f32],
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> PlaneRef<'a> {
    /// Wraps `data`, whose rows are `stride` samples apart.
    ///
    /// # Panics
    ///
    /// Panics if `stride < width` or `data` is too short for `height` rows.
    pub fn new(data: &'a [f32], width: usize, height: usize, stride: usize) -> Self {
        assert!(stride >= width);
        assert!(height == 0 || data.len() >= (height - 1) * stride + width);
        PlaneRef {
            data,
            width,
            height,
            stride,
        }
    }

    /// Samples per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Samples (not bytes) between the starts of consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// The backing samples, including row padding.
    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    /// The `width` samples of row `y`.
    #[inline(always)]
    pub fn row(&self, y: usize) -> &'a [f32] {
        &self.data[y * self.stride..][..self.width]
    }

    /// Iterates over the rows, top to bottom.
    pub fn rows(&self) -> impl Iterator<Item = &'a [f32]> + 'a {
        let this = *self;
        (0..self.height).map(move |y| this.row(y))
    }
}

/// One luma plane of `f32` samples in an aligned buffer.
#[derive(Debug)]
pub struct SamplePlane<'a> {
    buf: AlignedBuffer<'a>,
    width: usize,
    height: usize,
    stride: usize,
}

impl<'a> SamplePlane<'a> {
    /// Allocates a zeroed plane with the geometry's stride.
    pub fn allocate(
        geometry: &PlaneGeometry,
        allocator: &'a dyn PlaneAllocator,
        name: &'static str,
    ) -> Result<Self, ComboError> {
        Ok(SamplePlane {
            buf: AlignedBuffer::new(geometry.plane_samples(), allocator, name)?,
            width: geometry.width,
            height: geometry.height,
            stride: geometry.stride,
        })
    }

    /// Samples per row.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Bytes between the starts of consecutive rows.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Changes the row stride, in bytes.
    ///
    /// Frame sources that lay rows out differently report their stride here.
    /// It must be a whole number of samples, hold a full row, and keep every
    /// row inside the allocation.
    pub fn set_stride(&mut self, stride: usize) -> Result<(), ComboError> {
        let capacity = self.buf.len() * SAMPLE_SIZE;
        let fits = stride % SAMPLE_SIZE == 0
            && stride >= self.width * SAMPLE_SIZE
            && stride
                .checked_mul(self.height - 1)
                .and_then(|rows| rows.checked_add(self.width * SAMPLE_SIZE))
                .map_or(false, |end| end <= capacity);
        if !fits {
            return Err(ComboError::IncompatibleStride {
                plane: "plane",
                stride,
                expected: self.stride,
            });
        }
        self.stride = stride;
        Ok(())
    }

    /// The `width` samples of row `y`.
    pub fn row(&self, y: usize) -> &[f32] {
        let stride = self.stride / SAMPLE_SIZE;
        &self.buf[y * stride..][..self.width]
    }

    /// The `width` samples of row `y`, mutably.
    pub fn row_mut(&mut self, y: usize) -> &mut [f32] {
        let stride = self.stride / SAMPLE_SIZE;
        let width = self.width;
        &mut self.buf[y * stride..][..width]
    }

    /// The whole allocation, padding included.
    pub fn as_slice(&self) -> &[f32] {
        &self.buf
    }

    /// The whole allocation, padding included, mutably.
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.buf
    }

    /// A read-only view for feature functions.
    pub fn as_plane_ref(&self) -> PlaneRef<'_> {
        PlaneRef {
            data: &self.buf,
            width: self.width,
            height: self.height,
            stride: self.stride / SAMPLE_SIZE,
        }
    }

    /// Adds `offset` to every sample in place.
    pub fn offset(&mut self, offset: f32) {
        for y in 0..self.height {
            for pix in self.row_mut(y) {
                *pix += offset;
            }
        }
    }

    /// Overwrites this plane's whole allocation with `other`'s.
    ///
    /// Both planes must come from the same geometry.
    pub fn copy_from(&mut self, other: &SamplePlane<'_>) {
        self.buf.copy_from_slice(&other.buf);
        self.stride = other.stride;
    }
}

/// Every buffer one run owns.
///
/// Dropping this releases all of them; there is no other release path.
#[derive(Debug)]
pub struct RunBuffers<'a> {
    pub(crate) reference: SamplePlane<'a>,
    pub(crate) distorted: SamplePlane<'a>,
    pub(crate) prev_blur: SamplePlane<'a>,
    pub(crate) blur: SamplePlane<'a>,
    pub(crate) scratch: AlignedBuffer<'a>,
}

impl<'a> RunBuffers<'a> {
    /// Allocates the reference, distorted and the two blur planes, plus a
    /// scratch buffer twice the size of a plane.
    ///
    /// If any allocation fails, everything allocated before it is released
    /// before the error is returned.
    pub fn allocate(
        geometry: &PlaneGeometry,
        allocator: &'a dyn PlaneAllocator,
    ) -> Result<Self, ComboError> {
        let reference = SamplePlane::allocate(geometry, allocator, "ref_buf")?;
        let distorted = SamplePlane::allocate(geometry, allocator, "dis_buf")?;
        let prev_blur = SamplePlane::allocate(geometry, allocator, "prev_blur_buf")?;
        let blur = SamplePlane::allocate(geometry, allocator, "blur_buf")?;
        let scratch_len = geometry
            .plane_samples()
            .checked_mul(2)
            .ok_or(ComboError::Allocation { buffer: "temp_buf" })?;
        let scratch = AlignedBuffer::new(scratch_len, allocator, "temp_buf")?;
        Ok(RunBuffers {
            reference,
            distorted,
            prev_blur,
            blur,
            scratch,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;

    /// Counts allocations and releases, and can refuse the n-th allocation.
    #[derive(Default)]
    pub(crate) struct CountingAllocator {
        pub allocated: Cell<usize>,
        pub released: Cell<usize>,
        pub fail_at: Option<usize>,
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
    fn stride_is_aligned() {
        let geometry = PlaneGeometry::new(4, 4).unwrap();
        assert_eq!(geometry.stride(), 32);
        let geometry = PlaneGeometry::new(1920, 1080).unwrap();
        assert_eq!(geometry.stride(), 7680);
        let geometry = PlaneGeometry::new(9, 1).unwrap();
        assert_eq!(geometry.stride(), 64);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            PlaneGeometry::new(0, 4),
            Err(ComboError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            PlaneGeometry::new(4, 0),
            Err(ComboError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn overflowing_dimensions_are_rejected() {
        assert!(matches!(
            PlaneGeometry::new(usize::MAX, 4),
            Err(ComboError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            PlaneGeometry::new(usize::MAX / 4, 4),
            Err(ComboError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            PlaneGeometry::new(4, usize::MAX),
            Err(ComboError::HeightTooLarge { .. })
        ));
    }

    #[test]
    fn buffers_are_aligned_and_zeroed() {
        let buf = AlignedBuffer::new(37, &SystemAllocator, "test").unwrap();
        assert_eq!(buf.as_ptr() as usize % MAX_ALIGN, 0);
        assert_eq!(buf.len(), 37);
        assert!(buf.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn run_buffers_release_everything_once() {
        let allocator = CountingAllocator::default();
        let geometry = PlaneGeometry::new(16, 8).unwrap();
        {
            let buffers = RunBuffers::allocate(&geometry, &allocator).unwrap();
            assert_eq!(buffers.scratch.len(), 2 * buffers.blur.as_slice().len());
            assert_eq!(allocator.allocated.get(), 5);
            assert_eq!(allocator.released.get(), 0);
        }
        assert_eq!(allocator.released.get(), 5);
    }

    #[test]
    fn failed_allocation_releases_earlier_buffers() {
        for fail_at in 0..5 {
            let allocator = CountingAllocator {
                fail_at: Some(fail_at),
                ..Default::default()
            };
            let geometry = PlaneGeometry::new(16, 8).unwrap();
            let err = RunBuffers::allocate(&geometry, &allocator).unwrap_err();
            assert!(matches!(err, ComboError::Allocation { .. }));
            assert_eq!(allocator.allocated.get(), fail_at);
            assert_eq!(allocator.released.get(), fail_at);
        }
    }

    #[test]
    fn failed_allocation_names_the_buffer() {
        let allocator = CountingAllocator {
            fail_at: Some(2),
            ..Default::default()
        };
        let geometry = PlaneGeometry::new(4, 4).unwrap();
        let err = RunBuffers::allocate(&geometry, &allocator).unwrap_err();
        assert!(err.to_string().contains("prev_blur_buf"));
    }

    #[test]
    fn stride_changes_must_fit_the_allocation() {
        let geometry = PlaneGeometry::new(4, 4).unwrap();
        let mut plane = SamplePlane::allocate(&geometry, &SystemAllocator, "ref_buf").unwrap();
        assert!(plane.set_stride(16).is_ok());
        assert_eq!(plane.as_plane_ref().stride(), 4);
        assert!(plane.set_stride(12).is_err());
        assert!(plane.set_stride(18).is_err());
        assert!(plane.set_stride(64).is_err());
        assert!(plane.set_stride(32).is_ok());
    }

    #[test]
    fn rows_respect_stride() {
        let geometry = PlaneGeometry::new(3, 2).unwrap();
        let mut plane = SamplePlane::allocate(&geometry, &SystemAllocator, "ref_buf").unwrap();
        plane.row_mut(1).copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(plane.as_slice()[8..11], [1.0, 2.0, 3.0]);
        plane.offset(-128.0);
        assert_eq!(plane.row(0), &[-128.0, -128.0, -128.0]);
        assert_eq!(plane.row(1), &[-127.0, -126.0, -125.0]);
        // Padding is left alone.
        assert_eq!(plane.as_slice()[3], 0.0);
    }
}
