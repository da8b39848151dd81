//! Host map views over shared buffers.
//!
//! Mapping is the coherency bracket for coarse-grained buffers: the map
//! call drains the queue, then hands out a typed view of the shared
//! region; dropping the view is the unmap. Fine-grained buffers are never
//! mapped; host code reads them directly after a queue barrier, so a map
//! request on one is rejected.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

use bytemuck::Pod;
use snafu::ensure;
use tracing::debug;

use veld_device::{MapMode, Region, SvmBuffer};

use crate::error::{MapOutOfBoundsSnafu, Result};

/// Validate an element range against the buffer, defaulting to the whole
/// buffer.
pub(crate) fn resolve_range<T: Pod>(
    buf: &SvmBuffer<T>,
    range: Option<Range<usize>>,
) -> Result<Range<usize>> {
    let range = range.unwrap_or(0..buf.count());
    ensure!(
        range.start < range.end && range.end <= buf.count(),
        MapOutOfBoundsSnafu { start: range.start, end: range.end, count: buf.count() }
    );
    Ok(range)
}

/// Read-only host view of a mapped buffer range. Dropping the view is the
/// unmap.
pub struct HostView<T: Pod> {
    region: Arc<Region>,
    ptr: *const T,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: Pod> HostView<T> {
    pub(crate) fn new(region: Arc<Region>, range: Range<usize>) -> Self {
        // SAFETY: range was validated against the buffer backed by this
        // region; the pointer stays in bounds.
        let ptr = unsafe { region.as_ptr().cast::<T>().add(range.start) };
        Self { region, ptr, len: range.len(), _marker: PhantomData }
    }
}

impl<T: Pod> Deref for HostView<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the Arc keeps the region alive; the queue was drained
        // before the view was produced, so no device write is in flight.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<T: Pod> Drop for HostView<T> {
    fn drop(&mut self) {
        debug!(bytes = self.region.len(), mode = %MapMode::Read, "unmap");
    }
}

/// Writable host view of a mapped buffer range.
pub struct HostViewMut<T: Pod> {
    region: Arc<Region>,
    ptr: *mut T,
    len: usize,
    mode: MapMode,
    _marker: PhantomData<T>,
}

impl<T: Pod> HostViewMut<T> {
    pub(crate) fn new(region: Arc<Region>, range: Range<usize>, mode: MapMode) -> Self {
        // SAFETY: as for HostView.
        let ptr = unsafe { region.as_ptr().cast::<T>().add(range.start) };
        Self { region, ptr, len: range.len(), mode, _marker: PhantomData }
    }
}

impl<T: Pod> Deref for HostViewMut<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: as for HostView; the queue is idle while a writable view
        // is live, which is the caller's half of the map bracket.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<T: Pod> DerefMut for HostViewMut<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as above; the view has exclusive host access by &mut.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl<T: Pod> Drop for HostViewMut<T> {
    fn drop(&mut self) {
        debug!(bytes = self.region.len(), mode = %self.mode, "unmap");
    }
}
