//! Device context: one device, one allocator, one in-order queue.
//!
//! The context is the root object host code works with. It owns the
//! shared-buffer allocator and the command queue, and exposes the whole
//! surface: allocation, argument binding, dispatch, barriers, mapping,
//! and cancellation.

use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;
use snafu::{ensure, ResultExt};
use tracing::info;

use veld_device::{Coherency, Device, MapMode, SvmAllocator, SvmBuffer};

use crate::error::{DeviceSnafu, InvalidTraitSnafu, Result};
use crate::grid::Grid;
use crate::kernel::{Args, ArgsBuilder, KernelRoutine};
use crate::map::{resolve_range, HostView, HostViewMut};
use crate::program::Program;
use crate::queue::CommandQueue;

/// Execution context bound to one device.
#[derive(Debug)]
pub struct Context {
    device: Device,
    allocator: SvmAllocator,
    queue: CommandQueue,
}

impl Context {
    /// Create a context on `device`.
    pub fn create(device: &Device) -> Context {
        info!(device = %device.name(), "context created");
        Context {
            device: device.clone(),
            allocator: SvmAllocator::new(device.clone()),
            queue: CommandQueue::new(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn allocator(&self) -> &SvmAllocator {
        &self.allocator
    }

    /// Build a program of kernel routines for this context's device.
    pub fn build_program(&self, routines: Vec<Arc<dyn KernelRoutine>>) -> Result<Program> {
        Program::build(&self.device, routines)
    }

    /// Allocate a shared buffer of `count` elements under `coherency`.
    pub fn alloc<T: Pod>(&self, coherency: Coherency, count: usize) -> Result<SvmBuffer<T>> {
        self.allocator.alloc(coherency, count).context(DeviceSnafu)
    }

    /// Free a buffer allocated from this context, with its original count.
    pub fn free<T: Pod>(&self, buffer: SvmBuffer<T>, count: usize) -> Result<()> {
        self.allocator.free(buffer, count).context(DeviceSnafu)
    }

    /// Start binding an argument snapshot for a dispatch.
    pub fn args(&self) -> ArgsBuilder<'_> {
        Args::builder(&self.allocator)
    }

    /// Enqueue `routine` over `grid` with the given argument snapshot.
    pub fn dispatch(
        &self,
        routine: Arc<dyn KernelRoutine>,
        args: Args,
        grid: Grid,
    ) -> Result<()> {
        self.queue.dispatch(routine, args, grid)
    }

    /// Block until every previously enqueued dispatch has completed.
    pub fn barrier(&self) -> Result<()> {
        self.queue.barrier()
    }

    /// Abandon outstanding work and unblock waiters with `Cancelled`.
    pub fn cancel(&self) {
        self.queue.cancel();
    }

    fn map_bracket<T: Pod>(
        &self,
        buffer: &SvmBuffer<T>,
        range: Option<Range<usize>>,
    ) -> Result<(std::sync::Arc<veld_device::Region>, Range<usize>)> {
        ensure!(
            buffer.coherency().requires_map(),
            InvalidTraitSnafu { coherency: buffer.coherency() }
        );
        let range = resolve_range(buffer, range)?;
        // TODO: track per-buffer touch sets so a map only waits for
        // dispatches that bound this buffer, instead of a full drain.
        self.barrier()?;
        let region = self.allocator.resolve(buffer).context(DeviceSnafu)?;
        Ok((region, range))
    }

    /// Map a whole buffer for host reading.
    pub fn map_read<T: Pod>(&self, buffer: &SvmBuffer<T>) -> Result<HostView<T>> {
        self.map_read_range(buffer, 0..buffer.count())
    }

    /// Map an element range for host reading.
    pub fn map_read_range<T: Pod>(
        &self,
        buffer: &SvmBuffer<T>,
        range: Range<usize>,
    ) -> Result<HostView<T>> {
        let (region, range) = self.map_bracket(buffer, Some(range))?;
        Ok(HostView::new(region, range))
    }

    /// Map a whole buffer for host writing.
    pub fn map_write<T: Pod>(&self, buffer: &SvmBuffer<T>) -> Result<HostViewMut<T>> {
        let (region, range) = self.map_bracket(buffer, None)?;
        Ok(HostViewMut::new(region, range, MapMode::Write))
    }

    /// Map an element range for host writing.
    pub fn map_write_range<T: Pod>(
        &self,
        buffer: &SvmBuffer<T>,
        range: Range<usize>,
    ) -> Result<HostViewMut<T>> {
        let (region, range) = self.map_bracket(buffer, Some(range))?;
        Ok(HostViewMut::new(region, range, MapMode::Write))
    }

    /// Map a whole buffer for host read-modify-write.
    pub fn map_read_write<T: Pod>(&self, buffer: &SvmBuffer<T>) -> Result<HostViewMut<T>> {
        let (region, range) = self.map_bracket(buffer, None)?;
        Ok(HostViewMut::new(region, range, MapMode::ReadWrite))
    }

    /// Direct host read view of a fine-grained buffer, no map bracket.
    ///
    /// Ordering against in-flight dispatches is the caller's problem;
    /// a [`barrier`](Context::barrier) before reading gives the coarse
    /// guarantee back.
    pub fn fine_slice<T: Pod>(&self, buffer: &SvmBuffer<T>) -> Result<HostView<T>> {
        ensure!(
            !buffer.coherency().requires_map(),
            InvalidTraitSnafu { coherency: buffer.coherency() }
        );
        let region = self.allocator.resolve(buffer).context(DeviceSnafu)?;
        Ok(HostView::new(region, 0..buffer.count()))
    }

    /// Direct host write view of a fine-grained buffer, no map bracket.
    pub fn fine_slice_mut<T: Pod>(&self, buffer: &SvmBuffer<T>) -> Result<HostViewMut<T>> {
        ensure!(
            !buffer.coherency().requires_map(),
            InvalidTraitSnafu { coherency: buffer.coherency() }
        );
        let region = self.allocator.resolve(buffer).context(DeviceSnafu)?;
        Ok(HostViewMut::new(region, 0..buffer.count(), MapMode::ReadWrite))
    }
}
