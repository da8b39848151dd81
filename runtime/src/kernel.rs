//! Kernel routines, argument snapshots, and the per-group execution context.
//!
//! A kernel is an opaque entry point plus a positional argument list.
//! Arguments are bound into an immutable [`Args`] snapshot per dispatch, so
//! a dispatch can never observe bindings made after it was enqueued and
//! reusing one routine across concurrent dispatches cannot leak arguments
//! between them.
//!
//! Every buffer binding declares how the device accesses it: read, write
//! the whole buffer, or write a declared element range. The dispatcher uses
//! the declared write spans to reject overlapping concurrent dispatches.

use std::any::TypeId;
use std::ops::Range;
use std::sync::Arc;

use bytemuck::Pod;
use smallvec::SmallVec;
use snafu::{ensure, ResultExt};

use veld_device::{BufferId, Region, SvmAllocator, SvmBuffer, SvmCapabilities};

use crate::error::{BadArgumentSnafu, DeviceSnafu, Result};
use crate::grid::ResolvedGrid;

/// One logical worker inside a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    /// Index in the launch grid's global index space.
    pub global_id: usize,
    /// Index within the work-group, `0..group_size`.
    pub local_id: usize,
}

/// Scalar kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {$(
        impl From<$ty> for ScalarValue {
            fn from(value: $ty) -> Self {
                ScalarValue::$variant(value)
            }
        }
    )*};
}

scalar_from! {
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// A bound shared buffer inside an argument snapshot.
///
/// Binding resolved the handle through the allocator; the held `Arc` keeps
/// the region alive for the dispatch even if the caller frees the handle
/// after enqueue.
#[derive(Debug, Clone)]
pub(crate) struct BufferArg {
    pub id: BufferId,
    pub region: Arc<Region>,
    pub count: usize,
    pub elem: TypeId,
    pub elem_size: usize,
    pub writable: bool,
    /// Declared device-write element range; `None` with `writable` set
    /// means the whole buffer.
    pub write_range: Option<Range<usize>>,
}

#[derive(Debug, Clone)]
pub(crate) enum ArgSlot {
    Buffer(BufferArg),
    Scalar(ScalarValue),
    /// Device-local scratch: size-only, no host-visible handle. Each
    /// work-group gets a fresh zeroed allocation.
    Local { count: usize, elem: TypeId, elem_size: usize },
}

/// Declared device-write byte span of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WriteSpan {
    pub buffer: BufferId,
    pub start: usize,
    pub end: usize,
}

impl WriteSpan {
    pub fn overlaps(&self, other: &WriteSpan) -> bool {
        self.buffer == other.buffer && self.start < other.end && other.start < self.end
    }
}

/// Immutable positional argument snapshot for one dispatch.
#[derive(Debug, Clone)]
pub struct Args {
    slots: SmallVec<[ArgSlot; 6]>,
}

impl Args {
    /// Start building a snapshot against the allocator that owns the
    /// buffers being bound.
    pub fn builder(allocator: &SvmAllocator) -> ArgsBuilder<'_> {
        ArgsBuilder { allocator, slots: SmallVec::new() }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn slots(&self) -> &[ArgSlot] {
        &self.slots
    }

    pub(crate) fn write_spans(&self) -> Vec<WriteSpan> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                ArgSlot::Buffer(arg) if arg.writable => {
                    let (start, end) = match &arg.write_range {
                        Some(range) => (range.start * arg.elem_size, range.end * arg.elem_size),
                        None => (0, arg.count * arg.elem_size),
                    };
                    Some(WriteSpan { buffer: arg.id, start, end })
                }
                _ => None,
            })
            .collect()
    }
}

/// Builder for [`Args`]. Buffer bindings resolve through the allocator at
/// bind time, so a stale handle fails here rather than mid-dispatch.
#[derive(Debug)]
pub struct ArgsBuilder<'a> {
    allocator: &'a SvmAllocator,
    slots: SmallVec<[ArgSlot; 6]>,
}

impl<'a> ArgsBuilder<'a> {
    fn bind_buffer<T: Pod>(
        mut self,
        buf: &SvmBuffer<T>,
        writable: bool,
        write_range: Option<Range<usize>>,
    ) -> Result<Self> {
        let index = self.slots.len();
        let region = self.allocator.resolve(buf).context(DeviceSnafu)?;

        if writable {
            ensure!(
                buf.coherency().device_writable(),
                BadArgumentSnafu {
                    index,
                    reason: format!("{} buffer bound for device writes", buf.coherency()),
                }
            );
        }
        if let Some(range) = &write_range {
            ensure!(
                range.start < range.end && range.end <= buf.count(),
                BadArgumentSnafu {
                    index,
                    reason: format!(
                        "write range {}..{} outside buffer of {} elements",
                        range.start,
                        range.end,
                        buf.count()
                    ),
                }
            );
        }

        self.slots.push(ArgSlot::Buffer(BufferArg {
            id: buf.id(),
            region,
            count: buf.count(),
            elem: TypeId::of::<T>(),
            elem_size: std::mem::size_of::<T>(),
            writable,
            write_range,
        }));
        Ok(self)
    }

    /// Bind a buffer the device only reads.
    pub fn buffer<T: Pod>(self, buf: &SvmBuffer<T>) -> Result<Self> {
        self.bind_buffer(buf, false, None)
    }

    /// Bind a buffer the device may write anywhere.
    pub fn buffer_mut<T: Pod>(self, buf: &SvmBuffer<T>) -> Result<Self> {
        self.bind_buffer(buf, true, None)
    }

    /// Bind a buffer the device writes only inside `range` (elements).
    ///
    /// Back-to-back dispatches over disjoint regions of one buffer declare
    /// their disjointness to the dispatcher this way.
    pub fn buffer_mut_range<T: Pod>(self, buf: &SvmBuffer<T>, range: Range<usize>) -> Result<Self> {
        self.bind_buffer(buf, true, Some(range))
    }

    /// Bind a scalar value.
    pub fn scalar(mut self, value: impl Into<ScalarValue>) -> Self {
        self.slots.push(ArgSlot::Scalar(value.into()));
        self
    }

    /// Bind a device-local scratch allocation of `count` elements of `T`.
    pub fn local<T: Pod>(mut self, count: usize) -> Self {
        self.slots.push(ArgSlot::Local {
            count,
            elem: TypeId::of::<T>(),
            elem_size: std::mem::size_of::<T>(),
        });
        self
    }

    pub fn build(self) -> Args {
        Args { slots: self.slots }
    }
}

/// Execution context handed to a routine for one work-group.
///
/// Exposes the group geometry, typed access to the bound arguments, and
/// the group's private scratch allocations. Mutable buffer access is only
/// handed out for writable bindings; staying inside the dispatch's
/// assigned index range is the kernel contract, which the dispatcher
/// cannot check item by item.
pub struct GroupCtx<'a> {
    args: &'a Args,
    grid: ResolvedGrid,
    group_id: usize,
    /// One private zeroed region per `Local` slot, indexed like `args`.
    locals: SmallVec<[Option<Region>; 2]>,
}

impl<'a> GroupCtx<'a> {
    pub(crate) fn new(args: &'a Args, grid: ResolvedGrid, group_id: usize) -> Self {
        let locals = args
            .slots()
            .iter()
            .map(|slot| match slot {
                ArgSlot::Local { count, elem_size, .. } => Region::zeroed(count * elem_size),
                _ => None,
            })
            .collect();
        Self { args, grid, group_id, locals }
    }

    pub fn group_id(&self) -> usize {
        self.group_id
    }

    pub fn group_size(&self) -> usize {
        self.grid.group_size
    }

    pub fn group_count(&self) -> usize {
        self.grid.group_count
    }

    pub fn grid_offset(&self) -> usize {
        self.grid.offset
    }

    pub fn grid_extent(&self) -> usize {
        self.grid.extent
    }

    /// Global index of this group's first worker.
    pub fn group_base(&self) -> usize {
        self.grid.offset + self.group_id * self.grid.group_size
    }

    /// The worker with local id `lid` in this group.
    pub fn item(&self, lid: usize) -> WorkItem {
        debug_assert!(lid < self.grid.group_size);
        WorkItem { global_id: self.group_base() + lid, local_id: lid }
    }

    /// All workers of this group. The iterator owns its geometry, so it
    /// can drive a loop that takes mutable argument views.
    pub fn items(&self) -> impl Iterator<Item = WorkItem> {
        let base = self.group_base();
        (0..self.grid.group_size)
            .map(move |lid| WorkItem { global_id: base + lid, local_id: lid })
    }

    fn slot(&self, index: usize) -> Result<&ArgSlot> {
        self.args.slots().get(index).ok_or_else(|| {
            BadArgumentSnafu { index, reason: format!("only {} arguments bound", self.args.len()) }
                .build()
        })
    }

    pub(crate) fn buffer_arg(&self, index: usize) -> Result<&BufferArg> {
        match self.slot(index)? {
            ArgSlot::Buffer(arg) => Ok(arg),
            _ => BadArgumentSnafu { index, reason: "expected a buffer argument" }.fail(),
        }
    }

    fn typed_buffer<T: Pod>(&self, index: usize, writable: bool) -> Result<(*mut T, usize)> {
        let arg = self.buffer_arg(index)?;
        ensure!(
            arg.elem == TypeId::of::<T>(),
            BadArgumentSnafu { index, reason: "buffer element type mismatch" }
        );
        if writable {
            ensure!(arg.writable, BadArgumentSnafu { index, reason: "buffer was bound read-only" });
        }
        Ok((arg.region.as_ptr().cast::<T>(), arg.count))
    }

    /// Read access to a bound buffer.
    pub fn arg_slice<T: Pod>(&self, index: usize) -> Result<&[T]> {
        let (ptr, count) = self.typed_buffer::<T>(index, false)?;
        // SAFETY: the region is live (Arc held by the snapshot), 64-byte
        // aligned, and sized count * size_of::<T>().
        Ok(unsafe { std::slice::from_raw_parts(ptr, count) })
    }

    /// Write access to a bound buffer.
    ///
    /// Concurrent groups of one dispatch, and concurrent disjoint-region
    /// dispatches, all see the same memory; writing outside this group's
    /// assigned indices is a data race exactly as on real hardware.
    pub fn arg_slice_mut<T: Pod>(&mut self, index: usize) -> Result<&mut [T]> {
        let (ptr, count) = self.typed_buffer::<T>(index, true)?;
        // SAFETY: as above; exclusivity over the written indices is the
        // dispatch contract, not visible to the type system.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, count) })
    }

    /// A bound scalar value.
    pub fn arg_scalar(&self, index: usize) -> Result<ScalarValue> {
        match self.slot(index)? {
            ArgSlot::Scalar(value) => Ok(*value),
            _ => BadArgumentSnafu { index, reason: "expected a scalar argument" }.fail(),
        }
    }

    /// This group's private scratch for a `Local` argument slot.
    pub fn scratch_slice<T: Pod>(&mut self, index: usize) -> Result<&mut [T]> {
        let (count, elem) = match self.slot(index)? {
            ArgSlot::Local { count, elem, .. } => (*count, *elem),
            _ => {
                return BadArgumentSnafu { index, reason: "expected a local scratch argument" }
                    .fail()
            }
        };
        ensure!(
            elem == TypeId::of::<T>(),
            BadArgumentSnafu { index, reason: "scratch element type mismatch" }
        );
        let region = match self.locals.get_mut(index).and_then(|r| r.as_mut()) {
            Some(region) => region,
            None => {
                return BadArgumentSnafu { index, reason: "zero-sized scratch allocation" }.fail()
            }
        };
        // SAFETY: the region is exclusively owned by this group context,
        // aligned, and sized count * size_of::<T>().
        Ok(unsafe { std::slice::from_raw_parts_mut(region.as_ptr().cast::<T>(), count) })
    }
}

/// An opaque compiled kernel entry point.
///
/// Routines are invoked once per work-group; per-item kernels iterate the
/// group's items (see [`ForEach`]). Group-cooperative kernels express the
/// local barrier as the boundary between phases of `run_group`, which is
/// exactly the guarantee a group-scoped barrier provides: no cross-group
/// ordering.
pub trait KernelRoutine: Send + Sync {
    fn name(&self) -> &str;

    /// Capabilities the device must advertise for this routine to build.
    fn required_caps(&self) -> SvmCapabilities {
        SvmCapabilities::default()
    }

    /// Whether the dispatcher must enforce uniform power-of-two grouping.
    fn requires_uniform_groups(&self) -> bool {
        false
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()>;
}

/// Elementwise adapter: runs a closure once per work item.
pub struct ForEach<F> {
    name: String,
    body: F,
}

impl<F> ForEach<F>
where
    F: Fn(WorkItem, &mut GroupCtx<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self { name: name.into(), body }
    }
}

impl<F> KernelRoutine for ForEach<F>
where
    F: Fn(WorkItem, &mut GroupCtx<'_>) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()> {
        for item in group.items() {
            (self.body)(item, group)?;
        }
        Ok(())
    }
}
