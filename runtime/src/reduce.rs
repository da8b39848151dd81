//! Parallel tree reduction.
//!
//! Each work-group gathers one contribution per work item into local
//! scratch, folds the scratch with a stride-doubling combining tree, and
//! publishes its partial result into a shared accumulator with one atomic
//! combine. The tree requires a power-of-two group size, which the
//! dispatcher enforces for kernels that declare uniform grouping.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, AtomicU64, Ordering};

use bytemuck::Pod;
use snafu::ensure;

use veld_device::SvmCapabilities;

use crate::error::{BadArgumentSnafu, Result};
use crate::kernel::{GroupCtx, KernelRoutine};

/// Commutative, associative combining operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
        };
        f.write_str(name)
    }
}

/// Integer scalar usable as a reduction element.
///
/// The atomic view is what lets many groups publish partials into one
/// shared accumulator without a lock.
pub trait ReduceScalar: Pod + Send + Sync {
    /// Identity element of `op`; the accumulator starts here.
    fn identity(op: ReduceOp) -> Self;

    fn combine(op: ReduceOp, a: Self, b: Self) -> Self;

    /// A work item's global index as a contribution value.
    fn from_index(index: usize) -> Self;

    /// Atomically fold `value` into the scalar behind `ptr`.
    ///
    /// # Safety
    /// `ptr` must point to a live, aligned scalar that every concurrent
    /// accessor touches only through this method.
    unsafe fn atomic_combine(op: ReduceOp, ptr: *mut Self, value: Self);
}

macro_rules! reduce_scalar {
    ($($ty:ty => $atomic:ty),* $(,)?) => {$(
        impl ReduceScalar for $ty {
            fn identity(op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => 0,
                    ReduceOp::Min => <$ty>::MAX,
                    ReduceOp::Max => <$ty>::MIN,
                }
            }

            fn combine(op: ReduceOp, a: Self, b: Self) -> Self {
                match op {
                    ReduceOp::Sum => a.wrapping_add(b),
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                }
            }

            fn from_index(index: usize) -> Self {
                index as $ty
            }

            unsafe fn atomic_combine(op: ReduceOp, ptr: *mut Self, value: Self) {
                // SAFETY: caller guarantees ptr is valid, aligned, and
                // accessed only atomically; layout of $atomic matches $ty.
                let atomic = unsafe { &*(ptr as *const $atomic) };
                match op {
                    ReduceOp::Sum => atomic.fetch_add(value, Ordering::Relaxed),
                    ReduceOp::Min => atomic.fetch_min(value, Ordering::Relaxed),
                    ReduceOp::Max => atomic.fetch_max(value, Ordering::Relaxed),
                };
            }
        }
    )*};
}

reduce_scalar! {
    i32 => AtomicI32,
    i64 => AtomicI64,
    u32 => AtomicU32,
    u64 => AtomicU64,
}

/// Fold `scratch` in place with a stride-doubling combining tree and
/// return the result left in `scratch[0]`.
///
/// Each doubling of the stride is one tree level; within a level the
/// combines touch disjoint pairs, so levels are the only ordering the
/// algorithm needs. Exposed on its own so hosts can fold partial-result
/// buffers without a dispatch.
pub fn tree_combine<T: ReduceScalar>(op: ReduceOp, scratch: &mut [T]) -> T {
    let len = scratch.len();
    let mut stride = 1;
    while stride < len {
        let mut lid = 0;
        while lid + stride < len {
            scratch[lid] = T::combine(op, scratch[lid], scratch[lid + stride]);
            lid += 2 * stride;
        }
        stride *= 2;
    }
    scratch.first().copied().unwrap_or_else(|| T::identity(op))
}

/// Atomic handle to a writable scalar buffer argument.
///
/// All access to the underlying element goes through the scalar's atomic
/// view, so any number of concurrent groups may combine into it.
pub struct AtomicArg<'a, T: ReduceScalar> {
    ptr: *mut T,
    _marker: std::marker::PhantomData<&'a T>,
}

impl<T: ReduceScalar> AtomicArg<'_, T> {
    pub fn combine(&self, op: ReduceOp, value: T) {
        // SAFETY: construction validated the buffer; nothing else touches
        // the element except through this atomic view.
        unsafe { T::atomic_combine(op, self.ptr, value) };
    }
}

// SAFETY: the pointee is only ever accessed atomically.
unsafe impl<T: ReduceScalar> Send for AtomicArg<'_, T> {}
unsafe impl<T: ReduceScalar> Sync for AtomicArg<'_, T> {}

impl<'a> GroupCtx<'a> {
    /// Atomic view of the first element of a writable buffer argument.
    pub fn arg_atomic<T: ReduceScalar + 'static>(&self, index: usize) -> Result<AtomicArg<'_, T>> {
        let arg = self.buffer_arg(index)?;
        ensure!(
            arg.elem == TypeId::of::<T>(),
            BadArgumentSnafu { index, reason: "accumulator element type mismatch" }
        );
        ensure!(
            arg.writable,
            BadArgumentSnafu { index, reason: "accumulator was bound read-only" }
        );
        ensure!(
            arg.count >= 1,
            BadArgumentSnafu { index, reason: "accumulator buffer is empty" }
        );
        Ok(AtomicArg { ptr: arg.region.as_ptr().cast::<T>(), _marker: std::marker::PhantomData })
    }
}

/// What each work item feeds into the reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contribution {
    /// The item's own global index.
    GlobalIndex,
    /// `input[global_id]` from the buffer bound at this argument slot.
    Input { arg: usize },
}

/// Tree-reduction kernel over the launch grid.
///
/// Argument layout: slot 0 is the single-element shared accumulator
/// (pre-initialized to [`ReduceKernel::identity`]), slot 1 is local
/// scratch of `group_size` elements, and an `Input` contribution names
/// the slot its input buffer is bound at.
pub struct ReduceKernel<T> {
    name: String,
    op: ReduceOp,
    contribution: Contribution,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: ReduceScalar> ReduceKernel<T> {
    pub const ACC_ARG: usize = 0;
    pub const SCRATCH_ARG: usize = 1;

    pub fn new(name: impl Into<String>, op: ReduceOp, contribution: Contribution) -> Self {
        Self { name: name.into(), op, contribution, _marker: std::marker::PhantomData }
    }

    /// The value the accumulator must hold before the first dispatch.
    pub fn identity(&self) -> T {
        T::identity(self.op)
    }

    fn contribution_of(&self, group: &GroupCtx<'_>, lid: usize) -> Result<T> {
        let gid = group.item(lid).global_id;
        match self.contribution {
            Contribution::GlobalIndex => Ok(T::from_index(gid)),
            Contribution::Input { arg } => {
                let input = group.arg_slice::<T>(arg)?;
                input.get(gid).copied().ok_or_else(|| {
                    BadArgumentSnafu {
                        index: arg,
                        reason: format!("input buffer shorter than grid index {gid}"),
                    }
                    .build()
                })
            }
        }
    }
}

impl<T: ReduceScalar + 'static> KernelRoutine for ReduceKernel<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_caps(&self) -> SvmCapabilities {
        SvmCapabilities { atomics: true, ..SvmCapabilities::default() }
    }

    fn requires_uniform_groups(&self) -> bool {
        true
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()> {
        let size = group.group_size();

        // Gather phase: one contribution per item.
        let mut values = Vec::with_capacity(size);
        for lid in 0..size {
            values.push(self.contribution_of(group, lid)?);
        }

        let scratch = group.scratch_slice::<T>(Self::SCRATCH_ARG)?;
        ensure!(
            scratch.len() >= size,
            BadArgumentSnafu {
                index: Self::SCRATCH_ARG,
                reason: format!("scratch holds {} elements, group needs {size}", scratch.len()),
            }
        );
        scratch[..size].copy_from_slice(&values);

        let partial = tree_combine(self.op, &mut scratch[..size]);

        // Publish phase: one atomic combine per group.
        group.arg_atomic::<T>(Self::ACC_ARG)?.combine(self.op, partial);
        Ok(())
    }
}
