//! Host-orchestrated shared-memory compute runtime.
//!
//! Builds on `veld-device` (platform enumeration, shared-buffer allocator,
//! timeline signals) and adds the execution surface: contexts, kernel
//! programs, launch grids, an in-order dispatch queue, map-based coherency
//! brackets, and a parallel tree-reduction engine.
//!
//! The typical flow is: pick a [`Device`](veld_device::Device), create a
//! [`Context`], build a [`Program`], allocate shared buffers, bind an
//! [`Args`] snapshot, [`dispatch`](Context::dispatch) over a [`Grid`], and
//! observe results through a map view or, for fine-grained buffers, a
//! plain [`barrier`](Context::barrier).

pub mod context;
pub mod error;
pub mod grid;
pub mod kernel;
pub mod kernels;
pub mod map;
pub mod program;
pub mod queue;
pub mod reduce;


pub use context::Context;
pub use error::{Error, Result};
pub use grid::Grid;
pub use kernel::{Args, ArgsBuilder, ForEach, GroupCtx, KernelRoutine, ScalarValue, WorkItem};
pub use map::{HostView, HostViewMut};
pub use program::Program;
pub use queue::CommandQueue;
pub use reduce::{tree_combine, Contribution, ReduceKernel, ReduceOp, ReduceScalar};

pub use veld_device::{
    list_devices, Coherency, Device, DeviceDescriptor, MapMode, SvmAllocator, SvmBuffer,
    SvmCapabilities,
};
