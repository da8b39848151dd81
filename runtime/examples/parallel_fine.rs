//! The same dot product over fine-grained buffers: no map brackets, the
//! host addresses the shared memory directly and a queue barrier is the
//! only synchronization.

use std::sync::Arc;

use tracing::info;

use veld_runtime::kernels::DotKernel;
use veld_runtime::{Coherency, Context, Device, Grid, Program, Result};

const N: usize = 16;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let device = Device::first().map_err(|source| veld_runtime::Error::Device { source })?;
    let ctx = Context::create(&device);
    let program = Program::build(&device, vec![Arc::new(DotKernel)])?;

    let a = ctx.alloc::<i32>(Coherency::FineGrain, N)?;
    let b = ctx.alloc::<i32>(Coherency::FineGrain, N)?;
    let out = ctx.alloc::<i32>(Coherency::FineGrain, N)?;

    for (i, v) in ctx.fine_slice_mut(&a)?.iter_mut().enumerate() {
        *v = i as i32;
    }
    for (i, v) in ctx.fine_slice_mut(&b)?.iter_mut().enumerate() {
        *v = (N - i) as i32;
    }

    let args = ctx.args().buffer(&a)?.buffer(&b)?.buffer_mut(&out)?.build();
    ctx.dispatch(program.entry_point("dot_i32")?, args, Grid::linear(N))?;
    ctx.barrier()?;

    for (i, value) in ctx.fine_slice(&out)?.iter().copied().enumerate() {
        info!(i, value, "dot");
    }

    ctx.free(a, N)?;
    ctx.free(b, N)?;
    ctx.free(out, N)?;
    Ok(())
}
