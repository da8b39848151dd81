//! Elementwise dot product over coarse-grained shared buffers.
//!
//! Host writes go through write-map brackets, the result comes back
//! through a read-map bracket; the read map is the only synchronization
//! point.

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

    let a = ctx.alloc::<i32>(Coherency::ReadOnly, N)?;
    let b = ctx.alloc::<i32>(Coherency::ReadOnly, N)?;
    let out = ctx.alloc::<i32>(Coherency::WriteOnly, N)?;

    {
        let mut view = ctx.map_write(&a)?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = i as i32;
        }
    }
    {
        let mut view = ctx.map_write(&b)?;
        for (i, v) in view.iter_mut().enumerate() {
            *v = (N - i) as i32;
        }
    }

    let args = ctx.args().buffer(&a)?.buffer(&b)?.buffer_mut(&out)?.build();
    ctx.dispatch(program.entry_point("dot_i32")?, args, Grid::linear(N))?;

    let view = ctx.map_read(&out)?;
    for (i, value) in view.iter().copied().enumerate() {
        info!(i, value, "dot");
    }
    drop(view);

    ctx.free(a, N)?;
    ctx.free(b, N)?;
    ctx.free(out, N)?;
    Ok(())
}
