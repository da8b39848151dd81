//! Parallel tree reduction: every worker contributes its global index,
//! each group folds its contributions in local scratch, and the group
//! partials land in one fine-grained atomic accumulator.

use std::sync::Arc;

use tracing::info;

use veld_runtime::{
    Coherency, Context, Contribution, Device, Grid, Program, ReduceKernel, ReduceOp, Result,
};

const EXTENT: usize = 1 << 10;
const GROUP: usize = 64;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let device = Device::first().map_err(|source| veld_runtime::Error::Device { source })?;
    let ctx = Context::create(&device);

    let kernel: Arc<ReduceKernel<i64>> =
        Arc::new(ReduceKernel::new("sum_indices", ReduceOp::Sum, Contribution::GlobalIndex));
    let program = Program::build(&device, vec![kernel.clone()])?;

    let acc = ctx.alloc::<i64>(Coherency::FineGrain, 1)?;
    ctx.fine_slice_mut(&acc)?[0] = kernel.identity();

    let args = ctx.args().buffer_mut(&acc)?.local::<i64>(GROUP).build();
    ctx.dispatch(program.entry_point("sum_indices")?, args, Grid::grouped(EXTENT, GROUP))?;
    ctx.barrier()?;

    let total = ctx.fine_slice(&acc)?[0];
    let expected = (EXTENT as i64 - 1) * EXTENT as i64 / 2;
    info!(extent = EXTENT, group = GROUP, total, expected, "index reduction");

    ctx.free(acc, 1)?;
    Ok(())
}
