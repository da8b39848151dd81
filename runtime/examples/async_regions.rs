//! Fill one buffer with back-to-back dispatches over disjoint regions.
//!
//! Each dispatch declares the element range it writes; the dispatcher
//! accepts them because the declared spans are disjoint, and they overlap
//! in time on the queue.

use std::sync::Arc;

use tracing::info;

use veld_runtime::kernels::RegionFillKernel;
use veld_runtime::{Coherency, Context, Device, Grid, Program, Result};

const N: usize = 20;
const REGIONS: usize = 5;

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let device = Device::first().map_err(|source| veld_runtime::Error::Device { source })?;
    let ctx = Context::create(&device);
    let program = Program::build(&device, vec![Arc::new(RegionFillKernel)])?;
    let fill = program.entry_point("region_fill_i32")?;

    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, N)?;

    for grid in Grid::regions(N, REGIONS) {
        let range = grid.offset()..grid.offset() + grid.extent();
        info!(start = range.start, end = range.end, "enqueue region");
        let args = ctx.args().buffer_mut_range(&out, range)?.build();
        ctx.dispatch(fill.clone(), args, grid)?;
    }

    // The read map drains all five dispatches.
    let view = ctx.map_read(&out)?;
    for (i, value) in view.iter().copied().enumerate() {
        info!(i, value, region = i / (N / REGIONS), "filled");
    }
    drop(view);

    ctx.free(out, N)?;
    Ok(())
}
