//! Built-in elementwise kernels.
//!
//! Small routines used by the demos and tests; they double as reference
//! implementations of the per-item kernel shape. Each one checks its
//! buffer arguments against the grid before touching any element, so a
//! grid wider than a buffer fails with `BadArgument` instead of indexing
//! out of bounds.

use snafu::ensure;

use crate::error::{BadArgumentSnafu, Result};
use crate::kernel::{GroupCtx, KernelRoutine};

/// Highest global index this group's grid can produce, exclusive.
fn grid_end(group: &GroupCtx<'_>) -> usize {
    group.grid_offset() + group.grid_extent()
}

/// `out[gid] = a[gid] * b[gid]` over `i32`. Arguments: a, b, out.
pub struct DotKernel;

impl KernelRoutine for DotKernel {
    fn name(&self) -> &str {
        "dot_i32"
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()> {
        let end = grid_end(group);
        for index in 0..3 {
            let count = group.arg_slice::<i32>(index)?.len();
            ensure!(
                count >= end,
                BadArgumentSnafu {
                    index,
                    reason: format!("buffer holds {count} elements, grid reaches {end}"),
                }
            );
        }
        for item in group.items() {
            let gid = item.global_id;
            let product = {
                let a = group.arg_slice::<i32>(0)?;
                let b = group.arg_slice::<i32>(1)?;
                a[gid] * b[gid]
            };
            group.arg_slice_mut::<i32>(2)?[gid] = product;
        }
        Ok(())
    }
}

/// `out[gid] = input[gid]` over `i32`. Arguments: input, out.
pub struct CopyKernel;

impl KernelRoutine for CopyKernel {
    fn name(&self) -> &str {
        "copy_i32"
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()> {
        let end = grid_end(group);
        for index in 0..2 {
            let count = group.arg_slice::<i32>(index)?.len();
            ensure!(
                count >= end,
                BadArgumentSnafu {
                    index,
                    reason: format!("buffer holds {count} elements, grid reaches {end}"),
                }
            );
        }
        for item in group.items() {
            let value = group.arg_slice::<i32>(0)?[item.global_id];
            group.arg_slice_mut::<i32>(1)?[item.global_id] = value;
        }
        Ok(())
    }
}

/// `out[gid] = gid / extent + gid` over `i32`. Argument: out.
///
/// When a buffer is filled by back-to-back dispatches over equal disjoint
/// regions, the `gid / extent` term is the region index, which makes the
/// per-region writes easy to tell apart.
pub struct RegionFillKernel;

impl KernelRoutine for RegionFillKernel {
    fn name(&self) -> &str {
        "region_fill_i32"
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()> {
        let extent = group.grid_extent();
        let end = grid_end(group);
        let out_len = group.arg_slice::<i32>(0)?.len();
        ensure!(
            out_len >= end,
            BadArgumentSnafu {
                index: 0usize,
                reason: format!("buffer holds {out_len} elements, grid reaches {end}"),
            }
        );
        for item in group.items() {
            let gid = item.global_id;
            group.arg_slice_mut::<i32>(0)?[gid] = (gid / extent + gid) as i32;
        }
        Ok(())
    }
}
