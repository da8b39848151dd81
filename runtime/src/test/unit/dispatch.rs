use std::sync::Arc;
use std::thread;
use std::time::Duration;

use veld_device::Device;

use crate::context::Context;
use crate::error::{Error, FaultSnafu, Result};
use crate::grid::Grid;
use crate::kernel::{ForEach, GroupCtx, KernelRoutine};
use crate::kernels::{CopyKernel, DotKernel, RegionFillKernel};
use crate::Coherency;

fn context() -> Context {
    Context::create(&Device::first().unwrap())
}

/// Writes 1 to every assigned index, slowly enough that the dispatch is
/// still in flight when the test enqueues a competitor.
struct SlowFill;

impl KernelRoutine for SlowFill {
    fn name(&self) -> &str {
        "slow_fill"
    }

    fn run_group(&self, group: &mut GroupCtx<'_>) -> Result<()> {
        thread::sleep(Duration::from_millis(100));
        for lid in 0..group.group_size() {
            let gid = group.item(lid).global_id;
            group.arg_slice_mut::<i32>(0)?[gid] = 1;
        }
        Ok(())
    }
}

struct FailingKernel;

impl KernelRoutine for FailingKernel {
    fn name(&self) -> &str {
        "failing"
    }

    fn run_group(&self, _group: &mut GroupCtx<'_>) -> Result<()> {
        FaultSnafu { message: "injected fault" }.fail()
    }
}

#[test]
fn dot_kernel_round_trip_through_map_brackets() {
    let ctx = context();
    let a = ctx.alloc::<i32>(Coherency::ReadOnly, 5).unwrap();
    let b = ctx.alloc::<i32>(Coherency::ReadOnly, 5).unwrap();
    let out = ctx.alloc::<i32>(Coherency::WriteOnly, 5).unwrap();

    {
        let mut view = ctx.map_write(&a).unwrap();
        view.copy_from_slice(&[0, 1, 2, 3, 4]);
    }
    {
        let mut view = ctx.map_write(&b).unwrap();
        view.copy_from_slice(&[1, 1, 1, 1, 1]);
    }

    let args = ctx
        .args()
        .buffer(&a)
        .unwrap()
        .buffer(&b)
        .unwrap()
        .buffer_mut(&out)
        .unwrap()
        .build();
    ctx.dispatch(Arc::new(DotKernel), args, Grid::linear(5)).unwrap();

    let view = ctx.map_read(&out).unwrap();
    assert_eq!(&view[..], &[0, 1, 2, 3, 4]);
    drop(view);

    ctx.free(a, 5).unwrap();
    ctx.free(b, 5).unwrap();
    ctx.free(out, 5).unwrap();
}

#[test]
fn fine_grained_buffers_are_host_visible_after_a_barrier() {
    let ctx = context();
    let input = ctx.alloc::<i32>(Coherency::FineGrain, 8).unwrap();
    let out = ctx.alloc::<i32>(Coherency::FineGrain, 8).unwrap();

    ctx.fine_slice_mut(&input).unwrap().copy_from_slice(&[5, 6, 7, 8, 9, 10, 11, 12]);

    let args = ctx.args().buffer(&input).unwrap().buffer_mut(&out).unwrap().build();
    ctx.dispatch(Arc::new(CopyKernel), args, Grid::linear(8)).unwrap();
    ctx.barrier().unwrap();

    assert_eq!(&ctx.fine_slice(&out).unwrap()[..], &[5, 6, 7, 8, 9, 10, 11, 12]);
}

#[test]
fn mapping_a_fine_grained_buffer_is_rejected() {
    let ctx = context();
    let buf = ctx.alloc::<i32>(Coherency::FineGrain, 4).unwrap();
    assert!(matches!(ctx.map_read(&buf), Err(Error::InvalidTrait { coherency: Coherency::FineGrain })));
}

#[test]
fn direct_access_to_a_coarse_buffer_is_rejected() {
    let ctx = context();
    let buf = ctx.alloc::<i32>(Coherency::CoarseGrain, 4).unwrap();
    assert!(matches!(ctx.fine_slice(&buf), Err(Error::InvalidTrait { .. })));
}

#[test]
fn disjoint_region_dispatches_each_fill_their_region() {
    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 20).unwrap();

    for grid in Grid::regions(20, 5) {
        let range = grid.offset()..grid.offset() + grid.extent();
        let args = ctx.args().buffer_mut_range(&out, range).unwrap().build();
        ctx.dispatch(Arc::new(RegionFillKernel), args, grid).unwrap();
    }

    let view = ctx.map_read(&out).unwrap();
    for (i, value) in view.iter().enumerate() {
        assert_eq!(*value, (i / 4 + i) as i32, "element {i}");
    }
}

#[test]
fn overlapping_write_spans_are_rejected_while_in_flight() {
    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 16).unwrap();

    let first = ctx.args().buffer_mut_range(&out, 0..12).unwrap().build();
    ctx.dispatch(Arc::new(SlowFill), first, Grid::with_offset(0, 12)).unwrap();

    // [8, 12) collides with the in-flight [0, 12).
    let second = ctx.args().buffer_mut_range(&out, 8..16).unwrap().build();
    let err = ctx.dispatch(Arc::new(SlowFill), second, Grid::with_offset(8, 8)).unwrap_err();
    assert!(matches!(err, Error::OverlappingWrites { .. }));

    // Once the first dispatch retires the same span is free again.
    ctx.barrier().unwrap();
    let again = ctx.args().buffer_mut_range(&out, 8..16).unwrap().build();
    ctx.dispatch(Arc::new(SlowFill), again, Grid::with_offset(8, 8)).unwrap();
    ctx.barrier().unwrap();
}

#[test]
fn disjoint_write_spans_run_back_to_back() {
    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 16).unwrap();

    for range in [0..8, 8..16] {
        let grid = Grid::with_offset(range.start, range.len());
        let args = ctx.args().buffer_mut_range(&out, range).unwrap().build();
        ctx.dispatch(Arc::new(SlowFill), args, grid).unwrap();
    }

    let view = ctx.map_read(&out).unwrap();
    assert!(view.iter().all(|&v| v == 1));
}

#[test]
fn kernel_fault_poisons_the_queue() {
    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 4).unwrap();

    let args = ctx.args().buffer_mut(&out).unwrap().build();
    ctx.dispatch(Arc::new(FailingKernel), args, Grid::linear(4)).unwrap();

    assert!(matches!(ctx.barrier(), Err(Error::Fault { .. })));
    // Even once the queue is fully drained, the fault sticks to every
    // later barrier.
    assert!(matches!(ctx.barrier(), Err(Error::Fault { .. })));

    // The queue stays poisoned: nothing else goes through.
    let args = ctx.args().buffer_mut(&out).unwrap().build();
    assert!(matches!(
        ctx.dispatch(Arc::new(RegionFillKernel), args, Grid::linear(4)),
        Err(Error::Fault { .. })
    ));
    assert!(matches!(ctx.map_read(&out), Err(Error::Fault { .. })));
}

#[test]
fn grid_wider_than_the_buffer_faults_instead_of_indexing_out_of_bounds() {
    let ctx = context();
    let input = ctx.alloc::<i32>(Coherency::ReadWrite, 4).unwrap();
    let out = ctx.alloc::<i32>(Coherency::ReadWrite, 4).unwrap();

    let args = ctx.args().buffer(&input).unwrap().buffer_mut(&out).unwrap().build();
    ctx.dispatch(Arc::new(CopyKernel), args, Grid::linear(64)).unwrap();

    // The bounds check turns the bad launch into a fault; the barrier must
    // report it rather than hang on a dead worker.
    assert!(matches!(ctx.barrier(), Err(Error::Fault { .. })));
}

#[test]
fn panicking_kernel_faults_the_queue_and_retires_its_ticket() {
    struct PanickingKernel;

    impl KernelRoutine for PanickingKernel {
        fn name(&self) -> &str {
            "panicking"
        }

        fn run_group(&self, _group: &mut GroupCtx<'_>) -> Result<()> {
            panic!("deliberate kernel panic");
        }
    }

    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 4).unwrap();

    let args = ctx.args().buffer_mut(&out).unwrap().build();
    ctx.dispatch(Arc::new(PanickingKernel), args, Grid::linear(4)).unwrap();

    match ctx.barrier() {
        Err(Error::Fault { message }) => assert!(message.contains("deliberate kernel panic")),
        other => panic!("expected Fault, got {other:?}"),
    }
    // The worker survives the panic: a later enqueue still gets the
    // poisoned-queue answer instead of a dead channel.
    let args = ctx.args().buffer_mut(&out).unwrap().build();
    assert!(matches!(
        ctx.dispatch(Arc::new(RegionFillKernel), args, Grid::linear(4)),
        Err(Error::Fault { .. })
    ));
}

#[test]
fn cancel_unblocks_a_waiting_barrier() {
    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 8).unwrap();

    let args = ctx.args().buffer_mut(&out).unwrap().build();
    ctx.dispatch(Arc::new(SlowFill), args, Grid::linear(8)).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            thread::sleep(Duration::from_millis(10));
            ctx.cancel();
        });
        assert!(matches!(ctx.barrier(), Err(Error::Cancelled { .. })));
    });

    assert!(matches!(
        ctx.dispatch(Arc::new(RegionFillKernel), ctx.args().build(), Grid::linear(4)),
        Err(Error::Cancelled { .. })
    ));
}

#[test]
fn scalar_arguments_reach_the_kernel() {
    let ctx = context();
    let out = ctx.alloc::<i32>(Coherency::CoarseGrain, 4).unwrap();

    let fill = Arc::new(ForEach::new("fill_scalar", |item, group: &mut GroupCtx<'_>| {
        let value = match group.arg_scalar(1)? {
            crate::ScalarValue::I32(v) => v,
            other => panic!("unexpected scalar {other:?}"),
        };
        group.arg_slice_mut::<i32>(0)?[item.global_id] = value;
        Ok(())
    }));

    let args = ctx.args().buffer_mut(&out).unwrap().scalar(42i32).build();
    ctx.dispatch(fill, args, Grid::linear(4)).unwrap();

    assert_eq!(&ctx.map_read(&out).unwrap()[..], &[42, 42, 42, 42]);
}

#[test]
fn binding_a_read_only_buffer_for_writes_fails() {
    let ctx = context();
    let buf = ctx.alloc::<i32>(Coherency::ReadOnly, 4).unwrap();
    let err = ctx.args().buffer_mut(&buf).unwrap_err();
    assert!(matches!(err, Error::BadArgument { index: 0, .. }));
}

#[test]
fn binding_a_freed_buffer_fails() {
    let ctx = context();
    let buf = ctx.alloc::<i32>(Coherency::ReadWrite, 4).unwrap();
    ctx.free(buf, 4).unwrap();
    assert!(matches!(ctx.args().buffer(&buf), Err(Error::Device { .. })));
}

#[test]
fn freeing_a_buffer_after_enqueue_does_not_disturb_the_dispatch() {
    let ctx = context();
    let input = ctx.alloc::<i32>(Coherency::FineGrain, 8).unwrap();
    let out = ctx.alloc::<i32>(Coherency::FineGrain, 8).unwrap();
    ctx.fine_slice_mut(&input).unwrap().copy_from_slice(&[1; 8]);

    let args = ctx.args().buffer(&input).unwrap().buffer_mut(&out).unwrap().build();
    ctx.dispatch(Arc::new(CopyKernel), args, Grid::linear(8)).unwrap();
    // The snapshot holds the region; the handle can go away immediately.
    ctx.free(input, 8).unwrap();
    ctx.barrier().unwrap();

    assert_eq!(&ctx.fine_slice(&out).unwrap()[..], &[1; 8]);
}
