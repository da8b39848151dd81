use std::sync::Arc;

use veld_device::Device;

use crate::context::Context;
use crate::error::Error;
use crate::grid::Grid;
use crate::reduce::{tree_combine, Contribution, ReduceKernel, ReduceOp, ReduceScalar};
use crate::Coherency;

fn context() -> Context {
    Context::create(&Device::first().unwrap())
}

#[test]
fn tree_combine_sums_ten_worker_indices() {
    let mut scratch: Vec<i64> = (0..10).collect();
    assert_eq!(tree_combine(ReduceOp::Sum, &mut scratch), 45);
}

#[test]
fn tree_combine_matches_sequential_fold() {
    for len in [1usize, 2, 4, 8, 16, 64, 3, 5, 10, 100] {
        let values: Vec<i64> = (0..len as i64).map(|v| v * 3 - 7).collect();
        for op in [ReduceOp::Sum, ReduceOp::Min, ReduceOp::Max] {
            let mut scratch = values.clone();
            let expected = values
                .iter()
                .copied()
                .fold(<i64 as ReduceScalar>::identity(op), |a, b| {
                    <i64 as ReduceScalar>::combine(op, a, b)
                });
            assert_eq!(tree_combine(op, &mut scratch), expected, "{op} over len {len}");
        }
    }
}

#[test]
fn tree_combine_of_empty_scratch_is_the_identity() {
    let mut scratch: Vec<u32> = Vec::new();
    assert_eq!(tree_combine(ReduceOp::Sum, &mut scratch), 0);
    assert_eq!(tree_combine(ReduceOp::Min, &mut scratch), u32::MAX);
}

#[test]
fn index_reduction_over_the_grid() {
    let ctx = context();
    let kernel: Arc<ReduceKernel<i64>> =
        Arc::new(ReduceKernel::new("sum_indices", ReduceOp::Sum, Contribution::GlobalIndex));

    let acc = ctx.alloc::<i64>(Coherency::FineGrain, 1).unwrap();
    ctx.fine_slice_mut(&acc).unwrap()[0] = kernel.identity();

    let args = ctx.args().buffer_mut(&acc).unwrap().local::<i64>(8).build();
    ctx.dispatch(kernel, args, Grid::grouped(64, 8)).unwrap();
    ctx.barrier().unwrap();

    // sum(0..64) = 2016
    assert_eq!(ctx.fine_slice(&acc).unwrap()[0], 2016);
}

#[test]
fn input_reduction_sums_buffer_elements() {
    let ctx = context();
    let kernel: Arc<ReduceKernel<i32>> =
        Arc::new(ReduceKernel::new("sum_input", ReduceOp::Sum, Contribution::Input { arg: 2 }));

    let acc = ctx.alloc::<i32>(Coherency::FineGrain, 1).unwrap();
    let input = ctx.alloc::<i32>(Coherency::FineGrain, 16).unwrap();
    ctx.fine_slice_mut(&acc).unwrap()[0] = kernel.identity();
    ctx.fine_slice_mut(&input)
        .unwrap()
        .copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);

    let args = ctx
        .args()
        .buffer_mut(&acc)
        .unwrap()
        .local::<i32>(4)
        .buffer(&input)
        .unwrap()
        .build();
    ctx.dispatch(kernel, args, Grid::grouped(16, 4)).unwrap();
    ctx.barrier().unwrap();

    assert_eq!(ctx.fine_slice(&acc).unwrap()[0], 136);
}

#[test]
fn max_reduction_finds_the_largest_element() {
    let ctx = context();
    let kernel: Arc<ReduceKernel<i32>> =
        Arc::new(ReduceKernel::new("max_input", ReduceOp::Max, Contribution::Input { arg: 2 }));

    let acc = ctx.alloc::<i32>(Coherency::FineGrain, 1).unwrap();
    let input = ctx.alloc::<i32>(Coherency::FineGrain, 8).unwrap();
    ctx.fine_slice_mut(&acc).unwrap()[0] = kernel.identity();
    ctx.fine_slice_mut(&input).unwrap().copy_from_slice(&[-4, 17, 3, -20, 9, 17, 0, 5]);

    let args = ctx
        .args()
        .buffer_mut(&acc)
        .unwrap()
        .local::<i32>(8)
        .buffer(&input)
        .unwrap()
        .build();
    ctx.dispatch(kernel, args, Grid::grouped(8, 8)).unwrap();
    ctx.barrier().unwrap();

    assert_eq!(ctx.fine_slice(&acc).unwrap()[0], 17);
}

#[test]
fn reduction_requires_an_explicit_power_of_two_group() {
    let ctx = context();
    let kernel: Arc<ReduceKernel<i64>> =
        Arc::new(ReduceKernel::new("sum_indices", ReduceOp::Sum, Contribution::GlobalIndex));

    let acc = ctx.alloc::<i64>(Coherency::FineGrain, 1).unwrap();

    // Implicit grouping is not enough.
    let args = ctx.args().buffer_mut(&acc).unwrap().local::<i64>(8).build();
    let err = ctx.dispatch(kernel.clone(), args, Grid::linear(64)).unwrap_err();
    assert!(matches!(err, Error::InvalidGrid { .. }));

    // Explicit but not a power of two.
    let args = ctx.args().buffer_mut(&acc).unwrap().local::<i64>(12).build();
    let err = ctx.dispatch(kernel, args, Grid::grouped(60, 12)).unwrap_err();
    assert!(matches!(err, Error::InvalidGrid { .. }));
}
