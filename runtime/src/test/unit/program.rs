use std::sync::Arc;

use veld_device::{Device, DeviceDescriptor, SvmCapabilities};

use crate::error::Error;
use crate::kernels::{CopyKernel, DotKernel};
use crate::program::Program;
use crate::reduce::{Contribution, ReduceKernel, ReduceOp};

#[test]
fn build_and_look_up_entry_points() {
    let device = Device::first().unwrap();
    let program =
        Program::build(&device, vec![Arc::new(DotKernel), Arc::new(CopyKernel)]).unwrap();

    assert_eq!(program.entry_point("dot_i32").unwrap().name(), "dot_i32");
    assert_eq!(program.entry_point("copy_i32").unwrap().name(), "copy_i32");
}

#[test]
fn unknown_entry_point_is_reported_by_name() {
    let device = Device::first().unwrap();
    let program = Program::build(&device, vec![Arc::new(DotKernel)]).unwrap();
    match program.entry_point("transpose") {
        Err(Error::MissingKernel { name }) => assert_eq!(name, "transpose"),
        Err(other) => panic!("expected MissingKernel, got {other:?}"),
        Ok(routine) => panic!("expected MissingKernel, got kernel '{}'", routine.name()),
    }
}

#[test]
fn build_log_names_routines_the_device_cannot_run() {
    let caps = SvmCapabilities { coarse_buffer: true, ..Default::default() };
    let device = Device::from_descriptor(DeviceDescriptor::with_capabilities("coarse-only", caps));

    let reduce: Arc<ReduceKernel<i64>> =
        Arc::new(ReduceKernel::new("sum_indices", ReduceOp::Sum, Contribution::GlobalIndex));
    let err = Program::build(&device, vec![Arc::new(DotKernel), reduce]).unwrap_err();
    match err {
        Error::Build { log } => {
            assert!(log.contains("sum_indices"), "log was: {log}");
            assert!(!log.contains("dot_i32"), "log was: {log}");
        }
        other => panic!("expected Build, got {other:?}"),
    }
}

#[test]
fn duplicate_entry_point_names_fail_the_build() {
    let device = Device::first().unwrap();
    let err =
        Program::build(&device, vec![Arc::new(DotKernel), Arc::new(DotKernel)]).unwrap_err();
    assert!(matches!(err, Error::Build { .. }));
}
