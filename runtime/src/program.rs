//! Kernel programs: a named collection of routines validated for a device.
//!
//! Building a program is the compile surface. Validation runs up front so
//! capability problems surface as a build error with a log naming every
//! offending routine, never as a mid-dispatch fault.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use snafu::ensure;
use tracing::debug;

use veld_device::Device;

use crate::error::{BuildSnafu, MissingKernelSnafu, Result};
use crate::kernel::KernelRoutine;

/// A set of kernel routines built for one device.
#[derive(Clone)]
pub struct Program {
    device: Device,
    routines: HashMap<String, Arc<dyn KernelRoutine>>,
}

impl Program {
    /// Validate every routine against the device and assemble the program.
    ///
    /// Fails with a build log listing each routine whose required
    /// capabilities the device does not advertise. Duplicate entry point
    /// names are a build error too.
    pub fn build(device: &Device, routines: Vec<Arc<dyn KernelRoutine>>) -> Result<Program> {
        let caps = device.svm();
        let mut log = String::new();
        let mut table = HashMap::with_capacity(routines.len());

        for routine in routines {
            let required = routine.required_caps();
            if !caps.contains(&required) {
                let _ = writeln!(
                    log,
                    "kernel '{}': device '{}' lacks required capabilities {required:?}",
                    routine.name(),
                    device.name(),
                );
                continue;
            }
            if table.insert(routine.name().to_owned(), routine.clone()).is_some() {
                let _ = writeln!(log, "kernel '{}': duplicate entry point name", routine.name());
            }
        }

        ensure!(log.is_empty(), BuildSnafu { log });
        debug!(device = %device.name(), kernels = table.len(), "program built");
        Ok(Program { device: device.clone(), routines: table })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.routines.keys().map(String::as_str)
    }

    /// Look up an entry point by name.
    pub fn entry_point(&self, name: &str) -> Result<Arc<dyn KernelRoutine>> {
        self.routines
            .get(name)
            .cloned()
            .ok_or_else(|| MissingKernelSnafu { name }.build())
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Program")
            .field("device", &self.device.name())
            .field("kernels", &self.routines.keys().collect::<Vec<_>>())
            .finish()
    }
}
