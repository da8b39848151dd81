//! Device and platform enumeration.
//!
//! This is a pure read-only query facility: it reports which compute devices
//! exist and which shared-memory coherency capabilities each advertises.
//! Callers must consult `SvmCapabilities` before requesting a coherency
//! trait; the allocator re-validates and rejects unsupported requests.
//!
//! The accelerator in this crate is simulated on the host, so exactly one
//! device is enumerated, sized from the host's parallelism. Descriptors with
//! restricted capability sets can be built directly for tests.

use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::coherency::Coherency;
use crate::error::{NoDeviceFoundSnafu, Result};

/// Shared-memory coherency capabilities advertised by a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SvmCapabilities {
    /// Coarse-grain buffer sharing (map/unmap brackets).
    pub coarse_buffer: bool,
    /// Fine-grain buffer sharing (direct host addressing, no map).
    pub fine_buffer: bool,
    /// Fine-grain system sharing (any host allocation is device-visible).
    pub fine_system: bool,
    /// Device-side atomics on shared buffers.
    pub atomics: bool,
}

impl SvmCapabilities {
    /// Everything the simulated device can do.
    pub const ALL: SvmCapabilities =
        SvmCapabilities { coarse_buffer: true, fine_buffer: true, fine_system: false, atomics: true };

    /// Whether buffers with the given coherency trait can be allocated.
    ///
    /// Read-only/write-only/read-write traits are coarse-equivalent; only
    /// `FineGrain` needs the optional fine-buffer capability.
    pub fn supports(&self, coherency: Coherency) -> bool {
        match coherency {
            Coherency::FineGrain => self.fine_buffer,
            _ => self.coarse_buffer,
        }
    }

    /// Whether `self` advertises at least everything in `required`.
    pub fn contains(&self, required: &SvmCapabilities) -> bool {
        (self.coarse_buffer || !required.coarse_buffer)
            && (self.fine_buffer || !required.fine_buffer)
            && (self.fine_system || !required.fine_system)
            && (self.atomics || !required.atomics)
    }
}

/// Static description of one compute device.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub name: String,
    pub hardware_version: String,
    pub software_version: String,
    /// Version of the kernel language the device's compiler accepts.
    pub language_version: String,
    pub compute_units: usize,
    /// Byte budget available to the shared-buffer allocator.
    pub global_memory: usize,
    pub svm: SvmCapabilities,
}

impl DeviceDescriptor {
    /// Descriptor for the host-simulated device.
    fn simulated() -> Self {
        let compute_units = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self {
            name: "veld simulated device".to_string(),
            hardware_version: format!("veld-sim {}", env!("CARGO_PKG_VERSION")),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            language_version: "veld-kernel 1.0".to_string(),
            compute_units,
            global_memory: 256 * 1024 * 1024,
            svm: SvmCapabilities::ALL,
        }
    }

    /// Build a descriptor with a restricted capability set.
    ///
    /// Used by tests that need a device refusing some coherency traits.
    pub fn with_capabilities(name: &str, svm: SvmCapabilities) -> Self {
        Self { name: name.to_string(), svm, ..Self::simulated() }
    }
}

static DEVICES: Lazy<Vec<Arc<DeviceDescriptor>>> = Lazy::new(|| vec![Arc::new(DeviceDescriptor::simulated())]);

/// Enumerate all available devices.
pub fn list_devices() -> &'static [Arc<DeviceDescriptor>] {
    &DEVICES
}

/// A selected compute device.
///
/// Cheap to clone; the descriptor is shared. Contexts, allocators, and
/// programs all hold one of these and validate capability requests against
/// its descriptor.
#[derive(Debug, Clone)]
pub struct Device {
    descriptor: Arc<DeviceDescriptor>,
}

impl Device {
    /// Select the first enumerated device.
    pub fn first() -> Result<Device> {
        list_devices().first().cloned().map(|descriptor| Device { descriptor }).ok_or_else(|| NoDeviceFoundSnafu.build())
    }

    /// Select the first device satisfying `pred`.
    pub fn select(pred: impl Fn(&DeviceDescriptor) -> bool) -> Result<Device> {
        list_devices()
            .iter()
            .find(|d| pred(d))
            .cloned()
            .map(|descriptor| Device { descriptor })
            .ok_or_else(|| NoDeviceFoundSnafu.build())
    }

    /// Wrap an explicit descriptor (tests and capability experiments).
    pub fn from_descriptor(descriptor: DeviceDescriptor) -> Device {
        Device { descriptor: Arc::new(descriptor) }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn svm(&self) -> &SvmCapabilities {
        &self.descriptor.svm
    }
}
