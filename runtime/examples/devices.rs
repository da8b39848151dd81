//! Enumerate the available devices and their shared-memory capabilities.

use tracing::info;

use veld_runtime::list_devices;

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    for descriptor in list_devices() {
        info!(
            name = %descriptor.name,
            hardware = %descriptor.hardware_version,
            software = %descriptor.software_version,
            language = %descriptor.language_version,
            compute_units = descriptor.compute_units,
            global_memory = descriptor.global_memory,
            "device"
        );
        info!(
            coarse_buffer = descriptor.svm.coarse_buffer,
            fine_buffer = descriptor.svm.fine_buffer,
            fine_system = descriptor.svm.fine_system,
            atomics = descriptor.svm.atomics,
            "  shared-memory capabilities"
        );
    }
}
