//! Device layer of the veld shared-memory compute core.
//!
//! Provides the pieces the runtime builds on:
//! - **Platform enumeration**: which devices exist and which shared-memory
//!   coherency capabilities each advertises (`platform`).
//! - **Coherency traits**: the declared host/device visibility contract of
//!   each shared buffer (`coherency`).
//! - **Shared-buffer allocator**: an arena of host-and-device-visible
//!   regions with generation-checked handles (`allocator`, `buffer`).
//! - **Timeline signal**: the completion counter blocking synchronization
//!   is built from (`sync`).

pub mod allocator;
pub mod buffer;
pub mod coherency;
pub mod error;
pub mod platform;
pub mod sync;


pub use allocator::{Region, SvmAllocator};
pub use buffer::{BufferId, SvmBuffer};
pub use coherency::{Coherency, MapMode};
pub use error::{Error, Result};
pub use platform::{list_devices, Device, DeviceDescriptor, SvmCapabilities};
pub use sync::TimelineSignal;
