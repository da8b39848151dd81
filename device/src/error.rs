//! Error types for platform and allocation operations.

use snafu::Snafu;

use crate::coherency::Coherency;

/// Result type for device operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by device enumeration and the shared-buffer allocator.
///
/// All errors are reported synchronously at the call that detects them;
/// nothing is retried internally.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// No compute device matched the selection criteria.
    #[snafu(display("no compute device matching selection criteria"))]
    NoDeviceFound,

    /// The device does not advertise the requested coherency capability.
    #[snafu(display("device '{device}' does not support {coherency} buffers"))]
    UnsupportedTrait { coherency: Coherency, device: String },

    /// The allocator byte budget is exhausted.
    #[snafu(display("out of device memory: requested {requested} bytes, {available} available"))]
    OutOfMemory { requested: usize, available: usize },

    /// Zero-element allocations are rejected up front.
    #[snafu(display("cannot allocate a zero-element shared buffer"))]
    EmptyAllocation,

    /// The element count passed to `free` is part of the contract and must
    /// match the original allocation.
    #[snafu(display("free count mismatch: buffer holds {expected} elements, caller said {actual}"))]
    CountMismatch { expected: usize, actual: usize },

    /// The handle refers to a slot that was already freed (or never lived).
    #[snafu(display("stale buffer handle: slot {index} generation {generation} is not live"))]
    StaleBuffer { index: u32, generation: u32 },
}
