//! Error types for context, dispatch, and synchronization operations.

use snafu::Snafu;

use veld_device::Coherency;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the runtime layer.
///
/// Everything is reported synchronously at the call that detects it. A
/// `Fault` poisons the queue: the caller must reconstruct the context
/// rather than keep operating on it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Platform or allocation error from the device layer.
    #[snafu(display("device error: {source}"))]
    Device { source: veld_device::Error },

    /// Kernel program rejected at build time; the log names every
    /// offending routine.
    #[snafu(display("program build failed:\n{log}"))]
    Build { log: String },

    /// The program has no entry point with this name.
    #[snafu(display("no kernel named '{name}' in program"))]
    MissingKernel { name: String },

    /// Grid or grouping precondition violated. Programmer error, fatal.
    #[snafu(display("invalid launch grid: {reason}"))]
    InvalidGrid { reason: String },

    /// The dispatch declares a write span overlapping one declared by an
    /// in-flight dispatch on the same buffer.
    #[snafu(display("declared write span [{start}, {end}) overlaps an in-flight dispatch"))]
    OverlappingWrites { start: usize, end: usize },

    /// Host access requested through the wrong bracket for the buffer's
    /// trait: mapping a fine-grained buffer, or direct access to a
    /// coarse-equivalent one.
    #[snafu(display("host access mode not valid for {coherency} buffers"))]
    InvalidTrait { coherency: Coherency },

    /// Map range outside the buffer.
    #[snafu(display("map range [{start}, {end}) outside buffer of {count} elements"))]
    MapOutOfBounds { start: usize, end: usize, count: usize },

    /// A kernel argument does not fit the access requested for it.
    #[snafu(display("bad kernel argument {index}: {reason}"))]
    BadArgument { index: usize, reason: String },

    /// Opaque device-reported fault. The in-flight operation is lost and
    /// the queue stays poisoned until the context is reconstructed.
    #[snafu(display("device fault: {message}"))]
    Fault { message: String },

    /// A blocking synchronization call observed `cancel()`.
    #[snafu(display("operation cancelled"))]
    Cancelled,
}
