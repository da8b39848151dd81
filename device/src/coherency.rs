//! Coherency traits for host/device shared buffers.
//!
//! A coherency trait is a declared contract describing how and when the host
//! and the device observe each other's writes to a shared buffer. The trait
//! is fixed at allocation time and drives both capability validation and the
//! synchronization protocol the caller must follow.

use std::fmt;

/// Coherency trait of a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coherency {
    /// Device reads only; the host writes before first device use.
    ReadOnly,
    /// Device writes; the host reads after device completion.
    WriteOnly,
    /// Both sides read and write; every cross-boundary access needs an
    /// explicit synchronization bracket.
    ReadWrite,
    /// Host access requires an explicit map/unmap bracket; outside the
    /// bracket the region is owned by the device.
    CoarseGrain,
    /// Host and device address the region directly, no map/unmap. Racing an
    /// in-flight dispatch is entirely the caller's responsibility.
    FineGrain,
}

impl Coherency {
    /// Whether host access to this buffer goes through a map bracket.
    ///
    /// Fine-grain buffers are the only ones mapped-free; everything else is
    /// coarse-equivalent and must be bracketed.
    pub fn requires_map(self) -> bool {
        !matches!(self, Coherency::FineGrain)
    }

    /// Whether the device is allowed to write through this trait.
    pub fn device_writable(self) -> bool {
        !matches!(self, Coherency::ReadOnly)
    }
}

impl fmt::Display for Coherency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Coherency::ReadOnly => "read-only",
            Coherency::WriteOnly => "write-only",
            Coherency::ReadWrite => "read-write",
            Coherency::CoarseGrain => "coarse-grain",
            Coherency::FineGrain => "fine-grain",
        };
        f.write_str(name)
    }
}

/// Host access mode requested when mapping a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Read,
    Write,
    ReadWrite,
}

impl fmt::Display for MapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MapMode::Read => "read",
            MapMode::Write => "write",
            MapMode::ReadWrite => "read-write",
        };
        f.write_str(name)
    }
}
