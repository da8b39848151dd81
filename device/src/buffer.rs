//! Typed handles to shared host/device buffers.

use std::marker::PhantomData;

use bytemuck::Pod;

use crate::coherency::Coherency;

/// Identity of an allocation slot inside one allocator's arena.
///
/// The generation counter makes freed handles detectably stale: every free
/// bumps the slot's generation, so a handle kept (or cloned) past its free
/// fails validation instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Handle to a contiguous shared region of `count` elements of `T`.
///
/// The handle carries no pointer; every operation resolves it through the
/// allocator that created it, which checks validity first. Handles are
/// `Copy`: ownership of the memory stays with the allocator, and a copied
/// handle is just another name for the same slot.
#[derive(Debug, Clone, Copy)]
pub struct SvmBuffer<T: Pod> {
    pub(crate) id: BufferId,
    count: usize,
    coherency: Coherency,
    _elem: PhantomData<fn() -> T>,
}

impl<T: Pod> SvmBuffer<T> {
    pub(crate) fn new(id: BufferId, count: usize, coherency: Coherency) -> Self {
        Self { id, count, coherency, _elem: PhantomData }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Number of elements in the region.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn byte_len(&self) -> usize {
        self.count * std::mem::size_of::<T>()
    }

    pub fn coherency(&self) -> Coherency {
        self.coherency
    }
}
