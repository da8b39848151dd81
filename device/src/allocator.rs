//! Shared-buffer arena allocator.
//!
//! Allocates host-and-device-visible memory regions tagged with a coherency
//! trait. The arena tracks an allocated/freed state per slot with a
//! generation counter, so double frees and use-after-free through stale
//! handles fail deterministically instead of corrupting allocator state.
//!
//! Invariant: a buffer is allocated from exactly one allocator instance and
//! must be freed through that same instance with the original element count;
//! the count is part of the free contract, not inferred.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::Mutex;
use snafu::ensure;
use tracing::debug;

use crate::buffer::{BufferId, SvmBuffer};
use crate::coherency::Coherency;
use crate::error::{
    CountMismatchSnafu, EmptyAllocationSnafu, OutOfMemorySnafu, Result, StaleBufferSnafu, UnsupportedTraitSnafu,
};
use crate::platform::Device;

/// Alignment of every shared region. Large enough for any scalar element
/// and for the atomic accumulator views the reduction engine takes.
const REGION_ALIGN: usize = 64;

/// One raw shared region, owned by the arena and reference-counted out to
/// in-flight work so a free after enqueue cannot invalidate device access.
#[derive(Debug)]
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is plain memory; all concurrent access goes through
// raw pointers under the dispatch/map protocol, never through &mut here.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocate a zeroed region of `len` bytes.
    ///
    /// Also used directly for device-local scratch allocations, which are
    /// size-only and never handed a host-visible handle. Returns `None` on
    /// host allocation failure or `len == 0`.
    pub fn zeroed(len: usize) -> Option<Region> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, REGION_ALIGN).ok()?;
        // SAFETY: len > 0 was checked; layout is valid.
        let raw = unsafe { alloc_zeroed(layout) };
        NonNull::new(raw).map(|ptr| Region { ptr, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // Layout reconstruction cannot fail: it succeeded at alloc time.
        let layout = Layout::from_size_align(self.len, REGION_ALIGN).expect("region layout");
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        unsafe { dealloc(self.ptr.as_ptr(), layout) };
    }
}

#[derive(Debug)]
struct LiveAlloc {
    region: Arc<Region>,
    count: usize,
    elem_size: usize,
    coherency: Coherency,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    live: Option<LiveAlloc>,
}

#[derive(Debug, Default)]
struct Arena {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    used_bytes: usize,
}

/// Allocator for shared host/device buffers, bound to one device.
#[derive(Debug)]
pub struct SvmAllocator {
    device: Device,
    budget: usize,
    arena: Mutex<Arena>,
}

impl SvmAllocator {
    pub fn new(device: Device) -> Self {
        let budget = device.descriptor().global_memory;
        Self { device, budget, arena: Mutex::new(Arena::default()) }
    }

    /// Allocator with an explicit byte budget (tests exercise exhaustion
    /// without touching 256 MiB).
    pub fn with_budget(device: Device, budget: usize) -> Self {
        Self { device, budget, arena: Mutex::new(Arena::default()) }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Bytes currently reserved by live allocations.
    pub fn used_bytes(&self) -> usize {
        self.arena.lock().used_bytes
    }

    /// Allocate `count` elements of `T` under the given coherency trait.
    ///
    /// The capability check runs before any reservation, so an
    /// `UnsupportedTrait` failure has no partial side effect.
    pub fn alloc<T: Pod>(&self, coherency: Coherency, count: usize) -> Result<SvmBuffer<T>> {
        ensure!(
            self.device.svm().supports(coherency),
            UnsupportedTraitSnafu { coherency, device: self.device.name() }
        );
        ensure!(count > 0, EmptyAllocationSnafu);

        let elem_size = std::mem::size_of::<T>();

        let mut arena = self.arena.lock();
        let available = self.budget - arena.used_bytes;
        // An overflowing byte size can never fit the budget; report it as
        // exhaustion with the saturated request size.
        let bytes = match count.checked_mul(elem_size) {
            Some(bytes) if bytes <= available => bytes,
            _ => {
                let requested = count.saturating_mul(elem_size);
                return OutOfMemorySnafu { requested, available }.fail();
            }
        };

        let region = Region::zeroed(bytes).map(Arc::new);
        let region = match region {
            Some(region) => region,
            None => return OutOfMemorySnafu { requested: bytes, available }.fail(),
        };

        let index = match arena.free_slots.pop() {
            Some(index) => index,
            None => {
                arena.slots.push(Slot::default());
                (arena.slots.len() - 1) as u32
            }
        };
        let slot = &mut arena.slots[index as usize];
        slot.live = Some(LiveAlloc { region, count, elem_size, coherency });
        let generation = slot.generation;
        arena.used_bytes += bytes;

        debug!(slot = index, generation, count, bytes, %coherency, "svm alloc");
        Ok(SvmBuffer::new(BufferId { index, generation }, count, coherency))
    }

    /// Free a buffer previously allocated here, with its original count.
    ///
    /// A second free of the same handle fails with `StaleBuffer`; a wrong
    /// count fails with `CountMismatch` and leaves the allocation live.
    pub fn free<T: Pod>(&self, buffer: SvmBuffer<T>, count: usize) -> Result<()> {
        let id = buffer.id();
        let mut arena = self.arena.lock();

        let slot = arena
            .slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation && s.live.is_some());
        let slot = match slot {
            Some(slot) => slot,
            None => return StaleBufferSnafu { index: id.index, generation: id.generation }.fail(),
        };

        {
            let live = slot.live.as_ref().expect("checked live above");
            ensure!(live.count == count, CountMismatchSnafu { expected: live.count, actual: count });
        }

        let live = slot.live.take().expect("checked live above");
        slot.generation = slot.generation.wrapping_add(1);
        arena.used_bytes -= live.count * live.elem_size;
        arena.free_slots.push(id.index);

        debug!(slot = id.index, generation = id.generation, count, "svm free");
        // The Arc keeps the region alive for any still-enqueued dispatch.
        drop(live.region);
        Ok(())
    }

    /// Resolve a handle to its live region.
    ///
    /// Every consumer (argument binding, mapping) validates through here, so
    /// a stale handle is caught before any pointer is produced.
    pub fn resolve<T: Pod>(&self, buffer: &SvmBuffer<T>) -> Result<Arc<Region>> {
        let id = buffer.id();
        let arena = self.arena.lock();
        arena
            .slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.live.as_ref())
            .map(|live| Arc::clone(&live.region))
            .ok_or_else(|| StaleBufferSnafu { index: id.index, generation: id.generation }.build())
    }
}
