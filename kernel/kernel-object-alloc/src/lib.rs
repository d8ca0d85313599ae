//! # Slab Object Allocator
//!
//! Fixed-size allocator for small kernel metadata objects (address-space
//! areas, pending-page records, task bookkeeping).
//!
//! Each [`ObjectAllocator`] serves exactly one object size, rounded up to
//! cache-line alignment. Storage comes from the buddy allocator one frame
//! at a time; every frame becomes a *slab* carved into uniform slots. Free
//! slots form a single circular doubly-linked list threaded through the
//! slot memory itself, anchored by a sentinel node that lives in the first
//! slot of the first slab.
//!
//! Growth is monotonic: slabs are never handed back to the frame
//! allocator, even when every slot in them is free.

#![cfg_attr(not(test), no_std)]

use kernel_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_frame_alloc::FrameAllocator;
use kernel_pmem::PhysMemory;

/// Slot alignment; every object size is rounded up to a multiple of this.
pub const CACHE_LINE: u64 = 64;

/// An object slot handed out by an [`ObjectAllocator`].
///
/// For a non-empty object type this is the physical address of the slot.
/// For a zero-sized type it is a well-known non-dereferenceable marker,
/// so callers never have to special-case allocation failure for types
/// with no storage.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ObjHandle(PhysicalAddress);

impl ObjHandle {
    /// Marker handle for zero-sized object types. Never dereferenced.
    pub const ZERO_SIZED: Self = Self(PhysicalAddress::new(1));

    /// Rebuild a handle from the slot address it was handed out as.
    #[inline]
    #[must_use]
    pub const fn from_address(pa: PhysicalAddress) -> Self {
        Self(pa)
    }

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        self.0
    }
}

// Free-list linkage stored in the first 16 bytes of a free slot.
const NEXT_OFFSET: u64 = 0;
const PREV_OFFSET: u64 = 8;

/// Slab allocator for one fixed object size.
///
/// All list manipulation happens through [`PhysMemory`]; the allocator
/// itself holds only the sentinel address and accounting counters.
pub struct ObjectAllocator {
    /// Rounded-up slot size; zero for zero-sized object types.
    slot_size: u64,
    /// Sentinel node of the circular free list; `None` until the first
    /// slab is created.
    sentinel: Option<PhysicalAddress>,
    slabs: u64,
}

impl ObjectAllocator {
    /// Create an allocator for objects of `object_size` bytes.
    #[must_use]
    pub const fn new(object_size: u64) -> Self {
        let slot_size = if object_size == 0 {
            0
        } else {
            object_size.next_multiple_of(CACHE_LINE)
        };
        Self {
            slot_size,
            sentinel: None,
            slabs: 0,
        }
    }

    /// Rounded slot size in bytes; zero for a zero-sized object type.
    #[inline]
    #[must_use]
    pub const fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Frames currently backing this allocator.
    #[inline]
    #[must_use]
    pub const fn slab_count(&self) -> u64 {
        self.slabs
    }

    /// Allocate one object slot.
    ///
    /// Grows by one slab when the free list is down to the bare sentinel.
    /// Returns `None` only when that growth fails for lack of frames.
    pub fn allocate(
        &mut self,
        frames: &mut FrameAllocator,
        mem: &mut impl PhysMemory,
    ) -> Option<ObjHandle> {
        if self.slot_size == 0 {
            return Some(ObjHandle::ZERO_SIZED);
        }
        if !self.ensure_capacity(frames, mem) {
            return None;
        }

        let sentinel = self.sentinel.expect("capacity ensured");
        let slot = PhysicalAddress::new(mem.read_u64(sentinel + NEXT_OFFSET));
        debug_assert_ne!(slot, sentinel, "free list empty after expansion");
        self.unlink(mem, slot);
        Some(ObjHandle(slot))
    }

    /// Return a slot to the free list.
    pub fn free(&mut self, mem: &mut impl PhysMemory, handle: ObjHandle) {
        if self.slot_size == 0 {
            debug_assert_eq!(handle, ObjHandle::ZERO_SIZED);
            return;
        }
        let sentinel = self
            .sentinel
            .expect("free into an allocator that never allocated");
        self.link_after(mem, sentinel, handle.0);
    }

    /// Objects currently on the free list.
    #[must_use]
    pub fn free_objects(&self, mem: &impl PhysMemory) -> u64 {
        let Some(sentinel) = self.sentinel else {
            return 0;
        };
        let mut count = 0;
        let mut node = PhysicalAddress::new(mem.read_u64(sentinel + NEXT_OFFSET));
        while node != sentinel {
            count += 1;
            node = PhysicalAddress::new(mem.read_u64(node + NEXT_OFFSET));
        }
        count
    }

    /// Make sure at least one non-sentinel slot is on the free list,
    /// adding a slab if needed. Returns `false` on frame exhaustion.
    fn ensure_capacity(&mut self, frames: &mut FrameAllocator, mem: &mut impl PhysMemory) -> bool {
        if let Some(sentinel) = self.sentinel
            && mem.read_u64(sentinel + NEXT_OFFSET) != sentinel.as_u64()
        {
            return true;
        }

        let Some(frame) = frames.alloc_one() else {
            log::warn!("object allocator: slab expansion failed, out of frames");
            return false;
        };

        let mut slot = frame;
        if self.sentinel.is_none() {
            // The first slab donates its first slot to the sentinel.
            mem.write_u64(slot + NEXT_OFFSET, slot.as_u64());
            mem.write_u64(slot + PREV_OFFSET, slot.as_u64());
            self.sentinel = Some(slot);
            slot += self.slot_size;
        }
        let sentinel = self.sentinel.expect("sentinel just installed");

        while slot.as_u64() + self.slot_size <= frame.as_u64() + PAGE_SIZE {
            self.link_after(mem, sentinel, slot);
            slot += self.slot_size;
        }

        self.slabs += 1;
        log::debug!(
            "object allocator: slab {} at {frame:?} for {}-byte slots",
            self.slabs,
            self.slot_size
        );
        true
    }

    fn link_after(&self, mem: &mut impl PhysMemory, anchor: PhysicalAddress, node: PhysicalAddress) {
        let next = PhysicalAddress::new(mem.read_u64(anchor + NEXT_OFFSET));
        mem.write_u64(node + NEXT_OFFSET, next.as_u64());
        mem.write_u64(node + PREV_OFFSET, anchor.as_u64());
        mem.write_u64(anchor + NEXT_OFFSET, node.as_u64());
        mem.write_u64(next + PREV_OFFSET, node.as_u64());
    }

    fn unlink(&self, mem: &mut impl PhysMemory, node: PhysicalAddress) {
        let next = mem.read_u64(node + NEXT_OFFSET);
        let prev = mem.read_u64(node + PREV_OFFSET);
        mem.write_u64(PhysicalAddress::new(prev) + NEXT_OFFSET, next);
        mem.write_u64(PhysicalAddress::new(next) + PREV_OFFSET, prev);
    }
}
