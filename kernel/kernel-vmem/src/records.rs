//! Bookkeeping records that live inside slab-allocated physical memory.
//!
//! Each address space threads two singly-linked lists through object
//! slots: one of [`Area`]s (committed or pending ranges) and one of
//! [`PendingPage`]s (pages awaiting their first fault). The link word is
//! the physical address of the next record, [`NIL`]-terminated, at offset
//! zero in both record kinds.

use crate::MapFlags;
use kernel_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_object_alloc::ObjectAllocator;
use kernel_pmem::PhysMemory;

/// List terminator. Zero is a legal frame address, so the sentinel is
/// all-ones instead.
pub(crate) const NIL: u64 = u64::MAX;

/// Bytes used by an [`Area`] record (next, base, pages, flags).
pub const AREA_RECORD_SIZE: u64 = 32;

/// Bytes used by a [`PendingPage`] record (next, page, flags).
pub const PENDING_RECORD_SIZE: u64 = 24;

/// The two slab allocators feeding per-address-space bookkeeping.
///
/// Shared by every address space; created once during bring-up.
pub struct VmObjects {
    pub areas: ObjectAllocator,
    pub pending: ObjectAllocator,
}

impl VmObjects {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            areas: ObjectAllocator::new(AREA_RECORD_SIZE),
            pending: ObjectAllocator::new(PENDING_RECORD_SIZE),
        }
    }
}

impl Default for VmObjects {
    fn default() -> Self {
        Self::new()
    }
}

/// One mapped (or lazily-backed) virtual range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Area {
    pub base: VirtualAddress,
    pub pages: u64,
    pub flags: MapFlags,
}

impl Area {
    pub fn end(&self) -> u64 {
        self.base.as_u64() + self.pages * PAGE_SIZE
    }

    pub fn contains(&self, va: VirtualAddress) -> bool {
        self.base <= va && va.as_u64() < self.end()
    }

    pub fn overlaps(&self, base: VirtualAddress, pages: u64) -> bool {
        base.as_u64() < self.end() && self.base.as_u64() < base.as_u64() + pages * PAGE_SIZE
    }
}

/// One virtual page registered for on-demand backing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct PendingPage {
    pub page: VirtualAddress,
    pub flags: MapFlags,
}

// Field offsets within a record slot. Offset 0 is the next link for both
// record kinds, which lets list surgery stay generic.
const NEXT: u64 = 0;

pub(crate) fn next(mem: &impl PhysMemory, node: PhysicalAddress) -> u64 {
    mem.read_u64(node + NEXT)
}

pub(crate) fn set_next(mem: &mut impl PhysMemory, node: PhysicalAddress, link: u64) {
    mem.write_u64(node + NEXT, link);
}

pub(crate) fn read_area(mem: &impl PhysMemory, node: PhysicalAddress) -> Area {
    Area {
        base: VirtualAddress::new(mem.read_u64(node + 8)),
        pages: mem.read_u64(node + 16),
        flags: MapFlags::from_bits_truncate(mem.read_u64(node + 24)),
    }
}

pub(crate) fn write_area(mem: &mut impl PhysMemory, node: PhysicalAddress, area: &Area) {
    mem.write_u64(node + 8, area.base.as_u64());
    mem.write_u64(node + 16, area.pages);
    mem.write_u64(node + 24, area.flags.bits());
}

pub(crate) fn read_pending(mem: &impl PhysMemory, node: PhysicalAddress) -> PendingPage {
    PendingPage {
        page: VirtualAddress::new(mem.read_u64(node + 8)),
        flags: MapFlags::from_bits_truncate(mem.read_u64(node + 16)),
    }
}

pub(crate) fn write_pending(mem: &mut impl PhysMemory, node: PhysicalAddress, rec: &PendingPage) {
    mem.write_u64(node + 8, rec.page.as_u64());
    mem.write_u64(node + 16, rec.flags.bits());
}
