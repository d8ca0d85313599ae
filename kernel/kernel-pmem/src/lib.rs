//! # Physical Memory Access
//!
//! The seam between the memory subsystem and the machine's RAM.
//!
//! Page tables, slab free lists and per-address-space bookkeeping records
//! all live *inside physical frames*, so every component that manipulates
//! them needs a way to read and write physical memory. On real hardware
//! that is a fixed-offset direct map; here it is the [`PhysMemory`] trait,
//! with [`LinearRam`] as the hosted backing that stands in for DRAM.
//!
//! Out-of-range accesses are invariant violations and panic: nothing in
//! the kernel may fabricate a physical address the frame allocator does
//! not own.
//!
//! The crate also models what the boot collaborator hands over: a finite
//! list of [`PhysRegion`]s tagged with a [`RegionKind`], plus the ranges
//! already occupied by the kernel image and boot structures
//! ([`BootMemoryMap`]).

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod boot_map;
mod linear_ram;

pub use crate::boot_map::{BootMemoryMap, PhysRegion, RegionKind};
pub use crate::linear_ram::LinearRam;

use kernel_addresses::PhysicalAddress;

/// Byte-level access to physical memory.
///
/// All offsets are absolute physical addresses. Implementations must
/// treat an access outside the backing RAM as fatal — it means some
/// component followed a corrupt pointer or a stale page-table entry.
pub trait PhysMemory {
    /// Read a little-endian `u64` at `pa` (must be 8-byte aligned).
    fn read_u64(&self, pa: PhysicalAddress) -> u64;

    /// Write a little-endian `u64` at `pa` (must be 8-byte aligned).
    fn write_u64(&mut self, pa: PhysicalAddress, value: u64);

    /// Read `buf.len()` bytes starting at `pa`.
    fn read_bytes(&self, pa: PhysicalAddress, buf: &mut [u8]);

    /// Write `bytes` starting at `pa`.
    fn write_bytes(&mut self, pa: PhysicalAddress, bytes: &[u8]);

    /// Zero the whole 4 KiB frame at `pa` (must be frame-aligned).
    fn zero_frame(&mut self, pa: PhysicalAddress);
}
