//! # Typed Memory Addresses
//!
//! Strongly typed wrappers for the raw addresses used by the memory
//! subsystem. The point is to prevent mixing virtual and physical
//! addresses at compile time while remaining zero-cost wrappers around
//! `u64` values:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | Physical RAM / MMIO address. |
//! | [`VirtualAddress`] | Page-table translated address. |
//!
//! There is deliberately **no** conversion between the two: translating a
//! virtual address requires a page-table walk, and identity-style shortcuts
//! are exactly the bug class these types exist to rule out.
//!
//! ## Page sizes
//!
//! The three x86-64 leaf sizes are available as marker types implementing
//! [`PageSize`]: [`Size4K`], [`Size2M`] and [`Size1G`]. Helpers like
//! [`VirtualAddress::offset`] are generic over them.
//!
//! ## Virtual address layout
//!
//! A canonical 48-bit virtual address decomposes as
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! and bits 63..48 must replicate bit 47 (sign extension). The index
//! accessors on [`VirtualAddress`] extract the four 9-bit table indices.

#![cfg_attr(not(test), no_std)]

mod page_size;
mod physical_address;
mod virtual_address;

pub use crate::page_size::{PageSize, Size1G, Size2M, Size4K};
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Base page granularity, in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Number of entries in one page table (any level).
pub const TABLE_ENTRIES: usize = 512;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ### Examples
/// ```rust
/// # use kernel_addresses::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(4096, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two; `x + (a - 1)` must not overflow.
///
/// ### Examples
/// ```rust
/// # use kernel_addresses::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
