//! # Virtual Memory / Paging
//!
//! Per-task four-level page tables plus on-demand backing.
//!
//! An [`AddressSpace`] owns one root table frame and walks the classic
//! x86-64 radix tree (PML4 → PDPT → PD → PT). Mappings are installed
//! eagerly by [`AddressSpace::map`] and the huge-page variants, or lazily
//! by [`AddressSpace::alloc_pages`], which only records the intent; the
//! first page fault on such a page allocates and zeroes a frame and
//! installs the real mapping ([`AddressSpace::handle_fault`]).
//!
//! All table memory is ordinary physical frames accessed through
//! [`PhysMemory`](kernel_pmem::PhysMemory); bookkeeping records (areas,
//! pending pages) live in slab slots from [`VmObjects`].
//!
//! ## Failure modes
//!
//! Non-canonical addresses and exhausted memory come back as
//! [`MapError`] / [`TranslateError`] values. Conflicting mappings — a
//! table walk running into a huge-page leaf, or a huge page dropped onto
//! an occupied slot — are invariant violations and panic.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod address_space;
mod entry;
mod records;

pub use crate::address_space::AddressSpace;
pub use crate::entry::{EntryFlags, MapFlags, PageTableEntry};
pub use crate::records::{AREA_RECORD_SIZE, PENDING_RECORD_SIZE, VmObjects};

use kernel_addresses::VirtualAddress;
use thiserror::Error;

/// Why a mapping request could not be installed.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum MapError {
    #[error("non-canonical virtual address {0:?}")]
    NonCanonical(VirtualAddress),
    #[error("out of physical memory")]
    OutOfMemory,
}

/// Why a virtual address did not resolve to a physical one.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum TranslateError {
    #[error("non-canonical virtual address {0:?}")]
    NonCanonical(VirtualAddress),
    #[error("{0:?} is not mapped")]
    NotMapped(VirtualAddress),
}

/// Address-space cloning is a declared extension point, nothing more.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
#[error("address-space cloning is not supported")]
pub struct CloneUnsupported;
