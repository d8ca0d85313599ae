//! # Buddy Physical Frame Allocator
//!
//! Owns every free physical 4 KiB frame in the machine and hands them out
//! in power-of-two blocks.
//!
//! ## Structure
//!
//! RAM is managed as a list of independent [`chunk`]s of at most
//! `2^(MAX_ORDER-1)` pages each. A chunk keeps one free list per level
//! (level `l` blocks span `2^l` pages) and a compact bitmap with **one
//! parity bit per buddy pair**: the bit is flipped on every insertion or
//! removal of either sibling into/out of its level list, so
//!
//! - bit `0` ⇔ the siblings are in the same state (both linked or both
//!   absent — mergeable, or jointly accounted one level up),
//! - bit `1` ⇔ exactly one sibling is free at this level.
//!
//! Free lists are doubly linked through a per-chunk index arena rather
//! than through the frames themselves, which keeps splice and removal
//! O(1) without writing to the managed memory.
//!
//! ## Failure modes
//!
//! Exhaustion is a `None` return, never fatal. Freeing an address owned
//! by no chunk, or corrupting the parity protocol, is an invariant
//! violation and panics.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod chunk;

pub use crate::chunk::BuddyChunk;

use alloc::vec::Vec;
use kernel_addresses::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};
use kernel_pmem::BootMemoryMap;

/// Number of buddy levels; the largest block spans `2^(MAX_ORDER-1)` pages.
pub const MAX_ORDER: usize = 11;

/// Largest block (and chunk) size, in pages: 1024 pages = 4 MiB.
pub const MAX_CHUNK_PAGES: u64 = 1 << (MAX_ORDER - 1);

/// Buddy allocator over all usable physical memory.
///
/// Created empty; [`init`](Self::init) ingests the boot memory map exactly
/// once. There is no teardown.
#[derive(Default)]
pub struct FrameAllocator {
    chunks: Vec<BuddyChunk>,
    initialized: bool,
}

impl FrameAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunks: Vec::new(),
            initialized: false,
        }
    }

    /// Ingest the boot memory map: compute the maximal contiguous runs of
    /// usable, non-reserved frames and register them as buddy chunks.
    ///
    /// One-shot: calling this twice is an invariant violation.
    pub fn init(&mut self, boot_map: &BootMemoryMap) {
        assert!(!self.initialized, "frame allocator initialized twice");
        self.initialized = true;

        let mut total = 0u64;
        for region in boot_map.ram_regions() {
            total += self.add_ram_region(region.base, region.len / PAGE_SIZE, boot_map);
        }
        log::info!(
            "frame allocator: {total} usable pages in {} chunks",
            self.chunks.len()
        );
    }

    /// Scan `pages` frames from `base`, excluding reserved frames, and add
    /// each maximal free run. Returns the number of usable pages found.
    fn add_ram_region(&mut self, base: PhysicalAddress, pages: u64, map: &BootMemoryMap) -> u64 {
        let mut run_start: Option<PhysicalAddress> = None;
        let mut usable = 0u64;

        for i in 0..pages {
            let frame = base + (i << PAGE_SHIFT);
            if map.is_reserved(frame) {
                if let Some(start) = run_start.take() {
                    self.add_run(start, (frame.as_u64() - start.as_u64()) / PAGE_SIZE);
                }
                continue;
            }
            if run_start.is_none() {
                run_start = Some(frame);
            }
            usable += 1;
        }

        if let Some(start) = run_start {
            let end = base.as_u64() + (pages << PAGE_SHIFT);
            self.add_run(start, (end - start.as_u64()) / PAGE_SIZE);
        }

        usable
    }

    /// Register one contiguous free run, splitting it into chunks of at
    /// most [`MAX_CHUNK_PAGES`].
    fn add_run(&mut self, mut start: PhysicalAddress, mut pages: u64) {
        assert!(start.is_frame_aligned());
        while pages > MAX_CHUNK_PAGES {
            self.chunks.push(BuddyChunk::new(start, MAX_CHUNK_PAGES));
            start += MAX_CHUNK_PAGES << PAGE_SHIFT;
            pages -= MAX_CHUNK_PAGES;
        }
        if pages > 0 {
            self.chunks.push(BuddyChunk::new(start, pages));
        }
    }

    /// Allocate a block of at least `page_count` pages (rounded up to the
    /// next power of two). Returns `None` when every chunk is exhausted.
    pub fn allocate(&mut self, page_count: u64) -> Option<PhysicalAddress> {
        if page_count == 0 || page_count > MAX_CHUNK_PAGES {
            return None;
        }
        self.chunks.iter_mut().find_map(|c| c.alloc_pages(page_count))
    }

    /// Return a block previously obtained from [`allocate`](Self::allocate).
    ///
    /// `page_count` must match the allocation. Freeing an address that no
    /// chunk owns panics.
    pub fn free(&mut self, pa: PhysicalAddress, page_count: u64) {
        for chunk in &mut self.chunks {
            if chunk.owns(pa) {
                chunk.free_pages(pa, page_count);
                return;
            }
        }
        panic!("free of {pa:?}: not owned by any chunk");
    }

    /// Single-frame convenience for [`allocate`](Self::allocate).
    pub fn alloc_one(&mut self) -> Option<PhysicalAddress> {
        self.allocate(1)
    }

    /// Single-frame convenience for [`free`](Self::free).
    pub fn free_one(&mut self, pa: PhysicalAddress) {
        self.free(pa, 1);
    }

    /// Pages currently sitting on free lists, across all chunks.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.chunks.iter().map(BuddyChunk::free_page_count).sum()
    }

    /// Pages ever handed to the allocator, across all chunks.
    #[must_use]
    pub fn total_pages(&self) -> u64 {
        self.chunks.iter().map(BuddyChunk::total_pages).sum()
    }
}
