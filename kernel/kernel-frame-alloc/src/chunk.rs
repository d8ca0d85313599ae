use crate::{MAX_CHUNK_PAGES, MAX_ORDER};
use alloc::vec;
use alloc::vec::Vec;
use kernel_addresses::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};

/// Sentinel index terminating a free list.
const NIL: u32 = u32::MAX;

/// Free-list linkage for one page index.
///
/// Only meaningful while that page heads a free block linked at some
/// level; stale entries are never followed.
#[derive(Copy, Clone)]
struct Link {
    prev: u32,
    next: u32,
}

/// One contiguous physical region managed as an independent buddy arena.
///
/// Page indices are chunk-relative, so the first page of every block at
/// level `l` sits at an index that is a multiple of `2^l` — blocks are
/// naturally aligned and a block's buddy is found by toggling bit `l` of
/// its index.
///
/// ### Parity bitmap
///
/// Each buddy pair at each level owns exactly one bit, with indices
/// assigned densely and contiguously per level: level `l` occupies bits
/// `[bit_base[l], bit_base[l+1])`, pair `p` of level `l` is bit
/// `bit_base[l] + p`. The bit is flipped on every list insertion/removal
/// of either sibling.
pub struct BuddyChunk {
    base: PhysicalAddress,
    pages: u64,
    /// Head page index per level; `NIL` when empty.
    heads: [u32; MAX_ORDER],
    /// One entry per page in the chunk.
    links: Vec<Link>,
    parity: Vec<u64>,
    bit_base: [usize; MAX_ORDER],
}

impl BuddyChunk {
    /// Create a chunk over `pages` frames starting at `base` and seed its
    /// free lists with the binary decomposition of `pages`, largest block
    /// first.
    #[must_use]
    pub fn new(base: PhysicalAddress, pages: u64) -> Self {
        assert!(base.is_frame_aligned(), "chunk base must be page-aligned");
        assert!(pages > 0 && pages <= MAX_CHUNK_PAGES, "bad chunk size: {pages}");

        let mut bit_base = [0usize; MAX_ORDER];
        let mut bits = 0usize;
        for (level, base_slot) in bit_base.iter_mut().enumerate() {
            *base_slot = bits;
            let blocks = usize::try_from(pages.div_ceil(1 << level)).unwrap();
            bits += blocks.div_ceil(2);
        }

        let mut chunk = Self {
            base,
            pages,
            heads: [NIL; MAX_ORDER],
            links: vec![Link { prev: NIL, next: NIL }; usize::try_from(pages).unwrap()],
            parity: vec![0; bits.div_ceil(64)],
            bit_base,
        };

        let mut offset = 0u32;
        let mut remaining = pages;
        for level in (0..MAX_ORDER).rev() {
            let level_pages = 1u64 << level;
            if remaining >= level_pages {
                chunk.add_node(level, offset);
                offset += level_pages as u32;
                remaining -= level_pages;
            }
        }
        debug_assert_eq!(remaining, 0);

        chunk
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        self.base
    }

    /// Pages ever added to this chunk.
    #[inline]
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.pages
    }

    /// Whether `pa` falls inside this chunk's region.
    #[must_use]
    pub fn owns(&self, pa: PhysicalAddress) -> bool {
        self.base <= pa && pa.as_u64() < self.base.as_u64() + (self.pages << PAGE_SHIFT)
    }

    /// Allocate a block of at least `page_count` pages, or `None` when
    /// this chunk cannot satisfy the request.
    pub fn alloc_pages(&mut self, page_count: u64) -> Option<PhysicalAddress> {
        if page_count == 0 {
            return None;
        }
        let level = level_for(page_count);
        let idx = self.take_node(level)?;
        self.rem_node(level, idx);
        Some(self.base + (u64::from(idx) << PAGE_SHIFT))
    }

    /// Free a block previously returned by [`alloc_pages`](Self::alloc_pages),
    /// merging with its buddy as long as the parity bit reports both halves
    /// free.
    pub fn free_pages(&mut self, pa: PhysicalAddress, page_count: u64) {
        assert!(self.owns(pa), "{pa:?} outside chunk at {:?}", self.base);
        assert!(pa.is_frame_aligned(), "freeing unaligned {pa:?}");
        if page_count == 0 {
            return;
        }

        let level = level_for(page_count);
        let idx = u32::try_from((pa.as_u64() - self.base.as_u64()) / PAGE_SIZE).unwrap();
        debug_assert_eq!(
            u64::from(idx) % (1 << level),
            0,
            "block not aligned to its level"
        );

        self.add_node(level, idx);
        self.merge(level, idx);
    }

    /// Pages currently on this chunk's free lists.
    #[must_use]
    pub fn free_page_count(&self) -> u64 {
        let mut total = 0u64;
        for level in 0..MAX_ORDER {
            let mut idx = self.heads[level];
            while idx != NIL {
                total += 1 << level;
                idx = self.links[idx as usize].next;
            }
        }
        total
    }
}

impl BuddyChunk {
    /// Find a free block at `level`, splitting a parent when the level's
    /// list is empty. The returned index is still linked at `level`.
    fn take_node(&mut self, level: usize) -> Option<u32> {
        if level >= MAX_ORDER {
            return None;
        }
        if self.heads[level] != NIL {
            return Some(self.heads[level]);
        }
        let parent = self.take_node(level + 1)?;
        Some(self.split(level + 1, parent))
    }

    /// Bisect the block at `idx` (linked at `level`): both halves move to
    /// `level - 1`, and their shared pair bit is cleared — they are now
    /// symmetric, both free.
    fn split(&mut self, level: usize, idx: u32) -> u32 {
        debug_assert!(level > 0);
        let half = 1u32 << (level - 1);

        self.rem_node(level, idx);
        self.add_node(level - 1, idx);
        self.add_node(level - 1, idx + half);
        self.set_parity(level - 1, idx, false);

        idx
    }

    /// Merge check after an insertion at `level`: when the pair bit is
    /// clear both siblings are on the list, so lift them one level up and
    /// recurse.
    fn merge(&mut self, level: usize, idx: u32) {
        if level + 1 >= MAX_ORDER {
            return;
        }
        if self.parity(level, idx) {
            // Siblings differ; nothing to merge.
            return;
        }

        let block = 1u32 << level;
        let left = if (idx >> level) & 1 == 1 { idx - block } else { idx };
        let right = left + block;
        debug_assert!(u64::from(right) < self.pages);

        self.rem_node(level, left);
        self.rem_node(level, right);
        self.add_node(level + 1, left);
        debug_assert!(!self.parity(level, left));

        self.merge(level + 1, left);
    }

    fn add_node(&mut self, level: usize, idx: u32) {
        let head = self.heads[level];
        self.links[idx as usize] = Link { prev: NIL, next: head };
        if head != NIL {
            self.links[head as usize].prev = idx;
        }
        self.heads[level] = idx;
        self.flip_parity(level, idx);
    }

    fn rem_node(&mut self, level: usize, idx: u32) {
        let Link { prev, next } = self.links[idx as usize];
        if prev == NIL {
            debug_assert_eq!(self.heads[level], idx, "unlinking a node not in its list");
            self.heads[level] = next;
        } else {
            self.links[prev as usize].next = next;
        }
        if next != NIL {
            self.links[next as usize].prev = prev;
        }
        self.flip_parity(level, idx);
    }

    /// Bit index for the buddy pair containing page `idx` at `level`.
    fn pair_bit(&self, level: usize, idx: u32) -> usize {
        let row = (idx >> level) as usize;
        self.bit_base[level] + (row >> 1)
    }

    fn parity(&self, level: usize, idx: u32) -> bool {
        let bit = self.pair_bit(level, idx);
        self.parity[bit / 64] >> (bit % 64) & 1 == 1
    }

    fn flip_parity(&mut self, level: usize, idx: u32) {
        let bit = self.pair_bit(level, idx);
        self.parity[bit / 64] ^= 1 << (bit % 64);
    }

    fn set_parity(&mut self, level: usize, idx: u32, value: bool) {
        let bit = self.pair_bit(level, idx);
        if value {
            self.parity[bit / 64] |= 1 << (bit % 64);
        } else {
            self.parity[bit / 64] &= !(1 << (bit % 64));
        }
    }

    #[cfg(test)]
    fn blocks_at_level(&self, level: usize) -> usize {
        let mut n = 0;
        let mut idx = self.heads[level];
        while idx != NIL {
            n += 1;
            idx = self.links[idx as usize].next;
        }
        n
    }
}

/// Smallest level whose blocks cover `page_count` pages.
fn level_for(page_count: u64) -> usize {
    page_count.next_power_of_two().trailing_zeros() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(pages: u64) -> BuddyChunk {
        BuddyChunk::new(PhysicalAddress::zero(), pages)
    }

    #[test]
    fn seeded_with_binary_decomposition() {
        // 13 = 8 + 4 + 1
        let c = chunk(13);
        assert_eq!(c.blocks_at_level(3), 1);
        assert_eq!(c.blocks_at_level(2), 1);
        assert_eq!(c.blocks_at_level(0), 1);
        assert_eq!(c.free_page_count(), 13);
    }

    #[test]
    fn split_produces_two_children() {
        let mut c = chunk(8);
        // Allocating one page forces splits 8 -> 4+4 -> 2+2 -> 1+1.
        let pa = c.alloc_pages(1).unwrap();
        assert_eq!(pa, PhysicalAddress::zero());
        assert_eq!(c.blocks_at_level(2), 1);
        assert_eq!(c.blocks_at_level(1), 1);
        assert_eq!(c.blocks_at_level(0), 1);
        assert_eq!(c.free_page_count(), 7);
    }

    #[test]
    fn freeing_both_buddies_merges_to_parent() {
        let mut c = chunk(4);
        let a = c.alloc_pages(1).unwrap();
        let b = c.alloc_pages(1).unwrap();
        assert_eq!(c.free_page_count(), 2);

        c.free_pages(a, 1);
        assert_eq!(c.blocks_at_level(0), 1, "one lone child, no merge yet");

        c.free_pages(b, 1);
        // The pair merged away and cascaded back to the full block.
        assert_eq!(c.blocks_at_level(0), 0);
        assert_eq!(c.blocks_at_level(1), 0);
        assert_eq!(c.blocks_at_level(2), 1);
        assert_eq!(c.free_page_count(), 4);
    }

    #[test]
    fn lone_trailing_block_never_merges() {
        // 5 pages: a 4-block plus a trailing single with no real buddy.
        let mut c = chunk(5);
        let pa = c.alloc_pages(1).unwrap();
        assert_eq!(pa.as_u64(), 4 * PAGE_SIZE, "level-0 list served first");
        c.free_pages(pa, 1);
        assert_eq!(c.free_page_count(), 5);
        assert_eq!(c.blocks_at_level(0), 1);
        assert_eq!(c.blocks_at_level(2), 1);
    }

    #[test]
    fn addresses_are_block_aligned() {
        let mut c = chunk(64);
        let pa = c.alloc_pages(16).unwrap();
        assert_eq!(pa.as_u64() % (16 * PAGE_SIZE), 0);
        let pa2 = c.alloc_pages(16).unwrap();
        assert_eq!(pa2.as_u64() % (16 * PAGE_SIZE), 0);
        assert_ne!(pa, pa2);
    }

    #[test]
    fn alloc_free_alloc_reuses_memory() {
        let mut c = chunk(16);
        let a = c.alloc_pages(16).unwrap();
        assert_eq!(c.alloc_pages(1), None);
        c.free_pages(a, 16);
        assert_eq!(c.alloc_pages(16), Some(a));
    }
}
