use crate::entry::{EntryFlags, MapFlags, PageTableEntry};
use crate::records::{self, Area, NIL, PendingPage, VmObjects};
use crate::{CloneUnsupported, MapError, TranslateError};
use alloc::vec::Vec;
use kernel_addresses::{
    PAGE_SIZE, PhysicalAddress, Size1G, Size2M, Size4K, VirtualAddress,
};
use kernel_frame_alloc::FrameAllocator;
use kernel_object_alloc::ObjHandle;
use kernel_pmem::PhysMemory;

/// Flags on intermediate table entries. Permissions are enforced at the
/// leaf; inner nodes stay permissive so they never mask a leaf's flags.
const TABLE_FLAGS: EntryFlags = EntryFlags::PRESENT
    .union(EntryFlags::WRITABLE)
    .union(EntryFlags::USER_ACCESSIBLE);

/// One task's view of memory: a root table frame, the table frames
/// hanging off it, and the bookkeeping lists for committed and pending
/// ranges.
///
/// Every operation takes the backing [`PhysMemory`] and the
/// [`FrameAllocator`] explicitly; the address space holds no global
/// state.
#[derive(Debug)]
pub struct AddressSpace {
    root: PhysicalAddress,
    /// Physical address of the first area record, [`NIL`]-terminated.
    area_head: u64,
    /// Physical address of the first pending-page record.
    pending_head: u64,
    /// Every intermediate table frame ever allocated, for teardown.
    table_frames: Vec<PhysicalAddress>,
}

impl AddressSpace {
    /// Allocate and zero a root table frame.
    pub fn new(
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
    ) -> Result<Self, MapError> {
        let root = frames.alloc_one().ok_or(MapError::OutOfMemory)?;
        mem.zero_frame(root);
        Ok(Self {
            root,
            area_head: NIL,
            pending_head: NIL,
            table_frames: Vec::new(),
        })
    }

    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    /// Install a 4 KiB mapping `va -> pa`, creating intermediate tables
    /// as needed.
    pub fn map(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        if !va.is_canonical() {
            return Err(MapError::NonCanonical(va));
        }
        assert!(va.is_aligned::<Size4K>(), "mapping unaligned {va:?}");
        assert!(pa.is_frame_aligned(), "mapping to unaligned {pa:?}");

        let pdpt = self.ensure_next_table(mem, frames, self.root, va.pml4_index())?;
        let pd = self.ensure_next_table(mem, frames, pdpt, va.pdpt_index())?;
        let pt = self.ensure_next_table(mem, frames, pd, va.pd_index())?;
        set_entry(mem, pt, va.pt_index(), PageTableEntry::new(pa, flags.into()));
        Ok(())
    }

    /// Install a 2 MiB huge mapping directly at the PD level.
    pub fn map_huge_2m(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        if !va.is_canonical() {
            return Err(MapError::NonCanonical(va));
        }
        assert!(va.is_aligned::<Size2M>(), "2 MiB mapping at unaligned {va:?}");
        assert!(pa.is_aligned::<Size2M>(), "2 MiB mapping to unaligned {pa:?}");

        let pdpt = self.ensure_next_table(mem, frames, self.root, va.pml4_index())?;
        let pd = self.ensure_next_table(mem, frames, pdpt, va.pdpt_index())?;
        self.install_huge(mem, pd, va.pd_index(), pa, flags);
        Ok(())
    }

    /// Install a 1 GiB huge mapping directly at the PDPT level.
    pub fn map_huge_1g(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        if !va.is_canonical() {
            return Err(MapError::NonCanonical(va));
        }
        assert!(va.is_aligned::<Size1G>(), "1 GiB mapping at unaligned {va:?}");
        assert!(pa.is_aligned::<Size1G>(), "1 GiB mapping to unaligned {pa:?}");

        let pdpt = self.ensure_next_table(mem, frames, self.root, va.pml4_index())?;
        self.install_huge(mem, pdpt, va.pdpt_index(), pa, flags);
        Ok(())
    }

    /// Resolve `va` through the tables, honoring huge-page leaves.
    pub fn translate(
        &self,
        mem: &impl PhysMemory,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, TranslateError> {
        if !va.is_canonical() {
            return Err(TranslateError::NonCanonical(va));
        }
        let not_mapped = TranslateError::NotMapped(va);

        let e4 = entry(mem, self.root, va.pml4_index());
        if !e4.is_present() {
            return Err(not_mapped);
        }
        let e3 = entry(mem, e4.address(), va.pdpt_index());
        if !e3.is_present() {
            return Err(not_mapped);
        }
        if e3.is_huge() {
            return Ok(e3.address() + va.offset::<Size1G>());
        }
        let e2 = entry(mem, e3.address(), va.pd_index());
        if !e2.is_present() {
            return Err(not_mapped);
        }
        if e2.is_huge() {
            return Ok(e2.address() + va.offset::<Size2M>());
        }
        let e1 = entry(mem, e2.address(), va.pt_index());
        if !e1.is_present() {
            return Err(not_mapped);
        }
        Ok(e1.address() + va.offset::<Size4K>())
    }

    /// Register `pages` lazily-backed pages starting at `base`.
    ///
    /// No frame is touched now; each page gets a pending record consumed
    /// by [`handle_fault`](Self::handle_fault) on first access. Record
    /// exhaustion rolls the registration back and reports out-of-memory.
    pub fn alloc_pages(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        objs: &mut VmObjects,
        base: VirtualAddress,
        pages: u64,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        if !base.is_canonical() {
            return Err(MapError::NonCanonical(base));
        }
        assert!(base.is_aligned::<Size4K>(), "area base unaligned: {base:?}");
        if pages == 0 {
            return Ok(());
        }
        self.assert_no_overlap(mem, base, pages);

        for i in 0..pages {
            let page = base + i * PAGE_SIZE;
            let Some(slot) = objs.pending.allocate(frames, mem) else {
                self.pop_pending(mem, objs, i);
                return Err(MapError::OutOfMemory);
            };
            let node = slot.address();
            records::write_pending(mem, node, &PendingPage { page, flags });
            records::set_next(mem, node, self.pending_head);
            self.pending_head = node.as_u64();
        }

        let Some(slot) = objs.areas.allocate(frames, mem) else {
            self.pop_pending(mem, objs, pages);
            return Err(MapError::OutOfMemory);
        };
        let node = slot.address();
        records::write_area(mem, node, &Area { base, pages, flags });
        records::set_next(mem, node, self.area_head);
        self.area_head = node.as_u64();

        log::trace!("lazy area: {pages} pages at {base:?}");
        Ok(())
    }

    /// Resolve a page fault at `addr`.
    ///
    /// Returns `true` when a pending record covered the faulting page and
    /// a fresh zeroed frame is now mapped there; `false` tells the caller
    /// to escalate to a fatal fault report. A page faults successfully at
    /// most once — the record is consumed by resolution.
    pub fn handle_fault(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        objs: &mut VmObjects,
        addr: VirtualAddress,
    ) -> bool {
        let page = addr.page_base::<Size4K>();

        // Find the record and its predecessor.
        let mut prev: Option<PhysicalAddress> = None;
        let mut node = self.pending_head;
        let (prev, node, rec) = loop {
            if node == NIL {
                return false;
            }
            let pa = PhysicalAddress::new(node);
            let rec = records::read_pending(mem, pa);
            if rec.page == page {
                break (prev, pa, rec);
            }
            prev = Some(pa);
            node = records::next(mem, pa);
        };

        let Some(frame) = frames.alloc_one() else {
            log::error!("fault at {addr:?}: no frame available");
            return false;
        };
        mem.zero_frame(frame);
        if let Err(err) = self.map(mem, frames, page, frame, rec.flags) {
            log::error!("fault at {addr:?}: {err}");
            frames.free_one(frame);
            return false;
        }

        // Unlink and release the consumed record.
        let next = records::next(mem, node);
        match prev {
            Some(p) => records::set_next(mem, p, next),
            None => self.pending_head = next,
        }
        objs.pending.free(mem, ObjHandle::from_address(node));

        log::trace!("fault at {addr:?} backed by {frame:?}");
        true
    }

    /// Tear down a previously registered area: committed frames go back
    /// to the frame allocator, pending records are dropped unmapped.
    ///
    /// `base`/`pages` must name an area exactly as registered.
    pub fn free_pages(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        objs: &mut VmObjects,
        base: VirtualAddress,
        pages: u64,
    ) {
        let area = self
            .take_area(mem, objs, |a| a.base == base && a.pages == pages)
            .unwrap_or_else(|| panic!("freeing unregistered range at {base:?}"));

        for i in 0..area.pages {
            let page = area.base + i * PAGE_SIZE;
            if self.take_pending(mem, objs, page) {
                continue;
            }
            self.release_leaf(mem, frames, page);
        }
    }

    /// Release everything this address space owns: committed frames,
    /// bookkeeping records, and finally every table frame and the root.
    pub fn destroy(
        mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        objs: &mut VmObjects,
    ) {
        while let Some(area) = self.take_area(mem, objs, |_| true) {
            for i in 0..area.pages {
                let page = area.base + i * PAGE_SIZE;
                if self.take_pending(mem, objs, page) {
                    continue;
                }
                self.release_leaf(mem, frames, page);
            }
        }
        debug_assert_eq!(self.pending_head, NIL, "pending record without an area");

        for table in self.table_frames.drain(..) {
            frames.free_one(table);
        }
        frames.free_one(self.root);
    }

    /// Whether `[va, va + size)` lies entirely within user-flagged areas.
    pub fn is_user_accessible(
        &self,
        mem: &impl PhysMemory,
        va: VirtualAddress,
        size: u64,
    ) -> bool {
        if !va.is_canonical() {
            return false;
        }
        if size == 0 {
            return true;
        }
        let mut page = va.page_base::<Size4K>();
        let end = va.as_u64() + size;
        while page.as_u64() < end {
            if !self.page_in_user_area(mem, page) {
                return false;
            }
            page += PAGE_SIZE;
        }
        true
    }

    /// Cloning hook for a future `fork`.
    pub fn try_clone(&self) -> Result<Self, CloneUnsupported> {
        Err(CloneUnsupported)
    }
}

impl AddressSpace {
    /// Follow (or create) the table below `table[index]`.
    ///
    /// Running into a huge-page leaf here means a 4 KiB mapping is being
    /// pushed into a range already covered by a huge page; that is fatal.
    fn ensure_next_table(
        &mut self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        table: PhysicalAddress,
        index: usize,
    ) -> Result<PhysicalAddress, MapError> {
        let e = entry(mem, table, index);
        if e.is_present() {
            assert!(
                !e.is_huge(),
                "table walk hit a huge-page leaf at {table:?}[{index}]"
            );
            return Ok(e.address());
        }
        let frame = frames.alloc_one().ok_or(MapError::OutOfMemory)?;
        mem.zero_frame(frame);
        set_entry(mem, table, index, PageTableEntry::new(frame, TABLE_FLAGS));
        self.table_frames.push(frame);
        Ok(frame)
    }

    /// Write a huge-page leaf into `table[index]`; the slot must be empty.
    fn install_huge(
        &self,
        mem: &mut impl PhysMemory,
        table: PhysicalAddress,
        index: usize,
        pa: PhysicalAddress,
        flags: MapFlags,
    ) {
        let existing = entry(mem, table, index);
        assert!(
            !existing.is_present(),
            "huge page would clobber occupied slot {table:?}[{index}]"
        );
        let flags = EntryFlags::from(flags) | EntryFlags::HUGE_PAGE;
        set_entry(mem, table, index, PageTableEntry::new(pa, flags));
    }

    /// If `page` has a 4 KiB leaf installed, clear it and free the frame.
    fn release_leaf(
        &self,
        mem: &mut impl PhysMemory,
        frames: &mut FrameAllocator,
        page: VirtualAddress,
    ) {
        let e4 = entry(mem, self.root, page.pml4_index());
        if !e4.is_present() {
            return;
        }
        let e3 = entry(mem, e4.address(), page.pdpt_index());
        if !e3.is_present() || e3.is_huge() {
            return;
        }
        let e2 = entry(mem, e3.address(), page.pd_index());
        if !e2.is_present() || e2.is_huge() {
            return;
        }
        let e1 = entry(mem, e2.address(), page.pt_index());
        if !e1.is_present() {
            return;
        }
        set_entry(mem, e2.address(), page.pt_index(), PageTableEntry::default());
        frames.free_one(e1.address());
    }

    fn assert_no_overlap(&self, mem: &impl PhysMemory, base: VirtualAddress, pages: u64) {
        let mut node = self.area_head;
        while node != NIL {
            let pa = PhysicalAddress::new(node);
            let area = records::read_area(mem, pa);
            assert!(
                !area.overlaps(base, pages),
                "area at {base:?} overlaps existing area at {:?}",
                area.base
            );
            node = records::next(mem, pa);
        }
    }

    fn page_in_user_area(&self, mem: &impl PhysMemory, page: VirtualAddress) -> bool {
        let mut node = self.area_head;
        while node != NIL {
            let pa = PhysicalAddress::new(node);
            let area = records::read_area(mem, pa);
            if area.contains(page) {
                return area.flags.contains(MapFlags::USER);
            }
            node = records::next(mem, pa);
        }
        false
    }

    /// Unlink and release the first area matching `pick`.
    fn take_area(
        &mut self,
        mem: &mut impl PhysMemory,
        objs: &mut VmObjects,
        pick: impl Fn(&Area) -> bool,
    ) -> Option<Area> {
        let mut prev: Option<PhysicalAddress> = None;
        let mut node = self.area_head;
        while node != NIL {
            let pa = PhysicalAddress::new(node);
            let area = records::read_area(mem, pa);
            if pick(&area) {
                let next = records::next(mem, pa);
                match prev {
                    Some(p) => records::set_next(mem, p, next),
                    None => self.area_head = next,
                }
                objs.areas.free(mem, ObjHandle::from_address(pa));
                return Some(area);
            }
            prev = Some(pa);
            node = records::next(mem, pa);
        }
        None
    }

    /// Unlink and release the pending record for `page`, if any.
    fn take_pending(
        &mut self,
        mem: &mut impl PhysMemory,
        objs: &mut VmObjects,
        page: VirtualAddress,
    ) -> bool {
        let mut prev: Option<PhysicalAddress> = None;
        let mut node = self.pending_head;
        while node != NIL {
            let pa = PhysicalAddress::new(node);
            let rec = records::read_pending(mem, pa);
            if rec.page == page {
                let next = records::next(mem, pa);
                match prev {
                    Some(p) => records::set_next(mem, p, next),
                    None => self.pending_head = next,
                }
                objs.pending.free(mem, ObjHandle::from_address(pa));
                return true;
            }
            prev = Some(pa);
            node = records::next(mem, pa);
        }
        false
    }

    /// Drop the `n` most recently added pending records (rollback path).
    fn pop_pending(&mut self, mem: &mut impl PhysMemory, objs: &mut VmObjects, n: u64) {
        for _ in 0..n {
            debug_assert_ne!(self.pending_head, NIL);
            let pa = PhysicalAddress::new(self.pending_head);
            self.pending_head = records::next(mem, pa);
            objs.pending.free(mem, ObjHandle::from_address(pa));
        }
    }
}

fn entry(mem: &impl PhysMemory, table: PhysicalAddress, index: usize) -> PageTableEntry {
    PageTableEntry::from_raw(mem.read_u64(table + (index as u64 * 8)))
}

fn set_entry(
    mem: &mut impl PhysMemory,
    table: PhysicalAddress,
    index: usize,
    entry: PageTableEntry,
) {
    mem.write_u64(table + (index as u64 * 8), entry.raw());
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_addresses::PageSize;
    use kernel_pmem::{BootMemoryMap, LinearRam, PhysRegion, RegionKind};

    struct Machine {
        ram: LinearRam,
        frames: FrameAllocator,
        objs: VmObjects,
    }

    fn machine(pages: u64) -> Machine {
        let base = PhysicalAddress::new(0x100_0000);
        let mut map = BootMemoryMap::new();
        map.push_region(PhysRegion::new(base, pages * PAGE_SIZE, RegionKind::Ram));
        let mut frames = FrameAllocator::new();
        frames.init(&map);
        Machine {
            ram: LinearRam::new(base, pages * PAGE_SIZE),
            frames,
            objs: VmObjects::new(),
        }
    }

    #[test]
    fn map_then_translate_roundtrip() {
        let mut m = machine(32);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let va = VirtualAddress::new(0x40_0000_0000);
        let pa = PhysicalAddress::new(0x100_5000);

        space
            .map(&mut m.ram, &mut m.frames, va, pa, MapFlags::WRITE | MapFlags::USER)
            .unwrap();
        assert_eq!(space.translate(&m.ram, va), Ok(pa));
        assert_eq!(space.translate(&m.ram, va + 0x123), Ok(pa + 0x123));
    }

    #[test]
    fn unmapped_and_noncanonical_addresses_fail_translation() {
        let mut m = machine(8);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();

        let va = VirtualAddress::new(0x1000);
        assert_eq!(space.translate(&m.ram, va), Err(TranslateError::NotMapped(va)));

        let bad = VirtualAddress::new(0x0000_8000_0000_0000);
        assert_eq!(
            space.translate(&m.ram, bad),
            Err(TranslateError::NonCanonical(bad))
        );
        assert_eq!(
            space.map(&mut m.ram, &mut m.frames, bad, PhysicalAddress::zero(), MapFlags::empty()),
            Err(MapError::NonCanonical(bad))
        );
    }

    #[test]
    fn huge_2m_translates_across_the_page() {
        let mut m = machine(16);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let va = VirtualAddress::new(3 * Size2M::SIZE);
        let pa = PhysicalAddress::new(5 * Size2M::SIZE);

        space
            .map_huge_2m(&mut m.ram, &mut m.frames, va, pa, MapFlags::WRITE)
            .unwrap();
        for off in [0u64, 0x1234, Size2M::SIZE - 1] {
            assert_eq!(space.translate(&m.ram, va + off), Ok(pa + off));
        }
    }

    #[test]
    fn huge_1g_translates_with_full_offset() {
        let mut m = machine(16);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let va = VirtualAddress::new(Size1G::SIZE);
        let pa = PhysicalAddress::new(2 * Size1G::SIZE);

        space
            .map_huge_1g(&mut m.ram, &mut m.frames, va, pa, MapFlags::empty())
            .unwrap();
        let off = 0x1f2_3456;
        assert_eq!(space.translate(&m.ram, va + off), Ok(pa + off));
    }

    #[test]
    #[should_panic(expected = "huge-page leaf")]
    fn small_mapping_under_a_huge_page_is_fatal() {
        let mut m = machine(16);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let va = VirtualAddress::new(Size2M::SIZE);
        space
            .map_huge_2m(&mut m.ram, &mut m.frames, va, PhysicalAddress::new(Size2M::SIZE), MapFlags::empty())
            .unwrap();
        let _ = space.map(
            &mut m.ram,
            &mut m.frames,
            va + PAGE_SIZE,
            PhysicalAddress::new(0x100_3000),
            MapFlags::empty(),
        );
    }

    #[test]
    #[should_panic(expected = "clobber occupied slot")]
    fn huge_page_over_existing_tables_is_fatal() {
        let mut m = machine(16);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let va = VirtualAddress::new(Size2M::SIZE);
        space
            .map(&mut m.ram, &mut m.frames, va, PhysicalAddress::new(0x100_3000), MapFlags::empty())
            .unwrap();
        let _ = space.map_huge_2m(
            &mut m.ram,
            &mut m.frames,
            va,
            PhysicalAddress::new(Size2M::SIZE),
            MapFlags::empty(),
        );
    }

    #[test]
    fn lazy_pages_fault_in_exactly_once() {
        let mut m = machine(64);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let base = VirtualAddress::new(0x7000_0000);
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, base, 4, MapFlags::WRITE | MapFlags::USER)
            .unwrap();

        // Nothing mapped yet.
        assert!(space.translate(&m.ram, base).is_err());

        let before = m.frames.free_pages();
        let fault_addr = base + PAGE_SIZE + 0x42;
        assert!(space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, fault_addr));

        // Exactly one frame was committed (tables for this range existed
        // after the walk; count them via the delta).
        let committed = before - m.frames.free_pages();
        assert!(committed >= 1, "fault must commit a frame");
        let pa = space.translate(&m.ram, base + PAGE_SIZE).unwrap();
        assert!(pa.is_frame_aligned());

        // Second fault at the same page: record consumed, unhandled.
        assert!(!space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, fault_addr));
        // Other pages of the area still fault fine.
        assert!(space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, base));
    }

    #[test]
    fn fault_outside_any_area_is_unhandled() {
        let mut m = machine(16);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        assert!(!space.handle_fault(
            &mut m.ram,
            &mut m.frames,
            &mut m.objs,
            VirtualAddress::new(0xdead_b000)
        ));
    }

    #[test]
    fn faulted_frames_are_zeroed() {
        let mut m = machine(32);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let base = VirtualAddress::new(0x5000_0000);

        // Dirty every frame the fault could pick.
        let dirty = m.frames.alloc_one().unwrap();
        m.ram.write_u64(dirty, 0xffff_ffff_ffff_ffff);
        m.frames.free_one(dirty);

        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, base, 1, MapFlags::WRITE)
            .unwrap();
        assert!(space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, base));
        let pa = space.translate(&m.ram, base).unwrap();
        assert_eq!(m.ram.read_u64(pa), 0);
    }

    #[test]
    #[should_panic(expected = "overlaps existing area")]
    fn overlapping_areas_are_fatal() {
        let mut m = machine(32);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let base = VirtualAddress::new(0x1_0000);
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, base, 4, MapFlags::empty())
            .unwrap();
        let _ = space.alloc_pages(
            &mut m.ram,
            &mut m.frames,
            &mut m.objs,
            base + 2 * PAGE_SIZE,
            4,
            MapFlags::empty(),
        );
    }

    #[test]
    fn destroy_returns_every_frame() {
        let mut m = machine(64);

        // Warm the slab caches so monotonic slab growth does not skew the
        // frame accounting below.
        {
            let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
            let base = VirtualAddress::new(0x9000_0000);
            space
                .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, base, 2, MapFlags::WRITE)
                .unwrap();
            space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, base);
            space.destroy(&mut m.ram, &mut m.frames, &mut m.objs);
        }

        let baseline = m.frames.free_pages();
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let base = VirtualAddress::new(0x9000_0000);
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, base, 3, MapFlags::WRITE)
            .unwrap();
        // Commit two of three pages; the third stays pending.
        assert!(space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, base));
        assert!(space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, base + PAGE_SIZE));

        space.destroy(&mut m.ram, &mut m.frames, &mut m.objs);
        assert_eq!(m.frames.free_pages(), baseline);
    }

    #[test]
    fn free_pages_releases_a_single_area() {
        let mut m = machine(64);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let a = VirtualAddress::new(0x10_0000);
        let b = VirtualAddress::new(0x20_0000);
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, a, 2, MapFlags::WRITE)
            .unwrap();
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, b, 2, MapFlags::WRITE)
            .unwrap();
        space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, a);

        space.free_pages(&mut m.ram, &mut m.frames, &mut m.objs, a, 2);
        // Area A is gone, area B untouched.
        assert!(!space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, a + PAGE_SIZE));
        assert!(space.handle_fault(&mut m.ram, &mut m.frames, &mut m.objs, b));
    }

    #[test]
    fn user_accessibility_follows_area_flags() {
        let mut m = machine(64);
        let mut space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        let user = VirtualAddress::new(0x10_0000);
        let kernel = VirtualAddress::new(0x20_0000);
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, user, 2, MapFlags::WRITE | MapFlags::USER)
            .unwrap();
        space
            .alloc_pages(&mut m.ram, &mut m.frames, &mut m.objs, kernel, 2, MapFlags::WRITE)
            .unwrap();

        assert!(space.is_user_accessible(&m.ram, user, 2 * PAGE_SIZE));
        assert!(space.is_user_accessible(&m.ram, user + 0x800, 8));
        // Runs off the end of the area.
        assert!(!space.is_user_accessible(&m.ram, user + PAGE_SIZE, 2 * PAGE_SIZE));
        // Kernel-only area.
        assert!(!space.is_user_accessible(&m.ram, kernel, 8));
        // Nowhere at all.
        assert!(!space.is_user_accessible(&m.ram, VirtualAddress::new(0x5000_0000), 8));
    }

    #[test]
    fn cloning_is_not_supported() {
        let mut m = machine(8);
        let space = AddressSpace::new(&mut m.ram, &mut m.frames).unwrap();
        assert_eq!(space.try_clone().unwrap_err(), CloneUnsupported);
    }
}
