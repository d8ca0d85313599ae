use alloc::vec::Vec;
use kernel_addresses::{PAGE_SIZE, PhysicalAddress, align_down, align_up};

/// Classification of a boot-reported physical region.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    /// Usable RAM.
    Ram,
    /// ACPI tables; reclaimable after parsing, treated as unusable here.
    AcpiReclaimable,
    /// Firmware/device memory, never usable.
    Reserved,
}

/// One contiguous physical region as reported by the boot collaborator.
#[derive(Copy, Clone, Debug)]
pub struct PhysRegion {
    pub base: PhysicalAddress,
    pub len: u64,
    pub kind: RegionKind,
}

impl PhysRegion {
    #[inline]
    #[must_use]
    pub const fn new(base: PhysicalAddress, len: u64, kind: RegionKind) -> Self {
        Self { base, len, kind }
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.as_u64() + self.len
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        self.base <= pa && pa.as_u64() < self.end()
    }
}

/// Everything the frame allocator needs to know about the machine's RAM.
///
/// Built once during bring-up from firmware data plus the linker-known
/// kernel image extent, then consumed exactly once by frame-allocator
/// initialization.
#[derive(Default)]
pub struct BootMemoryMap {
    regions: Vec<PhysRegion>,
    reserved: Vec<PhysRegion>,
}

impl BootMemoryMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a firmware-reported region.
    pub fn push_region(&mut self, region: PhysRegion) {
        self.regions.push(region);
    }

    /// Mark an address range as occupied by the kernel image or boot
    /// structures. The range is widened outward to page boundaries.
    pub fn reserve(&mut self, base: PhysicalAddress, len: u64) {
        let start = align_down(base.as_u64(), PAGE_SIZE);
        let end = align_up(base.as_u64() + len, PAGE_SIZE);
        self.reserved.push(PhysRegion::new(
            PhysicalAddress::new(start),
            end - start,
            RegionKind::Reserved,
        ));
        log::debug!("boot map: reserved [{start:#x}, {end:#x})");
    }

    /// Usable RAM regions in report order.
    pub fn ram_regions(&self) -> impl Iterator<Item = &PhysRegion> {
        self.regions.iter().filter(|r| r.kind == RegionKind::Ram)
    }

    /// Whether the frame at `pa` overlaps any reserved range.
    #[must_use]
    pub fn is_reserved(&self, pa: PhysicalAddress) -> bool {
        self.reserved.iter().any(|r| r.contains(pa))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_widens_to_page_boundaries() {
        let mut map = BootMemoryMap::new();
        map.reserve(PhysicalAddress::new(0x1800), 0x100);
        assert!(map.is_reserved(PhysicalAddress::new(0x1000)));
        assert!(map.is_reserved(PhysicalAddress::new(0x1fff)));
        assert!(!map.is_reserved(PhysicalAddress::new(0x2000)));
    }

    #[test]
    fn ram_filter_skips_reserved_kinds() {
        let mut map = BootMemoryMap::new();
        map.push_region(PhysRegion::new(PhysicalAddress::zero(), 0x10000, RegionKind::Ram));
        map.push_region(PhysRegion::new(
            PhysicalAddress::new(0x10000),
            0x1000,
            RegionKind::AcpiReclaimable,
        ));
        map.push_region(PhysRegion::new(
            PhysicalAddress::new(0x11000),
            0x1000,
            RegionKind::Reserved,
        ));
        assert_eq!(map.ram_regions().count(), 1);
    }
}
