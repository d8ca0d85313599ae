use bitflags::bitflags;
use kernel_addresses::PhysicalAddress;

bitflags! {
    /// Hardware page-table entry bits (x86-64).
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct EntryFlags: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER_ACCESSIBLE = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY = 1 << 6;
        /// PS bit: this PDPT/PD entry is a 1 GiB / 2 MiB leaf.
        const HUGE_PAGE = 1 << 7;
        const GLOBAL = 1 << 8;
        const NO_EXECUTE = 1 << 63;
    }
}

bitflags! {
    /// Caller-facing protection for a mapping request.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct MapFlags: u64 {
        const WRITE = 1 << 0;
        const USER = 1 << 1;
    }
}

impl From<MapFlags> for EntryFlags {
    fn from(flags: MapFlags) -> Self {
        let mut out = Self::PRESENT;
        if flags.contains(MapFlags::WRITE) {
            out |= Self::WRITABLE;
        }
        if flags.contains(MapFlags::USER) {
            out |= Self::USER_ACCESSIBLE;
        }
        out
    }
}

/// One raw 64-bit page-table entry.
///
/// Bits 51..12 hold the target frame; the rest are [`EntryFlags`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PageTableEntry(u64);

const ADDR_MASK: u64 = 0x000f_ffff_ffff_f000;

impl PageTableEntry {
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn new(target: PhysicalAddress, flags: EntryFlags) -> Self {
        debug_assert_eq!(target.as_u64() & !ADDR_MASK, 0, "target not frame-aligned");
        Self(target.as_u64() | flags.bits())
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 & ADDR_MASK)
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_huge(self) -> bool {
        self.0 & EntryFlags::HUGE_PAGE.bits() != 0
    }
}
