use crate::{PAGE_SIZE, PageSize, align_down};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Physical memory address.
///
/// Denotes host RAM (or MMIO). Carries intent at the type level and
/// prevents accidental VA↔PA mix-ups; there is no conversion to or from
/// [`VirtualAddress`](crate::VirtualAddress) other than a page-table walk.
///
/// ### Notes
/// - Frame allocators hand out page-aligned `PhysicalAddress` values;
///   page-table entries store a page-aligned base plus flag bits.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Base address of the page of size `S` containing this address.
    #[inline]
    #[must_use]
    pub const fn page_base<S: PageSize>(self) -> Self {
        Self(align_down(self.0, S::SIZE))
    }

    /// Offset of this address within its page of size `S`.
    #[inline]
    #[must_use]
    pub const fn page_offset<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }

    /// Whether this address is aligned to a 4 KiB frame boundary.
    #[inline]
    #[must_use]
    pub const fn is_frame_aligned(self) -> bool {
        self.0 % PAGE_SIZE == 0
    }

    /// Whether this address is aligned to `S`.
    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.page_offset::<S>() == 0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
