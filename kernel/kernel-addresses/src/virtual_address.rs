use crate::{PageSize, align_down};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address.
///
/// Carries the *kind* of address at the type level so virtual and physical
/// values cannot be mixed. Construction does not validate canonicality;
/// consumers that walk page tables check [`is_canonical`](Self::is_canonical)
/// first and reject the address with an invalid-address error otherwise.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    /// Number of meaningful bits in a 4-level translated address.
    pub const WIDTH: u32 = 48;

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

    /// Whether bits 63..48 are a sign extension of bit 47.
    ///
    /// The MMU rejects non-canonical addresses outright, so every walk
    /// starts with this check.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let high = self.0 >> (Self::WIDTH - 1); // bit 47 and everything above
        high == 0 || high == (1 << (65 - Self::WIDTH)) - 1
    }

    /// Index into the PML4 (bits `[47:39]`).
    #[inline]
    #[must_use]
    pub const fn pml4_index(self) -> usize {
        ((self.0 >> 39) & 0x1ff) as usize
    }

    /// Index into the PDPT (bits `[38:30]`).
    #[inline]
    #[must_use]
    pub const fn pdpt_index(self) -> usize {
        ((self.0 >> 30) & 0x1ff) as usize
    }

    /// Index into the PD (bits `[29:21]`).
    #[inline]
    #[must_use]
    pub const fn pd_index(self) -> usize {
        ((self.0 >> 21) & 0x1ff) as usize
    }

    /// Index into the PT (bits `[20:12]`).
    #[inline]
    #[must_use]
    pub const fn pt_index(self) -> usize {
        ((self.0 >> 12) & 0x1ff) as usize
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
    pub const fn offset<S: PageSize>(self) -> u64 {
        self.0 & (S::SIZE - 1)
    }

    /// Whether this address is aligned to `S`.
    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.offset::<S>() == 0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}
