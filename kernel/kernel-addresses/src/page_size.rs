/// Marker trait for the supported x86-64 page sizes.
///
/// Implemented by [`Size4K`], [`Size2M`] and [`Size1G`]; generic helpers
/// use [`SIZE`](PageSize::SIZE) and [`SHIFT`](PageSize::SHIFT) to compute
/// bases and in-page offsets without runtime branching.
pub trait PageSize: Copy {
    /// Page size in bytes.
    const SIZE: u64;
    /// `log2(SIZE)`.
    const SHIFT: u32;
}

/// 4 KiB page (PT leaf).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Size4K;

/// 2 MiB huge page (PD leaf, `PS=1`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Size2M;

/// 1 GiB huge page (PDPT leaf, `PS=1`).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Size1G;

impl PageSize for Size4K {
    const SIZE: u64 = 4096;
    const SHIFT: u32 = 12;
}

impl PageSize for Size2M {
    const SIZE: u64 = 2 * 1024 * 1024;
    const SHIFT: u32 = 21;
}

impl PageSize for Size1G {
    const SIZE: u64 = 1024 * 1024 * 1024;
    const SHIFT: u32 = 30;
}
