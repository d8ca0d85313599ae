use crate::PhysMemory;
use alloc::vec;
use alloc::vec::Vec;
use kernel_addresses::{PAGE_SIZE, PhysicalAddress};

/// Hosted RAM: one contiguous, zero-initialized byte buffer starting at a
/// configurable physical base.
///
/// This is the machine's DRAM as far as the rest of the kernel is
/// concerned. Page tables, slabs and user pages all end up as byte ranges
/// in here; the buffer index is simply `pa - base`.
pub struct LinearRam {
    base: u64,
    bytes: Vec<u8>,
}

impl LinearRam {
    /// Create `len` bytes of RAM starting at physical address `base`.
    ///
    /// Both must be page-aligned.
    #[must_use]
    pub fn new(base: PhysicalAddress, len: u64) -> Self {
        assert!(base.is_frame_aligned(), "RAM base must be page-aligned");
        assert!(len % PAGE_SIZE == 0, "RAM size must be page-aligned");
        log::debug!("RAM: [{:#x}, {:#x})", base.as_u64(), base.as_u64() + len);
        Self {
            base: base.as_u64(),
            bytes: vec![0; usize::try_from(len).expect("RAM size exceeds host address space")],
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    fn index(&self, pa: PhysicalAddress, len: usize) -> usize {
        let off = pa
            .as_u64()
            .checked_sub(self.base)
            .unwrap_or_else(|| panic!("physical access below RAM: {pa:?}"));
        let off = usize::try_from(off).expect("physical offset exceeds host address space");
        assert!(
            off + len <= self.bytes.len(),
            "physical access past end of RAM: {pa:?}+{len}"
        );
        off
    }
}

impl PhysMemory for LinearRam {
    fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        debug_assert!(pa.as_u64() % 8 == 0, "unaligned u64 read at {pa:?}");
        let off = self.index(pa, 8);
        u64::from_le_bytes(self.bytes[off..off + 8].try_into().unwrap())
    }

    fn write_u64(&mut self, pa: PhysicalAddress, value: u64) {
        debug_assert!(pa.as_u64() % 8 == 0, "unaligned u64 write at {pa:?}");
        let off = self.index(pa, 8);
        self.bytes[off..off + 8].copy_from_slice(&value.to_le_bytes());
    }

    fn read_bytes(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        let off = self.index(pa, buf.len());
        buf.copy_from_slice(&self.bytes[off..off + buf.len()]);
    }

    fn write_bytes(&mut self, pa: PhysicalAddress, bytes: &[u8]) {
        let off = self.index(pa, bytes.len());
        self.bytes[off..off + bytes.len()].copy_from_slice(bytes);
    }

    fn zero_frame(&mut self, pa: PhysicalAddress) {
        assert!(pa.is_frame_aligned(), "zero_frame of unaligned {pa:?}");
        let off = self.index(pa, PAGE_SIZE as usize);
        self.bytes[off..off + PAGE_SIZE as usize].fill(0);
    }
}
