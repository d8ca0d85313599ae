use alloc::vec::Vec;
use kernel_addresses::PhysicalAddress;

/// Boot-time machine description.
///
/// Stands in for what firmware and the linker hand a real kernel: how
/// much RAM there is, where it starts, and which ranges are already
/// spoken for (kernel image, boot structures).
#[derive(Clone, Debug)]
pub struct KernelConfig {
    /// Physical base of RAM; page-aligned.
    pub ram_base: PhysicalAddress,
    /// RAM size in bytes; page-aligned.
    pub ram_size: u64,
    /// `(base, len)` ranges excluded from the frame allocator.
    pub reserved: Vec<(PhysicalAddress, u64)>,
}

impl KernelConfig {
    /// 16 MiB of RAM at the 1 MiB mark, nothing reserved.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ram_base: PhysicalAddress::new(0x10_0000),
            ram_size: 16 * 1024 * 1024,
            reserved: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_ram_size(mut self, bytes: u64) -> Self {
        self.ram_size = bytes;
        self
    }

    #[must_use]
    pub fn with_reserved(mut self, base: PhysicalAddress, len: u64) -> Self {
        self.reserved.push((base, len));
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
