use core::fmt;
use kernel_addresses::VirtualAddress;

/// Saved register state captured when control enters the kernel.
///
/// Syscall convention: number in `rax`, arguments in `rdi` and `rsi`,
/// result written back into `rax` (negative values are error numbers).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[allow(missing_docs)]
pub struct TrapFrame {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

impl TrapFrame {
    /// Write a syscall result into the return slot.
    #[inline]
    pub const fn set_return(&mut self, value: i64) {
        self.rax = value as u64;
    }

    /// Read the return slot as a signed result.
    #[inline]
    #[must_use]
    pub const fn return_value(&self) -> i64 {
        self.rax as i64
    }
}

/// Diagnostic register dump emitted before halting on an unhandled fault.
pub struct FaultDump<'a> {
    pub frame: &'a TrapFrame,
    /// Faulting address, when the fault carries one (page faults).
    pub addr: Option<VirtualAddress>,
}

impl fmt::Display for FaultDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = self.frame;
        writeln!(f, "unhandled fault")?;
        if let Some(addr) = self.addr {
            writeln!(f, "  fault address: {addr:?}")?;
        }
        writeln!(f, "  rip={:#018x} rsp={:#018x} rflags={:#018x}", t.rip, t.rsp, t.rflags)?;
        writeln!(f, "  rax={:#018x} rbx={:#018x} rcx={:#018x}", t.rax, t.rbx, t.rcx)?;
        writeln!(f, "  rdx={:#018x} rsi={:#018x} rdi={:#018x}", t.rdx, t.rsi, t.rdi)?;
        writeln!(f, "  rbp={:#018x} r8 ={:#018x} r9 ={:#018x}", t.rbp, t.r8, t.r9)?;
        writeln!(f, "  r10={:#018x} r11={:#018x} r12={:#018x}", t.r10, t.r11, t.r12)?;
        write!(f, "  r13={:#018x} r14={:#018x} r15={:#018x}", t.r13, t.r14, t.r15)
    }
}
