use crate::{Pid, TrapFrame};
use alloc::vec::Vec;
use kernel_addresses::VirtualAddress;
use kernel_vmem::AddressSpace;

/// Lifecycle state of a task-table slot.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TaskState {
    /// Slot is vacant.
    #[default]
    Unallocated,
    /// Ready to run (or currently running).
    Runnable,
    /// Sleeping until its tick counter drains.
    Waiting,
    /// Exited; holds its exit code until reaped.
    Zombie,
}

/// One instruction of a user program.
///
/// User code is modeled as a list of operations the machine loop
/// interprets one per timer tick; the saved "program counter" is the
/// index of the next operation. A blocked operation (a `wait` on a live
/// task) re-executes on every dispatch until it completes, which is what
/// the original busy-yield loop looks like from the outside.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UserOp {
    /// Burn one slice of work.
    Compute,
    /// Store `value` to virtual memory, faulting lazy pages in.
    Store { addr: VirtualAddress, value: u64 },
    /// Load from virtual memory into `rbx`.
    Load { addr: VirtualAddress },
    /// Trap into the kernel.
    Syscall { number: u64, arg0: u64, arg1: u64 },
}

/// A user program: the instruction list a task executes.
pub type Program = Vec<UserOp>;

/// Resume point of a suspended task: next instruction plus saved
/// registers.
#[derive(Clone, Debug, Default)]
pub struct TaskContext {
    pub pc: usize,
    pub frame: TrapFrame,
}

/// One task-table slot.
#[derive(Default)]
pub struct Task {
    pub state: TaskState,
    /// Slice ticks left while `Runnable`, wake-up ticks while `Waiting`.
    pub ticks: u64,
    pub exit_code: i64,
    pub context: TaskContext,
    pub program: Program,
    /// Every allocated task owns exactly one address space; `None` only
    /// for vacant slots (and transiently while the kernel operates on
    /// it).
    pub space: Option<AddressSpace>,
}

impl Task {
    /// Whether this task has run out of program to execute.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.context.pc >= self.program.len()
    }

    /// Next instruction, if any.
    #[must_use]
    pub fn current_op(&self) -> Option<UserOp> {
        self.program.get(self.context.pc).copied()
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("state", &self.state)
            .field("ticks", &self.ticks)
            .field("exit_code", &self.exit_code)
            .field("pc", &self.context.pc)
            .finish_non_exhaustive()
    }
}

/// Convenience constructors for the [`UserOp`] syscall shorthand used all
/// over tests and demo programs.
impl UserOp {
    #[must_use]
    pub const fn sleep(ms: u64) -> Self {
        Self::Syscall { number: crate::syscall::SYS_SLEEP, arg0: ms, arg1: 0 }
    }

    #[must_use]
    pub const fn exit(code: u64) -> Self {
        Self::Syscall { number: crate::syscall::SYS_EXIT, arg0: code, arg1: 0 }
    }

    #[must_use]
    pub const fn wait(pid: Pid, status: VirtualAddress) -> Self {
        Self::Syscall {
            number: crate::syscall::SYS_WAIT,
            arg0: pid.index() as u64,
            arg1: status.as_u64(),
        }
    }

    #[must_use]
    pub const fn getpid() -> Self {
        Self::Syscall { number: crate::syscall::SYS_GETPID, arg0: 0, arg1: 0 }
    }

    #[must_use]
    pub const fn fork() -> Self {
        Self::Syscall { number: crate::syscall::SYS_FORK, arg0: 0, arg1: 0 }
    }
}
