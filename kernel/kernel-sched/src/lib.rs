//! # Task Scheduling
//!
//! Round-robin preemptive scheduler over a fixed task table, plus the
//! syscall layer that drives task state transitions.
//!
//! The model is cooperative-with-preemption on one logical processor:
//! exactly one task context runs at a time, the scheduler loop scans the
//! table for the next `Runnable` entry, and the periodic timer tick both
//! wakes sleepers and forces a switch when the running task's slice is
//! used up. Tasks change state only through syscalls
//! ([`syscall::dispatch`]) or the timer.
//!
//! State machine:
//!
//! ```text
//! Unallocated → Runnable ⇄ Waiting
//!                   │
//!                   ▼
//!                Zombie → Unallocated   (reaped by wait)
//! ```
//!
//! Pid 0 is reserved; a zombie keeps its exit code and address space
//! until another task reaps it.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod scheduler;
pub mod syscall;
mod table;
mod task;
mod trap_frame;

pub use crate::scheduler::Scheduler;
pub use crate::table::{TableFull, TaskTable};
pub use crate::task::{Program, Task, TaskContext, TaskState, UserOp};
pub use crate::trap_frame::{FaultDump, TrapFrame};

use core::fmt;

/// Timer ticks a task may run before it is preempted.
pub const TIME_SLICE_TICKS: u64 = 10;

/// Timer interrupt frequency, used to convert sleep durations.
pub const TICKS_PER_SEC: u64 = 100;

/// Task table capacity, including the reserved slot 0.
pub const MAX_TASKS: usize = 64;

/// Task identifier; doubles as the task-table index.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(usize);

impl Pid {
    #[inline]
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kernel error numbers, returned negated through the syscall ABI.
pub mod errno {
    pub const ESRCH: i64 = 3;
    pub const ENOMEM: i64 = 12;
    pub const EFAULT: i64 = 14;
    pub const EINVAL: i64 = 22;
    pub const ENOSYS: i64 = 38;
}
