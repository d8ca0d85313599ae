//! # Kernel Core
//!
//! Ties the subsystems together into one bootable machine: physical RAM
//! and the boot memory map ([`kernel_pmem`]), the buddy frame allocator
//! ([`kernel_frame_alloc`]), slab-backed bookkeeping
//! ([`kernel_object_alloc`]), per-task page tables with on-demand paging
//! ([`kernel_vmem`]) and the round-robin scheduler with its syscall
//! layer ([`kernel_sched`]).
//!
//! The [`Kernel`] owns all of it behind a single mutable boundary with
//! an init-once, no-teardown lifecycle: [`Kernel::boot`] ingests the
//! memory map with interrupts masked, tasks are spawned into the table,
//! and [`Kernel::run`] enables interrupts and drives the scheduler loop
//! until no task can ever run again. One timer tick is delivered per
//! executed user operation, and while the table holds only sleepers the
//! processor "halts" — time advances tick by tick without busy work.
//!
//! Unhandled faults (a page fault with no pending record, a
//! non-canonical access) dump the register frame and halt; there is no
//! process isolation to fall back on.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod config;
mod machine;

pub use crate::config::KernelConfig;
pub use crate::machine::{Kernel, SpawnError};
