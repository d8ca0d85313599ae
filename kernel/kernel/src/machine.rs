use crate::config::KernelConfig;
use kernel_addresses::{PhysicalAddress, VirtualAddress};
use kernel_frame_alloc::FrameAllocator;
use kernel_pmem::{BootMemoryMap, LinearRam, PhysMemory, PhysRegion, RegionKind};
use kernel_sched::syscall::{self, Dispatch};
use kernel_sched::{
    FaultDump, Pid, Program, Scheduler, TableFull, TaskState, TrapFrame, UserOp,
};
use kernel_vmem::{AddressSpace, MapFlags, TranslateError, VmObjects};
use thiserror::Error;

/// Why a task could not be created.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
pub enum SpawnError {
    #[error(transparent)]
    Table(#[from] TableFull),
    #[error("out of physical memory")]
    OutOfMemory,
}

/// What happened to the op the machine just executed.
enum Step {
    /// Completed; the program counter advanced.
    Next,
    /// Blocked (a `wait` on a live task); unchanged, re-issued later.
    Blocked,
    /// The task gave up the processor (sleep or exit).
    Yielded,
}

/// The whole machine: RAM, allocators, page tables and scheduler behind
/// one ownership boundary.
pub struct Kernel {
    ram: LinearRam,
    frames: FrameAllocator,
    objs: VmObjects,
    sched: Scheduler,
    /// Timer delivery gate; masked during bring-up, enabled by `run`.
    interrupts_enabled: bool,
    ticks: u64,
}

impl Kernel {
    /// Bring the machine up: build the boot memory map, hand it to the
    /// frame allocator once, and leave interrupts masked.
    #[must_use]
    pub fn boot(config: &KernelConfig) -> Self {
        let mut map = BootMemoryMap::new();
        map.push_region(PhysRegion::new(config.ram_base, config.ram_size, RegionKind::Ram));
        for &(base, len) in &config.reserved {
            map.reserve(base, len);
        }

        let mut frames = FrameAllocator::new();
        frames.init(&map);
        log::info!(
            "booted with {} KiB of RAM, {} pages usable",
            config.ram_size / 1024,
            frames.free_pages()
        );

        Self {
            ram: LinearRam::new(config.ram_base, config.ram_size),
            frames,
            objs: VmObjects::new(),
            sched: Scheduler::new(),
            interrupts_enabled: false,
            ticks: 0,
        }
    }

    /// Create a runnable task with an empty address space.
    pub fn spawn(&mut self, program: Program) -> Result<Pid, SpawnError> {
        let space = AddressSpace::new(&mut self.ram, &mut self.frames)
            .map_err(|_| SpawnError::OutOfMemory)?;
        Ok(self.sched.table.spawn(program, space)?)
    }

    /// Create a runnable task with `pages` lazily-backed user pages at
    /// `base`.
    pub fn spawn_with_memory(
        &mut self,
        program: Program,
        base: VirtualAddress,
        pages: u64,
        flags: MapFlags,
    ) -> Result<Pid, SpawnError> {
        let mut space = AddressSpace::new(&mut self.ram, &mut self.frames)
            .map_err(|_| SpawnError::OutOfMemory)?;
        space
            .alloc_pages(&mut self.ram, &mut self.frames, &mut self.objs, base, pages, flags)
            .map_err(|_| SpawnError::OutOfMemory)?;
        Ok(self.sched.table.spawn(program, space)?)
    }

    /// Fault a lazily-backed page in ahead of first use.
    pub fn commit_page(&mut self, pid: Pid, va: VirtualAddress) -> bool {
        self.with_space(pid, |kernel, space| {
            space.handle_fault(&mut kernel.ram, &mut kernel.frames, &mut kernel.objs, va)
        })
    }

    /// Enable interrupts and run the scheduler loop until no task is
    /// runnable or waiting anymore.
    pub fn run(&mut self) {
        self.interrupts_enabled = true;
        log::info!("scheduler started");
        loop {
            match self.sched.schedule_next() {
                Some(pid) => self.run_task(pid),
                None if self.sched.table.any_in_state(TaskState::Waiting) => self.halt(),
                None => break,
            }
        }
        self.interrupts_enabled = false;
        log::info!("scheduler idle after {} ticks", self.ticks);
    }

    /// Timer ticks delivered so far.
    #[inline]
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Frames currently free in the buddy allocator.
    #[must_use]
    pub fn free_frames(&self) -> u64 {
        self.frames.free_pages()
    }

    #[must_use]
    pub fn task_state(&self, pid: Pid) -> TaskState {
        self.sched
            .table
            .get(pid)
            .map_or(TaskState::Unallocated, |t| t.state)
    }

    /// Exit code of a zombie task awaiting reaping.
    #[must_use]
    pub fn exit_code(&self, pid: Pid) -> Option<i64> {
        self.sched
            .table
            .get(pid)
            .filter(|t| t.state == TaskState::Zombie)
            .map(|t| t.exit_code)
    }

    /// A task's saved registers (its last trap frame).
    #[must_use]
    pub fn task_frame(&self, pid: Pid) -> Option<&TrapFrame> {
        self.sched.table.get(pid).map(|t| &t.context.frame)
    }

    /// Read one word from a task's memory, if the address is mapped.
    #[must_use]
    pub fn read_user(&self, pid: Pid, va: VirtualAddress) -> Option<u64> {
        let space = self.sched.table.get(pid)?.space.as_ref()?;
        let pa = space.translate(&self.ram, va).ok()?;
        Some(self.ram.read_u64(pa))
    }
}

impl Kernel {
    /// Run `pid` until it yields, blocks, exits or is preempted.
    fn run_task(&mut self, pid: Pid) {
        loop {
            let task = self.sched.table.get(pid).expect("dispatched task vanished");
            let Some(op) = task.current_op() else {
                // Falling off the end of the program is an exit(0).
                let task = self.sched.table.get_mut(pid).expect("dispatched task vanished");
                task.state = TaskState::Zombie;
                task.exit_code = 0;
                log::debug!("task {pid} ran to completion");
                self.sched.yield_current();
                return;
            };

            let step = self.execute(pid, op);
            match step {
                Step::Next => {
                    if self.tick() {
                        self.sched.yield_current();
                        return;
                    }
                }
                Step::Blocked => {
                    self.tick();
                    self.sched.yield_current();
                    return;
                }
                Step::Yielded => {
                    self.sched.yield_current();
                    return;
                }
            }
        }
    }

    /// Execute one user operation for `pid`.
    fn execute(&mut self, pid: Pid, op: UserOp) -> Step {
        match op {
            UserOp::Compute => {
                self.advance(pid);
                Step::Next
            }
            UserOp::Store { addr, value } => {
                let pa = self.resolve_user(pid, addr);
                self.ram.write_u64(pa, value);
                self.advance(pid);
                Step::Next
            }
            UserOp::Load { addr } => {
                let pa = self.resolve_user(pid, addr);
                let value = self.ram.read_u64(pa);
                let task = self.sched.table.get_mut(pid).expect("dispatched task vanished");
                task.context.frame.rbx = value;
                self.advance(pid);
                Step::Next
            }
            UserOp::Syscall { number, arg0, arg1 } => self.trap(pid, number, arg0, arg1),
        }
    }

    /// Trap into the kernel: fill the frame, dispatch, write the frame
    /// back and translate the outcome into a machine step.
    fn trap(&mut self, pid: Pid, number: u64, arg0: u64, arg1: u64) -> Step {
        let mut frame = self
            .sched
            .table
            .get(pid)
            .expect("dispatched task vanished")
            .context
            .frame;
        frame.rax = number;
        frame.rdi = arg0;
        frame.rsi = arg1;

        let outcome = syscall::dispatch(
            &mut self.sched,
            &mut self.ram,
            &mut self.frames,
            &mut self.objs,
            pid,
            &mut frame,
        );
        if let Some(task) = self.sched.table.get_mut(pid) {
            task.context.frame = frame;
        }

        match outcome {
            Dispatch::Continue => {
                self.advance(pid);
                Step::Next
            }
            Dispatch::Yield => {
                self.advance(pid);
                Step::Yielded
            }
            Dispatch::Retry => Step::Blocked,
            Dispatch::Exited => Step::Yielded,
        }
    }

    /// Translate a user access, faulting an on-demand page in if one is
    /// registered. No resolution means an unhandled fault: dump and
    /// halt.
    fn resolve_user(&mut self, pid: Pid, addr: VirtualAddress) -> PhysicalAddress {
        let translated = self.with_space(pid, |kernel, space| {
            match space.translate(&kernel.ram, addr) {
                Ok(pa) => Some(pa),
                Err(TranslateError::NotMapped(_)) => {
                    if space.handle_fault(&mut kernel.ram, &mut kernel.frames, &mut kernel.objs, addr)
                    {
                        space.translate(&kernel.ram, addr).ok()
                    } else {
                        None
                    }
                }
                Err(TranslateError::NonCanonical(_)) => None,
            }
        });

        translated.unwrap_or_else(|| self.fatal_fault(pid, addr))
    }

    /// Unhandled fault: dump the task's registers and halt.
    fn fatal_fault(&self, pid: Pid, addr: VirtualAddress) -> ! {
        let frame = self
            .sched
            .table
            .get(pid)
            .map(|t| t.context.frame)
            .unwrap_or_default();
        log::error!("{}", FaultDump { frame: &frame, addr: Some(addr) });
        panic!("unhandled fault at {addr:?} in task {pid}");
    }

    /// Lend a task's address space to `f` alongside the rest of the
    /// machine, then put it back.
    fn with_space<T>(&mut self, pid: Pid, f: impl FnOnce(&mut Self, &mut AddressSpace) -> T) -> T {
        let mut space = self
            .sched
            .table
            .get_mut(pid)
            .expect("task vanished")
            .space
            .take()
            .expect("allocated task without an address space");
        let result = f(self, &mut space);
        self.sched.table.get_mut(pid).expect("task vanished").space = Some(space);
        result
    }

    fn advance(&mut self, pid: Pid) {
        self.sched.table.get_mut(pid).expect("task vanished").context.pc += 1;
    }

    /// Deliver one timer tick; returns `true` when the running task must
    /// be preempted.
    fn tick(&mut self) -> bool {
        if !self.interrupts_enabled {
            return false;
        }
        self.ticks += 1;
        self.sched.timer_tick()
    }

    /// Nothing runnable: sleep until the next timer interrupt.
    fn halt(&mut self) {
        self.tick();
    }
}
