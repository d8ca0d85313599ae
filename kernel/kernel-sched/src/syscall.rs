//! Syscall numbers, dispatch table and handlers.
//!
//! The dispatcher is the only boundary between trapped user state and
//! the scheduler: the trap frame arrives by reference, the handler
//! writes its result into the frame's return slot, and the returned
//! [`Dispatch`] tells the machine loop what to do with the task.

use crate::task::TaskState;
use crate::{Pid, Scheduler, TICKS_PER_SEC, TrapFrame, errno};
use kernel_addresses::VirtualAddress;
use kernel_frame_alloc::FrameAllocator;
use kernel_pmem::PhysMemory;
use kernel_vmem::{AddressSpace, TranslateError, VmObjects};

pub const SYS_SLEEP: u64 = 0;
pub const SYS_FORK: u64 = 1;
pub const SYS_GETPID: u64 = 2;
pub const SYS_EXIT: u64 = 3;
pub const SYS_WAIT: u64 = 4;

/// What the machine loop does with the task after a syscall.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Dispatch {
    /// Result written; the task keeps its slice and runs on.
    Continue,
    /// The task yielded the processor (it is now `Waiting`).
    Yield,
    /// The syscall blocked; re-issue it the next time the task runs.
    Retry,
    /// The task exited and will never resume.
    Exited,
}

/// Route a trapped syscall to its handler.
///
/// The number rides in `rax`, arguments in `rdi`/`rsi`; the result is
/// written back into `rax`. An out-of-range number reaches no handler
/// and yields `-ENOSYS`.
pub fn dispatch(
    sched: &mut Scheduler,
    mem: &mut impl PhysMemory,
    frames: &mut FrameAllocator,
    objs: &mut VmObjects,
    pid: Pid,
    frame: &mut TrapFrame,
) -> Dispatch {
    match frame.rax {
        SYS_SLEEP => sys_sleep(sched, pid, frame),
        SYS_FORK => sys_fork(sched, pid, frame),
        SYS_GETPID => sys_getpid(pid, frame),
        SYS_EXIT => sys_exit(sched, pid, frame),
        SYS_WAIT => sys_wait(sched, mem, frames, objs, pid, frame),
        number => {
            log::warn!("task {pid}: unknown syscall {number}");
            frame.set_return(-errno::ENOSYS);
            Dispatch::Continue
        }
    }
}

/// `sleep(ms)`: park the caller until the timer has delivered the
/// equivalent number of ticks. Returns 0 on wake-up.
fn sys_sleep(sched: &mut Scheduler, pid: Pid, frame: &mut TrapFrame) -> Dispatch {
    let ms = frame.rdi;
    if ms > i32::MAX as u64 {
        frame.set_return(-errno::EINVAL);
        return Dispatch::Continue;
    }

    let task = sched.table.get_mut(pid).expect("current task vanished");
    task.state = TaskState::Waiting;
    task.ticks = ms * TICKS_PER_SEC / 1000;
    frame.set_return(0);
    Dispatch::Yield
}

/// `fork()`: declared but unimplemented.
fn sys_fork(sched: &mut Scheduler, pid: Pid, frame: &mut TrapFrame) -> Dispatch {
    // Address-space cloning is the missing piece; surface its absence.
    let unsupported = sched
        .table
        .get(pid)
        .and_then(|t| t.space.as_ref())
        .map(AddressSpace::try_clone)
        .and_then(Result::err);
    debug_assert!(unsupported.is_some());
    frame.set_return(-errno::EINVAL);
    Dispatch::Continue
}

fn sys_getpid(pid: Pid, frame: &mut TrapFrame) -> Dispatch {
    frame.set_return(pid.index() as i64);
    Dispatch::Continue
}

/// `exit(code)`: mark the caller zombie; its slot and address space
/// stay around until a `wait` reaps them.
fn sys_exit(sched: &mut Scheduler, pid: Pid, frame: &mut TrapFrame) -> Dispatch {
    let code = frame.rdi;
    if code > i32::MAX as u64 {
        frame.set_return(-errno::EINVAL);
        return Dispatch::Continue;
    }

    let task = sched.table.get_mut(pid).expect("current task vanished");
    task.state = TaskState::Zombie;
    task.exit_code = code as i64;
    log::debug!("task {pid} exited with {code}");
    Dispatch::Exited
}

/// `wait(pid, status_ptr)`: block until the target is a zombie, write
/// its exit code through `status_ptr`, and release its slot, address
/// space and frames. Returns 0 on success.
fn sys_wait(
    sched: &mut Scheduler,
    mem: &mut impl PhysMemory,
    frames: &mut FrameAllocator,
    objs: &mut VmObjects,
    pid: Pid,
    frame: &mut TrapFrame,
) -> Dispatch {
    let target = Pid::new(frame.rdi as usize);
    let status_ptr = VirtualAddress::new(frame.rsi);

    let Some(target_task) = sched.table.get(target) else {
        frame.set_return(-errno::EINVAL);
        return Dispatch::Continue;
    };
    if target_task.state != TaskState::Zombie {
        // Busy-yield: the op re-executes on the caller's next dispatch.
        return Dispatch::Retry;
    }
    let exit_code = target_task.exit_code;

    // The status write goes through the *caller's* address space and may
    // itself fault a lazy page in.
    let mut space = sched
        .table
        .get_mut(pid)
        .expect("current task vanished")
        .space
        .take()
        .expect("allocated task without an address space");
    let wrote = space.is_user_accessible(mem, status_ptr, 8)
        && write_user_u64(&mut space, mem, frames, objs, status_ptr, exit_code as u64);
    sched.table.get_mut(pid).expect("current task vanished").space = Some(space);

    if !wrote {
        frame.set_return(-errno::EINVAL);
        return Dispatch::Continue;
    }

    let target_space = sched
        .table
        .release(target)
        .expect("zombie without an address space");
    target_space.destroy(mem, frames, objs);

    frame.set_return(0);
    Dispatch::Continue
}

/// Store one word through a user mapping, resolving an on-demand page if
/// the address has never been touched.
fn write_user_u64(
    space: &mut AddressSpace,
    mem: &mut impl PhysMemory,
    frames: &mut FrameAllocator,
    objs: &mut VmObjects,
    va: VirtualAddress,
    value: u64,
) -> bool {
    if va.as_u64() % 8 != 0 {
        return false;
    }
    let pa = match space.translate(mem, va) {
        Ok(pa) => pa,
        Err(TranslateError::NotMapped(_)) => {
            if !space.handle_fault(mem, frames, objs, va) {
                return false;
            }
            match space.translate(mem, va) {
                Ok(pa) => pa,
                Err(_) => return false,
            }
        }
        Err(TranslateError::NonCanonical(_)) => return false,
    };
    mem.write_u64(pa, value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::UserOp;
    use alloc::vec;
    use kernel_addresses::{PAGE_SIZE, PhysicalAddress};
    use kernel_pmem::{BootMemoryMap, LinearRam, PhysRegion, RegionKind};
    use kernel_vmem::MapFlags;

    struct Machine {
        ram: LinearRam,
        frames: FrameAllocator,
        objs: VmObjects,
        sched: Scheduler,
    }

    impl Machine {
        fn new(pages: u64) -> Self {
            let base = PhysicalAddress::new(0x40_0000);
            let mut map = BootMemoryMap::new();
            map.push_region(PhysRegion::new(base, pages * PAGE_SIZE, RegionKind::Ram));
            let mut frames = FrameAllocator::new();
            frames.init(&map);
            Self {
                ram: LinearRam::new(base, pages * PAGE_SIZE),
                frames,
                objs: VmObjects::new(),
                sched: Scheduler::new(),
            }
        }

        fn spawn(&mut self, program: crate::Program) -> Pid {
            let space = AddressSpace::new(&mut self.ram, &mut self.frames).unwrap();
            self.sched.table.spawn(program, space).unwrap()
        }

        fn spawn_with_user_page(&mut self, program: crate::Program, base: VirtualAddress) -> Pid {
            let mut space = AddressSpace::new(&mut self.ram, &mut self.frames).unwrap();
            space
                .alloc_pages(
                    &mut self.ram,
                    &mut self.frames,
                    &mut self.objs,
                    base,
                    1,
                    MapFlags::WRITE | MapFlags::USER,
                )
                .unwrap();
            self.sched.table.spawn(program, space).unwrap()
        }

        fn syscall(&mut self, pid: Pid, number: u64, arg0: u64, arg1: u64) -> (Dispatch, i64) {
            let mut frame = TrapFrame {
                rax: number,
                rdi: arg0,
                rsi: arg1,
                ..TrapFrame::default()
            };
            let outcome = dispatch(
                &mut self.sched,
                &mut self.ram,
                &mut self.frames,
                &mut self.objs,
                pid,
                &mut frame,
            );
            (outcome, frame.return_value())
        }
    }

    #[test]
    fn sleep_parks_the_caller_with_converted_ticks() {
        let mut m = Machine::new(64);
        let pid = m.spawn(vec![]);
        let (outcome, ret) = m.syscall(pid, SYS_SLEEP, 1000, 0);
        assert_eq!(outcome, Dispatch::Yield);
        assert_eq!(ret, 0);
        let task = m.sched.table.get(pid).unwrap();
        assert_eq!(task.state, TaskState::Waiting);
        assert_eq!(task.ticks, TICKS_PER_SEC);
    }

    #[test]
    fn oversized_sleep_is_rejected() {
        let mut m = Machine::new(64);
        let pid = m.spawn(vec![]);
        let (outcome, ret) = m.syscall(pid, SYS_SLEEP, u64::MAX, 0);
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(ret, -errno::EINVAL);
        assert_eq!(m.sched.table.get(pid).unwrap().state, TaskState::Runnable);
    }

    #[test]
    fn getpid_returns_the_caller() {
        let mut m = Machine::new(64);
        let pid = m.spawn(vec![]);
        let (outcome, ret) = m.syscall(pid, SYS_GETPID, 0, 0);
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(ret, pid.index() as i64);
    }

    #[test]
    fn fork_is_unimplemented() {
        let mut m = Machine::new(64);
        let pid = m.spawn(vec![]);
        let (_, ret) = m.syscall(pid, SYS_FORK, 0, 0);
        assert_eq!(ret, -errno::EINVAL);
    }

    #[test]
    fn out_of_range_numbers_reach_no_handler() {
        let mut m = Machine::new(64);
        let pid = m.spawn(vec![]);
        let (outcome, ret) = m.syscall(pid, 99, 0, 0);
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(ret, -errno::ENOSYS);
    }

    #[test]
    fn exit_turns_the_caller_into_a_zombie() {
        let mut m = Machine::new(64);
        let pid = m.spawn(vec![]);
        let (outcome, _) = m.syscall(pid, SYS_EXIT, 42, 0);
        assert_eq!(outcome, Dispatch::Exited);
        let task = m.sched.table.get(pid).unwrap();
        assert_eq!(task.state, TaskState::Zombie);
        assert_eq!(task.exit_code, 42);
    }

    #[test]
    fn wait_on_a_live_task_blocks() {
        let mut m = Machine::new(64);
        let waiter = m.spawn(vec![]);
        let target = m.spawn(vec![]);
        let (outcome, _) = m.syscall(waiter, SYS_WAIT, target.index() as u64, 0x7000_0000);
        assert_eq!(outcome, Dispatch::Retry);
    }

    #[test]
    fn wait_on_an_unknown_pid_fails() {
        let mut m = Machine::new(64);
        let waiter = m.spawn(vec![]);
        let (outcome, ret) = m.syscall(waiter, SYS_WAIT, 17, 0);
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(ret, -errno::EINVAL);
    }

    #[test]
    fn wait_reaps_a_zombie_and_reports_its_status() {
        let mut m = Machine::new(128);
        let status = VirtualAddress::new(0x7000_0000);
        let waiter = m.spawn_with_user_page(vec![], status);
        let target = m.spawn(vec![UserOp::exit(42)]);

        let before_exit = m.frames.free_pages();
        m.syscall(target, SYS_EXIT, 42, 0);
        let (outcome, ret) = m.syscall(waiter, SYS_WAIT, target.index() as u64, status.as_u64());
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(ret, 0);

        // The status word landed in the waiter's memory.
        let space = m.sched.table.get(waiter).unwrap().space.as_ref().unwrap();
        let pa = space.translate(&m.ram, status).unwrap();
        assert_eq!(m.ram.read_u64(pa), 42);

        // Target slot is vacant again; its root frame came back, minus
        // the one page the waiter faulted in for its status word.
        assert!(m.sched.table.get(target).is_none());
        assert_eq!(m.frames.free_pages(), before_exit + 1 - /* status page + its tables */ 4);
    }

    #[test]
    fn wait_with_a_bad_status_pointer_does_not_reap() {
        let mut m = Machine::new(64);
        let waiter = m.spawn(vec![]); // no user memory at all
        let target = m.spawn(vec![]);
        m.syscall(target, SYS_EXIT, 1, 0);

        let (outcome, ret) = m.syscall(waiter, SYS_WAIT, target.index() as u64, 0x7000_0000);
        assert_eq!(outcome, Dispatch::Continue);
        assert_eq!(ret, -errno::EINVAL);
        // The zombie is still there for a corrected wait.
        assert_eq!(m.sched.table.get(target).unwrap().state, TaskState::Zombie);
    }
}
