use crate::table::TaskTable;
use crate::task::TaskState;
use crate::{MAX_TASKS, Pid, TIME_SLICE_TICKS};

/// Round-robin scheduler state: the task table, the currently dispatched
/// task, and the table scan cursor.
///
/// The cursor survives across dispatches, so one sweep of the table
/// visits every runnable task before starting over; a task busy-yielding
/// (a blocked `wait`) therefore cannot starve the task it waits for.
pub struct Scheduler {
    pub table: TaskTable,
    current: Option<Pid>,
    scan: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: TaskTable::new(),
            current: None,
            scan: 1,
        }
    }

    /// The task currently dispatched, if any.
    #[inline]
    #[must_use]
    pub const fn current(&self) -> Option<Pid> {
        self.current
    }

    /// Pick the next runnable task, give it a fresh time slice and mark
    /// it current. `None` means the table holds nothing runnable and the
    /// processor should halt until the next interrupt.
    pub fn schedule_next(&mut self) -> Option<Pid> {
        for offset in 0..MAX_TASKS {
            let index = (self.scan + offset) % MAX_TASKS;
            if index == 0 {
                continue;
            }
            if self.table.slot_state(index) == TaskState::Runnable {
                self.scan = (index + 1) % MAX_TASKS;
                let task = self.table.slot_mut(index);
                task.ticks = TIME_SLICE_TICKS;
                let pid = Pid::new(index);
                self.current = Some(pid);
                log::trace!("dispatch task {pid}");
                return Some(pid);
            }
        }
        self.current = None;
        None
    }

    /// The current task gave up the processor (syscall yield, preemption
    /// or exit); control is back with the scheduler loop.
    pub fn yield_current(&mut self) {
        self.current = None;
    }

    /// Periodic timer tick.
    ///
    /// Drains every waiting task's wake-up counter, promoting it to
    /// runnable at zero. Then charges the running task's time slice and
    /// returns `true` when the slice is spent and the task must be
    /// switched out. The current task is charged only while `Runnable`:
    /// a task that just put itself to sleep must not be double-charged
    /// by a tick racing its own transition.
    pub fn timer_tick(&mut self) -> bool {
        for task in self.table.slots_mut() {
            if task.state != TaskState::Waiting {
                continue;
            }
            if task.ticks <= 1 {
                task.state = TaskState::Runnable;
                task.ticks = 0;
            } else {
                task.ticks -= 1;
            }
        }

        let Some(pid) = self.current else {
            return false;
        };
        let task = self.table.slot_mut(pid.index());
        if task.state != TaskState::Runnable {
            return false;
        }

        if task.ticks <= 1 {
            task.ticks = TIME_SLICE_TICKS;
            log::trace!("preempting task {pid}");
            true
        } else {
            task.ticks -= 1;
            false
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use kernel_addresses::{PAGE_SIZE, PhysicalAddress};
    use kernel_frame_alloc::FrameAllocator;
    use kernel_pmem::{BootMemoryMap, LinearRam, PhysRegion, RegionKind};
    use kernel_vmem::AddressSpace;

    fn spawn_n(sched: &mut Scheduler, n: usize) -> Vec<Pid> {
        let base = PhysicalAddress::new(0x10_0000);
        let mut map = BootMemoryMap::new();
        map.push_region(PhysRegion::new(base, 64 * PAGE_SIZE, RegionKind::Ram));
        let mut frames = FrameAllocator::new();
        frames.init(&map);
        let mut ram = LinearRam::new(base, 64 * PAGE_SIZE);

        (0..n)
            .map(|_| {
                let space = AddressSpace::new(&mut ram, &mut frames).unwrap();
                sched.table.spawn(Vec::new(), space).unwrap()
            })
            .collect()
    }

    #[test]
    fn round_robin_visits_every_runnable_task() {
        let mut sched = Scheduler::new();
        let pids = spawn_n(&mut sched, 3);

        let mut order = Vec::new();
        for _ in 0..6 {
            let pid = sched.schedule_next().unwrap();
            order.push(pid);
            sched.yield_current();
        }
        assert_eq!(order[..3], pids[..]);
        assert_eq!(order[3..], pids[..]);
    }

    #[test]
    fn idle_table_schedules_nothing() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.schedule_next(), None);
        assert_eq!(sched.current(), None);
    }

    #[test]
    fn sleepers_wake_after_their_ticks() {
        let mut sched = Scheduler::new();
        let pids = spawn_n(&mut sched, 1);
        let task = sched.table.get_mut(pids[0]).unwrap();
        task.state = TaskState::Waiting;
        task.ticks = 3;

        for _ in 0..2 {
            sched.timer_tick();
            assert_eq!(sched.table.get(pids[0]).unwrap().state, TaskState::Waiting);
        }
        sched.timer_tick();
        let task = sched.table.get(pids[0]).unwrap();
        assert_eq!(task.state, TaskState::Runnable);
        assert_eq!(task.ticks, 0);
    }

    #[test]
    fn running_task_is_preempted_after_its_slice() {
        let mut sched = Scheduler::new();
        let pids = spawn_n(&mut sched, 1);
        assert_eq!(sched.schedule_next(), Some(pids[0]));

        for _ in 0..TIME_SLICE_TICKS - 1 {
            assert!(!sched.timer_tick());
        }
        assert!(sched.timer_tick());
        // Slice was reset for the next dispatch.
        assert_eq!(sched.table.get(pids[0]).unwrap().ticks, TIME_SLICE_TICKS);
    }

    #[test]
    fn tick_skips_charging_when_current_is_not_runnable() {
        let mut sched = Scheduler::new();
        let pids = spawn_n(&mut sched, 1);
        sched.schedule_next();

        // The task just transitioned itself to Waiting; the racing tick
        // must not preempt or charge it.
        let task = sched.table.get_mut(pids[0]).unwrap();
        task.state = TaskState::Waiting;
        task.ticks = 5;
        assert!(!sched.timer_tick());
        assert_eq!(sched.table.get(pids[0]).unwrap().ticks, 4);
    }

    #[test]
    fn no_current_task_means_no_preemption() {
        let mut sched = Scheduler::new();
        spawn_n(&mut sched, 1);
        assert!(!sched.timer_tick());
    }
}
