use crate::task::{Program, Task, TaskState};
use crate::{MAX_TASKS, Pid, TIME_SLICE_TICKS};
use alloc::vec::Vec;
use kernel_vmem::AddressSpace;
use thiserror::Error;

/// Every slot in the table is taken.
#[derive(Copy, Clone, Debug, Error, Eq, PartialEq)]
#[error("task table is full")]
pub struct TableFull;

/// Fixed-capacity task table indexed by pid.
///
/// Slot 0 is reserved and never allocated; a pid therefore uniquely
/// names one live task for as long as its slot stays non-vacant.
pub struct TaskTable {
    slots: Vec<Task>,
}

impl TaskTable {
    #[must_use]
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_TASKS);
        slots.resize_with(MAX_TASKS, Task::default);
        Self { slots }
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        MAX_TASKS
    }

    /// Allocate the lowest vacant slot for a new runnable task.
    pub fn spawn(&mut self, program: Program, space: AddressSpace) -> Result<Pid, TableFull> {
        let index = self.slots[1..]
            .iter()
            .position(|t| t.state == TaskState::Unallocated)
            .map(|i| i + 1)
            .ok_or(TableFull)?;

        self.slots[index] = Task {
            state: TaskState::Runnable,
            ticks: TIME_SLICE_TICKS,
            program,
            space: Some(space),
            ..Task::default()
        };
        log::debug!("spawned task {index}");
        Ok(Pid::new(index))
    }

    /// The task for `pid`, if that slot is allocated.
    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Task> {
        self.slots
            .get(pid.index())
            .filter(|t| t.state != TaskState::Unallocated)
    }

    #[must_use]
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.slots
            .get_mut(pid.index())
            .filter(|t| t.state != TaskState::Unallocated)
    }

    /// Reap a zombie: reset the slot to vacant and hand its address
    /// space to the caller for teardown.
    ///
    /// Reaping a slot in any other state is an invariant violation.
    pub fn release(&mut self, pid: Pid) -> Option<AddressSpace> {
        let task = &mut self.slots[pid.index()];
        assert_eq!(task.state, TaskState::Zombie, "reaping a non-zombie task {pid}");
        let space = task.space.take();
        *task = Task::default();
        log::debug!("released task {pid}");
        space
    }

    /// Pids of all non-vacant slots, low to high.
    pub fn live_pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, t)| t.state != TaskState::Unallocated)
            .map(|(i, _)| Pid::new(i))
    }

    /// Whether any slot is in `state`.
    #[must_use]
    pub fn any_in_state(&self, state: TaskState) -> bool {
        self.slots.iter().any(|t| t.state == state)
    }

    pub(crate) fn slot_state(&self, index: usize) -> TaskState {
        self.slots[index].state
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> &mut Task {
        &mut self.slots[index]
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Task] {
        &mut self.slots
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_addresses::{PAGE_SIZE, PhysicalAddress};
    use kernel_frame_alloc::FrameAllocator;
    use kernel_pmem::{BootMemoryMap, LinearRam, PhysRegion, RegionKind};

    fn machine(pages: u64) -> (FrameAllocator, LinearRam) {
        let base = PhysicalAddress::new(0x10_0000);
        let mut map = BootMemoryMap::new();
        map.push_region(PhysRegion::new(base, pages * PAGE_SIZE, RegionKind::Ram));
        let mut frames = FrameAllocator::new();
        frames.init(&map);
        (frames, LinearRam::new(base, pages * PAGE_SIZE))
    }

    fn space(frames: &mut FrameAllocator, ram: &mut LinearRam) -> AddressSpace {
        AddressSpace::new(ram, frames).unwrap()
    }

    #[test]
    fn pids_start_at_one_and_are_reused_after_release() {
        let (mut frames, mut ram) = machine(64);
        let mut table = TaskTable::new();

        let a = table.spawn(Vec::new(), space(&mut frames, &mut ram)).unwrap();
        let b = table.spawn(Vec::new(), space(&mut frames, &mut ram)).unwrap();
        assert_eq!(a, Pid::new(1));
        assert_eq!(b, Pid::new(2));

        table.get_mut(a).unwrap().state = TaskState::Zombie;
        let reclaimed = table.release(a).unwrap();
        let mut objs = kernel_vmem::VmObjects::new();
        reclaimed.destroy(&mut ram, &mut frames, &mut objs);

        assert!(table.get(a).is_none());
        let c = table.spawn(Vec::new(), space(&mut frames, &mut ram)).unwrap();
        assert_eq!(c, Pid::new(1));
    }

    #[test]
    fn table_capacity_is_enforced() {
        let (mut frames, mut ram) = machine(256);
        let mut table = TaskTable::new();
        for _ in 1..MAX_TASKS {
            table.spawn(Vec::new(), space(&mut frames, &mut ram)).unwrap();
        }
        assert_eq!(
            table.spawn(Vec::new(), space(&mut frames, &mut ram)).unwrap_err(),
            TableFull
        );
    }

    #[test]
    #[should_panic(expected = "reaping a non-zombie")]
    fn releasing_a_runnable_task_is_fatal() {
        let (mut frames, mut ram) = machine(16);
        let mut table = TaskTable::new();
        let pid = table.spawn(Vec::new(), space(&mut frames, &mut ram)).unwrap();
        let _ = table.release(pid);
    }
}
