//! On-demand paging behavior as user programs observe it.

use kernel::{Kernel, KernelConfig};
use kernel_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_sched::{TaskState, UserOp};
use kernel_vmem::MapFlags;

#[test]
fn lazy_pages_materialize_on_first_touch() {
    let mut kernel = Kernel::boot(&KernelConfig::new());
    let base = VirtualAddress::new(0x6000_0000);

    let t = kernel
        .spawn_with_memory(
            vec![
                UserOp::Store { addr: base + 8, value: 0xfeed },
                UserOp::Load { addr: base + 8 },
                UserOp::Store { addr: base + 3 * PAGE_SIZE, value: 1 },
            ],
            base,
            4,
            MapFlags::WRITE | MapFlags::USER,
        )
        .unwrap();

    let before = kernel.free_frames();
    kernel.run();

    assert_eq!(kernel.task_state(t), TaskState::Zombie);
    assert_eq!(kernel.read_user(t, base + 8), Some(0xfeed));
    assert_eq!(kernel.task_frame(t).unwrap().rbx, 0xfeed);

    // Two of the four pages were touched; only those got frames (plus
    // the page tables backing them).
    assert_eq!(kernel.read_user(t, base + PAGE_SIZE), None);
    assert!(kernel.free_frames() < before);
}

#[test]
fn untouched_lazy_pages_cost_nothing() {
    let mut kernel = Kernel::boot(&KernelConfig::new());
    let base = VirtualAddress::new(0x6000_0000);

    let t = kernel
        .spawn_with_memory(vec![UserOp::Compute], base, 64, MapFlags::WRITE | MapFlags::USER)
        .unwrap();

    let before = kernel.free_frames();
    kernel.run();

    // The program never touched its memory; no frame was committed.
    assert_eq!(kernel.free_frames(), before);
    assert_eq!(kernel.read_user(t, base), None);
}

#[test]
#[should_panic(expected = "unhandled fault")]
fn touching_unregistered_memory_is_fatal() {
    let mut kernel = Kernel::boot(&KernelConfig::new());
    kernel
        .spawn(vec![UserOp::Store { addr: VirtualAddress::new(0xdead_b000), value: 1 }])
        .unwrap();
    kernel.run();
}

#[test]
#[should_panic(expected = "unhandled fault")]
fn noncanonical_access_is_fatal() {
    let mut kernel = Kernel::boot(&KernelConfig::new());
    kernel
        .spawn(vec![UserOp::Load { addr: VirtualAddress::new(0x8000_0000_0000) }])
        .unwrap();
    kernel.run();
}
