//! Hosted demo: boot the kernel, run a handful of user programs and log
//! what happens to them.

use kernel::{Kernel, KernelConfig};
use kernel_addresses::VirtualAddress;
use kernel_sched::UserOp;
use kernel_vmem::MapFlags;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut kernel = Kernel::boot(&KernelConfig::new());

    let status = VirtualAddress::new(0x7000_0000);
    let scratch = VirtualAddress::new(0x6000_0000);

    // Reaper: waits for the worker below and reports its exit code.
    let reaper = kernel
        .spawn_with_memory(
            vec![UserOp::wait(kernel_sched::Pid::new(2), status)],
            status,
            1,
            MapFlags::WRITE | MapFlags::USER,
        )
        .expect("spawn reaper");

    // Worker: touches lazily-backed memory, naps, then exits 42.
    let worker = kernel
        .spawn_with_memory(
            vec![
                UserOp::Store { addr: scratch, value: 7 },
                UserOp::Load { addr: scratch },
                UserOp::sleep(50),
                UserOp::exit(42),
            ],
            scratch,
            4,
            MapFlags::WRITE | MapFlags::USER,
        )
        .expect("spawn worker");

    // Background: just burns a few slices.
    let background = kernel
        .spawn(vec![UserOp::Compute; 25])
        .expect("spawn background");

    kernel.run();

    log::info!(
        "reaper {reaper} saw status {:?}",
        kernel.read_user(reaper, status)
    );
    log::info!("worker {worker} state: {:?}", kernel.task_state(worker));
    log::info!(
        "background {background} exited with {:?}",
        kernel.exit_code(background)
    );
    log::info!("{} frames free, {} ticks elapsed", kernel.free_frames(), kernel.ticks());
}
