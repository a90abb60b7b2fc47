//! System Alpha kernel binary
//!
//! Boot entry for bare metal: consume the multiboot info block, bring up
//! memory, interrupts, the heap, the timer and the scheduler, spawn the
//! demo message-passing pair, then become the idle task. On a host
//! target this binary is a stub; the kernel logic lives in the library
//! and is exercised by its tests.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
mod boot {
    use alpha_kernel::{
        arch, mm, sched, syscall, timer, trap, Pid, MIN_MEM_UPPER_KIB,
        MULTIBOOT_MEM_UPPER_OFFSET,
    };

    /// Kernel entry, called by the boot stub with paging and interrupts
    /// off and a pointer to the multiboot information block.
    #[no_mangle]
    pub extern "C" fn kernel_main(multiboot_info: *const u32) -> ! {
        // SAFETY: the boot loader passes a valid multiboot info block;
        // mem_upper sits at byte offset 8.
        let mem_upper =
            unsafe { multiboot_info.add(MULTIBOOT_MEM_UPPER_OFFSET / 4).read() } as usize;

        mm::init(mem_upper);
        trap::init();
        if let Err(err) = mm::heap::init() {
            panic!("heap allocation failed: {}", err);
        }
        timer::init();
        sched::init();
        arch::x86::tss::init();

        log::info!("System Alpha kernel v0.1.0");
        log::info!("Upper memory: {}k", mem_upper);
        if mem_upper < MIN_MEM_UPPER_KIB {
            panic!("upper memory size less than {}k", MIN_MEM_UPPER_KIB);
        }

        // Demo workload: pid 1 sends a counter to pid 2 once a second.
        let sender = sched::spawn_kthread(sender_task).expect("spawn sender");
        let receiver = sched::spawn_kthread(receiver_task).expect("spawn receiver");
        log::info!("[MAIN] demo tasks ready ({} -> {})", sender, receiver);

        sched::idle_loop();
    }

    fn sender_task() -> ! {
        let mut i = 1;
        loop {
            syscall::sleep(1000);
            if let Err(err) = syscall::send(Pid(2), [i, 0, 0, 0, 0]) {
                log::error!("send failed: {:?}", err);
                // Park this task; the rest of the system keeps running.
                loop {
                    arch::halt();
                }
            }
            i += 1;
        }
    }

    fn receiver_task() -> ! {
        loop {
            match syscall::recv() {
                Ok(message) => {
                    log::info!("message from pid {}: {}", message.sender, message.args[0])
                }
                Err(err) => log::error!("recv failed: {:?}", err),
            }
        }
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo) -> ! {
        log::error!("kernel panic: {}", info);
        arch::halt_forever();
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("alpha-kernel boots via multiboot on i386; run the test suite instead");
}
