//! System Alpha kernel library
//!
//! A small 32-bit protected-mode monolithic kernel: multiboot entry,
//! paging with a recursive self-map, a fixed 64-slot task table under a
//! preemptive round-robin scheduler at 100 Hz, and message-passing IPC
//! delivered as syscalls.
//!
//! The crate builds for two worlds. On bare metal
//! (`target_os = "none"`, i386) the `arch` layer is live and `main.rs`
//! boots the machine. On a host target the instruction-level primitives
//! become stubs and everything above them (frame accounting, paging
//! arithmetic, the heap, the scheduler state machine, mailboxes, syscall
//! dispatch) runs under the standard test harness.

#![no_std]

// Host target: link std so unit and integration tests can allocate and
// use the standard harness.
#[cfg(not(target_os = "none"))]
extern crate std;

pub mod arch;
pub mod error;
pub mod ipc;
pub mod logging;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod timer;
pub mod trap;

pub use error::{Errno, KernelError, KernelResult};
pub use mm::{PhysAddr, VirtAddr, PAGE_SIZE};
pub use sched::{Pid, TaskState};
pub use trap::TrapFrame;

/// Byte offset of the `mem_upper` field in the multiboot info block: KiB
/// of contiguous memory above 1 MiB. The only field this kernel reads.
pub const MULTIBOOT_MEM_UPPER_OFFSET: usize = 8;

/// Smallest upper-memory size the kernel accepts, in KiB.
pub const MIN_MEM_UPPER_KIB: usize = 1024;
