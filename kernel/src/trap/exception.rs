//! CPU exception policy
//!
//! Table-driven: each vector carries its panic message and, where a
//! misbehaving user task is survivable, the one-line kill diagnostic.
//! Any exception in kernel mode (`cs == 0x08`) is a kernel bug and
//! panics with a full frame dump; in user mode the faulting task is
//! freed and the scheduler moves on.

use super::TrapFrame;
use crate::sched::{self, TaskTable};

struct ExceptionPolicy {
    /// Panic message when the fault is not survivable.
    panic_msg: &'static str,
    /// Kill diagnostic when a ring-3 offender is simply terminated.
    /// `None` means the fault panics even from user mode.
    user_kill: Option<&'static str>,
}

const fn fatal(panic_msg: &'static str) -> ExceptionPolicy {
    ExceptionPolicy {
        panic_msg,
        user_kill: None,
    }
}

const fn survivable(panic_msg: &'static str, user_kill: &'static str) -> ExceptionPolicy {
    ExceptionPolicy {
        panic_msg,
        user_kill: Some(user_kill),
    }
}

/// Policies for vectors 0-18, indexed by vector number.
static POLICIES: [ExceptionPolicy; 19] = [
    survivable("divide by zero exception", "Divide by zero error"),
    fatal("debug exception"),
    fatal("non-maskable interrupt"),
    // Breakpoints from user mode leak through to the kernel policy.
    fatal("breakpoint exception"),
    fatal("overflow exception"),
    survivable("out of bounds exception", "Bounds error"),
    survivable("invalid opcode exception", "Invalid opcode"),
    fatal("no coprocessor exception"),
    fatal("double fault exception"),
    fatal("coprocessor segment overrun"),
    fatal("bad TSS exception"),
    fatal("segment not present"),
    fatal("stack fault exception"),
    survivable("general protection fault", "General protection fault"),
    // To be potentially replaced by swapping someday...
    survivable("unexpected page fault", "Page fault"),
    fatal("unknown interrupt"),
    fatal("coprocessor fault"),
    fatal("alignment check exception"),
    fatal("machine check exception"),
];

const UNHANDLED: ExceptionPolicy = fatal("unhandled exception");

/// Exception entry from the dispatcher; applies the policy against the
/// global table.
pub(super) fn handle(frame: &mut TrapFrame) {
    sched::with_table(|table| apply(table, frame));
}

/// Apply the policy for `frame.vector`.
pub(crate) fn apply(table: &mut TaskTable, frame: &TrapFrame) {
    let policy = POLICIES
        .get(frame.vector as usize)
        .unwrap_or(&UNHANDLED);

    if !frame.from_user() {
        panic_with_frame(policy.panic_msg, table, frame);
    }
    match policy.user_kill {
        Some(reason) => table.kill_current(reason, frame.eip),
        None => panic_with_frame(policy.panic_msg, table, frame),
    }
}

/// Dump the complete interrupted context and halt with interrupts
/// disabled. Never returns.
fn panic_with_frame(msg: &str, table: &TaskTable, frame: &TrapFrame) -> ! {
    log::error!("Exception {} ({:#x}):", frame.vector, frame.error_code);
    log::error!(
        "    EIP {:#010x}  PID {}",
        frame.eip,
        table.current_slot().pid
    );
    log::error!(
        "    EAX {:#010x}  EBX {:#010x}  ECX {:#010x}  EDX {:#010x}",
        frame.eax,
        frame.ebx,
        frame.ecx,
        frame.edx
    );
    log::error!(
        "    ESI {:#010x}  EDI {:#010x}  EBP {:#010x}  ESP {:#010x}",
        frame.esi,
        frame.edi,
        frame.ebp,
        frame.esp
    );
    log::error!(
        "    EFL {:#010x}  CR0 {:#010x}  CR2 {:#010x}  CR3 {:#010x}",
        frame.eflags,
        frame.cr0,
        frame.cr2,
        frame.cr3
    );
    log::error!(
        "    CS {:#06x}  DS {:#06x}  SS {:#06x}  ES {:#06x}  FS {:#06x}  GS {:#06x}",
        frame.cs,
        frame.ds,
        frame.ss,
        frame.es,
        frame.fs,
        frame.gs
    );

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        log::error!("kernel panic: {}", msg);
        crate::arch::halt_forever();
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    panic!("kernel panic: {}", msg);
}
