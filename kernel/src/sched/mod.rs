//! Task management and the preemptive scheduler
//!
//! The table itself ([`scheduler::TaskTable`]) is a pure state machine;
//! this module owns the one global instance and the points where the
//! decision meets the hardware: every entry runs under an
//! [`IrqGuard`](crate::sync::IrqGuard), the spin lock is released
//! *before* the stack handoff, and blocking paths never switch inline:
//! they raise the need-resched flag and the dispatcher performs the
//! switch on its way out.

pub mod scheduler;
pub mod task;

use spin::Mutex;

pub use scheduler::{SwitchPlan, TaskTable, MS_PER_TICK, SCHEDULE_SLICE};
pub use task::{Pid, TaskSlot, TaskState, COUNTER_PRIME, NUM_TASKS};

use crate::arch;
use crate::error::KernelResult;
use crate::mm::VirtAddr;
use crate::sync::IrqGuard;

/// The global process table.
static TASK_TABLE: Mutex<TaskTable> = Mutex::new(TaskTable::new());

/// Run `f` on the global table with interrupts disabled.
pub fn with_table<R>(f: impl FnOnce(&mut TaskTable) -> R) -> R {
    let _guard = IrqGuard::new();
    f(&mut TASK_TABLE.lock())
}

/// Install the idle task and reset the table. Called once at boot.
pub fn init() {
    with_table(|table| table.init());
    log::info!("[SCHED] process table ready ({} slots)", NUM_TASKS);
}

/// PID of the running task.
pub fn current_pid() -> Pid {
    with_table(|table| table.current_slot().pid)
}

/// Spawn a kernel thread. See [`TaskTable::spawn_kthread`].
pub fn spawn_kthread(entry: fn() -> !) -> KernelResult<Pid> {
    with_table(|table| table.spawn_kthread(entry))
}

/// Spawn a user task (initially sleeping). See [`TaskTable::spawn_task`].
pub fn spawn_task(entry: VirtAddr) -> KernelResult<Pid> {
    with_table(|table| table.spawn_task(entry))
}

/// Flip a prepared user task runnable.
pub fn set_runnable(pid: Pid) -> KernelResult<()> {
    with_table(|table| table.set_runnable(pid))
}

/// Timer-tick entry, invoked from the IRQ 0 handler.
pub fn timer_tick() {
    with_table(|table| table.timer_tick());
}

/// Make a scheduling decision and, if another task won, hand the CPU
/// over. The table lock is dropped before the switch: the incoming task
/// will take it for its own critical sections, and a held spin lock
/// across the handoff would deadlock the whole machine.
pub fn schedule() {
    let _guard = IrqGuard::new();
    let handoff = {
        let mut table = TASK_TABLE.lock();
        table.schedule().map(|plan| {
            let next = table.slot(plan.next);
            let next_esp = next.kernel_esp;
            let next_cr3 = next.cr3;
            let next_esp0 = next.tss_esp0 as u32;
            let prev_esp_slot = &mut table.slot_mut(plan.prev).kernel_esp as *mut usize;
            (prev_esp_slot, next_esp, next_cr3, next_esp0)
        })
    };

    if let Some((prev_esp_slot, next_esp, next_cr3, next_esp0)) = handoff {
        // SAFETY: interrupts are disabled; the pointer targets the static
        // table, whose storage never moves, and on this uniprocessor
        // nothing else runs until the switch completes.
        unsafe { arch::x86::entry::context_switch(prev_esp_slot, next_esp, next_cr3, next_esp0) };
    }
}

/// Perform a pending reschedule, if one was requested. Called by the
/// dispatcher after the handler body, with the table lock free.
pub fn run_pending_resched() {
    let pending = with_table(|table| table.take_resched());
    if pending {
        schedule();
    }
}

/// The idle loop. The boot CPU becomes task 0 here; the scheduler picks
/// it only when every other slot is asleep or free.
pub fn idle_loop() -> ! {
    loop {
        arch::enable_interrupts();
        arch::halt();
    }
}
