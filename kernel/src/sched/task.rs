//! Task slots
//!
//! The process table is a fixed array of [`NUM_TASKS`] slots; a slot is
//! the complete kernel-side identity of a task. The fields below are the
//! minimum the context switch needs (`kernel_esp`, `tss_esp0`, `cr3`)
//! plus the ownership records that make everything else reachable: the
//! page-directory alias, the user page lists and the mailbox.

use crate::ipc::Mailbox;
use crate::mm::vmm::PageList;
use crate::mm::VirtAddr;

/// Size of the process table. Slot 0 is reserved for the idle task.
pub const NUM_TASKS: usize = 64;

/// Aging counter value primed into a freshly woken sleeper so the
/// scheduler picks it at the next decision point. Leaves headroom below
/// `u32::MAX` for the per-quantum increments.
pub const COUNTER_PRIME: u32 = 0x0FFF_FFFF;

/// Process identifier. Monotonically increasing; 0 names the idle task
/// and is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    pub const IDLE: Pid = Pid(0);

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task state. A task is on at most one implicit list, named by its
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is unoccupied (or the task was killed).
    Free,
    /// Ready to run; a candidate for the scheduler.
    Runnable,
    /// Waiting for its alarm to expire.
    Sleeping,
    /// Parked on a resource with no timeout.
    Waiting,
}

/// One process-table entry.
pub struct TaskSlot {
    pub state: TaskState,
    pub pid: Pid,

    /// Saved kernel stack pointer; the complete suspended context hangs
    /// off it.
    pub kernel_esp: usize,
    /// Stack the CPU adopts on a ring-3 -> ring-0 transition while this
    /// task runs.
    pub tss_esp0: usize,
    /// Physical address of this task's page directory.
    pub cr3: usize,

    /// Kernel alias of the page directory page (the boot directory for
    /// kernel tasks).
    pub page_dir: VirtAddr,
    /// User data pages owned by this task.
    pub pages: PageList,
    /// User page tables owned by this task.
    pub page_tables: PageList,

    /// Aging priority: quanta spent runnable without being picked.
    pub counter: u32,
    /// Sleep countdown in milliseconds; meaningful while `Sleeping`.
    pub alarm: u32,

    /// Pending incoming messages.
    pub mailbox: Mailbox,
}

impl TaskSlot {
    pub const fn new() -> Self {
        Self {
            state: TaskState::Free,
            pid: Pid(0),
            kernel_esp: 0,
            tss_esp0: 0,
            cr3: 0,
            page_dir: VirtAddr::new(0),
            pages: PageList::new(),
            page_tables: PageList::new(),
            counter: 0,
            alarm: 0,
            mailbox: Mailbox::new(),
        }
    }

    /// Clear the slot for reuse. Page records are detached, not freed;
    /// this is the intentional leak on task death.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_free(&self) -> bool {
        self.state == TaskState::Free
    }

    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Runnable
    }
}

impl Default for TaskSlot {
    fn default() -> Self {
        Self::new()
    }
}
