//! The task table and the scheduling decision
//!
//! [`TaskTable`] is a pure state machine over the fixed slot array:
//! selection, aging, alarms and spawning are all ordinary methods so the
//! host test harness can drive them tick by tick. The globals and the
//! actual stack/CR3 handoff live in [`super`]; nothing here touches
//! hardware except through the spawn path's page allocations.

use core::ptr;

use super::task::{Pid, TaskSlot, TaskState, COUNTER_PRIME, NUM_TASKS};
use crate::arch;
use crate::error::{KernelError, KernelResult};
use crate::mm::page_table::{PageTableEntry, PteFlags, SELF_MAP_INDEX};
use crate::mm::{vmm, VirtAddr, PAGE_SIZE};
use crate::trap::TrapFrame;

/// Quanta between forced round-robin checks: the running task holds the
/// CPU for at most 10 ticks (100 ms).
pub const SCHEDULE_SLICE: u32 = 10;

/// Milliseconds represented by one timer tick.
pub const MS_PER_TICK: u32 = 10;

/// A scheduling decision that requires a context switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPlan {
    pub prev: usize,
    pub next: usize,
}

/// The process table plus the scheduler's working state.
pub struct TaskTable {
    slots: [TaskSlot; NUM_TASKS],
    /// Index of the running task. Always names a non-free slot while the
    /// kernel is live (the idle slot backstops everything).
    pub current: usize,
    next_pid: u32,
    schedule_timer: u32,
    need_resched: bool,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            slots: [const { TaskSlot::new() }; NUM_TASKS],
            current: 0,
            next_pid: 1,
            schedule_timer: SCHEDULE_SLICE,
            need_resched: false,
        }
    }

    /// Reset the table and install the idle task in slot 0. The boot CPU
    /// *is* the idle task: `main` falls into the idle loop after init, so
    /// slot 0 needs no synthetic frame, only the kernel address space.
    pub fn init(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.reset();
        }
        self.current = 0;
        self.next_pid = 1;
        self.schedule_timer = SCHEDULE_SLICE;
        self.need_resched = false;

        let idle = &mut self.slots[0];
        idle.pid = Pid::IDLE;
        idle.state = TaskState::Runnable;
        idle.page_dir = vmm::kernel_directory();
        idle.cr3 = vmm::kernel_cr3();
    }

    pub fn slot(&self, index: usize) -> &TaskSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut TaskSlot {
        &mut self.slots[index]
    }

    pub fn current_slot(&self) -> &TaskSlot {
        &self.slots[self.current]
    }

    pub fn current_slot_mut(&mut self) -> &mut TaskSlot {
        &mut self.slots[self.current]
    }

    /// Look up a live task by PID. Freed slots do not match, even though
    /// they keep their stale `pid` field until reuse.
    pub fn index_by_pid(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| !s.is_free() && s.pid == pid)
    }

    pub fn task_by_pid_mut(&mut self, pid: Pid) -> Option<&mut TaskSlot> {
        let index = self.index_by_pid(pid)?;
        Some(&mut self.slots[index])
    }

    pub fn runnable_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_runnable()).count()
    }

    pub fn schedule_timer(&self) -> u32 {
        self.schedule_timer
    }

    /// Ask for a reschedule at the next dispatcher exit.
    pub fn request_resched(&mut self) {
        self.need_resched = true;
    }

    /// Consume the pending-reschedule flag.
    pub fn take_resched(&mut self) -> bool {
        core::mem::take(&mut self.need_resched)
    }

    /// Claim and clear a free slot, assigning the next PID.
    fn allocate_slot(&mut self) -> KernelResult<usize> {
        let index = self
            .slots
            .iter()
            .position(|s| s.is_free())
            .ok_or(KernelError::TaskTableFull)?;
        self.slots[index].reset();
        self.slots[index].pid = Pid(self.next_pid);
        self.next_pid += 1;
        Ok(index)
    }

    /// Spawn a privileged kernel thread entering at `entry`.
    ///
    /// One kernel page becomes its stack; a synthetic trap frame at the
    /// top makes the first context switch `iret` straight into `entry`
    /// with interrupts enabled.
    pub fn spawn_kthread(&mut self, entry: fn() -> !) -> KernelResult<Pid> {
        let index = self.allocate_slot()?;
        let stack = vmm::alloc_kernel_page(PteFlags::WRITABLE)?;
        // SAFETY: fresh exclusive page; the synthetic-frame invariant
        // requires every word not explicitly written to be zero.
        unsafe { ptr::write_bytes(stack.as_mut_ptr::<u8>(), 0, PAGE_SIZE) };

        let stack_top = stack.as_usize() + PAGE_SIZE;
        let frame = TrapFrame::new_kthread(entry as usize);
        // SAFETY: stack_top bounds the page just allocated and zeroed.
        let kernel_esp = unsafe { arch::x86::entry::seed_task_stack(stack_top, &frame) };

        let pid = {
            let slot = &mut self.slots[index];
            slot.kernel_esp = kernel_esp;
            slot.tss_esp0 = stack_top;
            slot.page_dir = vmm::kernel_directory();
            slot.cr3 = vmm::kernel_cr3();
            slot.state = TaskState::Runnable;
            slot.pid
        };
        log::info!("[SCHED] spawned kernel thread pid {}", pid);
        Ok(pid)
    }

    /// Spawn an unprivileged task entering at `entry` in its own address
    /// space.
    ///
    /// The new directory copies the kernel half from the idle task's
    /// directory (kernel addresses are universally mapped) and installs
    /// *itself* in the self-map slot. The task starts `Sleeping`; the
    /// creator maps its code pages with
    /// [`vmm::alloc_user_page`] and then flips it runnable with
    /// [`TaskTable::set_runnable`].
    pub fn spawn_task(&mut self, entry: VirtAddr) -> KernelResult<Pid> {
        let index = self.allocate_slot()?;

        let dir = vmm::alloc_kernel_page(PteFlags::WRITABLE)?;
        let kernel_dir = vmm::kernel_directory();
        // SAFETY: `dir` is a fresh exclusive page; the kernel directory is
        // a live page of the same size (absent only on host builds).
        unsafe {
            if kernel_dir.as_usize() != 0 {
                ptr::copy_nonoverlapping(
                    kernel_dir.as_ptr::<u8>(),
                    dir.as_mut_ptr::<u8>(),
                    PAGE_SIZE,
                );
            } else {
                ptr::write_bytes(dir.as_mut_ptr::<u8>(), 0, PAGE_SIZE);
            }
        }
        let cr3 = vmm::vtophys(dir).ok_or(KernelError::UnmappedAddress {
            vaddr: dir.as_usize(),
        })?;
        // The copied self-map slot still names the kernel directory;
        // repoint it at this directory so the space can edit itself while
        // active.
        // SAFETY: SELF_MAP_INDEX < 1024, inside the directory page.
        unsafe {
            dir.as_mut_ptr::<u32>().add(SELF_MAP_INDEX).write(
                PageTableEntry::new(cr3, PteFlags::PRESENT | PteFlags::WRITABLE).raw(),
            );
        }

        // Separate kernel stack for traps taken while this task runs.
        let kstack = vmm::alloc_kernel_page(PteFlags::WRITABLE)?;
        // SAFETY: fresh exclusive page, zeroed for the synthetic frame.
        unsafe { ptr::write_bytes(kstack.as_mut_ptr::<u8>(), 0, PAGE_SIZE) };
        let kstack_top = kstack.as_usize() + PAGE_SIZE;
        let frame = TrapFrame::new_user(entry.as_usize(), vmm::USER_STACK_TOP);
        // SAFETY: kstack_top bounds the page just allocated.
        let kernel_esp = unsafe { arch::x86::entry::seed_task_stack(kstack_top, &frame) };

        let pid = {
            let slot = &mut self.slots[index];
            slot.kernel_esp = kernel_esp;
            slot.tss_esp0 = kstack_top;
            slot.page_dir = dir;
            slot.cr3 = cr3.as_usize();
            slot.state = TaskState::Sleeping;
            slot.pid
        };
        log::info!("[SCHED] spawned user task pid {}", pid);
        Ok(pid)
    }

    /// Mark a spawned user task runnable once its memory is in place.
    pub fn set_runnable(&mut self, pid: Pid) -> KernelResult<()> {
        let slot = self
            .task_by_pid_mut(pid)
            .ok_or(KernelError::ProcessNotFound { pid: pid.as_u32() })?;
        slot.state = TaskState::Runnable;
        slot.alarm = 0;
        Ok(())
    }

    /// Kill the running task: free its slot, log the one-line diagnostic
    /// and ask for a reschedule. The kernel survives; the task's memory
    /// is deliberately leaked.
    pub fn kill_current(&mut self, reason: &str, eip: u32) {
        let slot = &mut self.slots[self.current];
        let pid = slot.pid;
        slot.state = TaskState::Free;
        log::warn!("{}: killed {} (eip {:#010x})", reason, pid, eip);
        self.need_resched = true;
    }

    /// Round-robin selection with aging: the longest-waiting runnable
    /// task wins, ties go to the lowest slot index, and the idle task is
    /// picked only when nothing else is runnable.
    pub fn pick_next(&self) -> usize {
        let mut next = 0;
        for (index, slot) in self.slots.iter().enumerate().skip(1) {
            if !slot.is_runnable() {
                continue;
            }
            if next == 0 || slot.counter > self.slots[next].counter {
                next = index;
            }
        }
        next
    }

    /// Make the scheduling decision: select, age the losers, reset the
    /// slice. Returns the switch to perform, or `None` when the same
    /// task keeps the CPU.
    ///
    /// Interrupts must be disabled across this call and the switch that
    /// consumes the plan.
    pub fn schedule(&mut self) -> Option<SwitchPlan> {
        let next = self.pick_next();

        for index in 1..NUM_TASKS {
            if index != next && self.slots[index].is_runnable() {
                self.slots[index].counter = self.slots[index].counter.saturating_add(1);
            }
        }
        self.slots[next].counter = 0;
        self.schedule_timer = SCHEDULE_SLICE;
        self.need_resched = false;

        let prev = self.current;
        if next == prev {
            return None;
        }
        self.current = next;
        #[cfg(feature = "debug-scheduler")]
        log::trace!(
            "[SCHED] switch {} -> {}",
            self.slots[prev].pid,
            self.slots[next].pid
        );
        Some(SwitchPlan { prev, next })
    }

    /// One 10 ms tick: burn the slice, advance sleep alarms, wake expired
    /// sleepers (primed to win the next decision) and request a
    /// reschedule when either the slice ran out or somebody woke.
    pub fn timer_tick(&mut self) {
        self.schedule_timer = self.schedule_timer.saturating_sub(1);

        for slot in self.slots.iter_mut() {
            if slot.state == TaskState::Sleeping {
                slot.alarm = slot.alarm.saturating_sub(MS_PER_TICK);
            }
        }

        let mut woke = false;
        for slot in self.slots.iter_mut() {
            if slot.state == TaskState::Sleeping && slot.alarm == 0 {
                slot.state = TaskState::Runnable;
                slot.counter = COUNTER_PRIME;
                woke = true;
            }
        }

        if woke || self.schedule_timer == 0 {
            self.need_resched = true;
        }
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

    fn noop_task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// A table with `n` runnable kernel threads (pids 1..=n).
    fn table_with_kthreads(n: usize) -> TaskTable {
        let mut table = TaskTable::new();
        table.init();
        for _ in 0..n {
            table.spawn_kthread(noop_task).unwrap();
        }
        table
    }

    #[test]
    fn init_leaves_exactly_idle_runnable() {
        let mut table = TaskTable::new();
        table.init();
        assert_eq!(table.runnable_count(), 1);
        assert_eq!(table.current, 0);
        assert_eq!(table.current_slot().pid, Pid::IDLE);
        assert!(table.current_slot().is_runnable());
    }

    #[test]
    fn spawn_assigns_monotonic_pids_and_seeds_stacks() {
        let mut table = table_with_kthreads(3);
        assert_eq!(table.slot(1).pid, Pid(1));
        assert_eq!(table.slot(2).pid, Pid(2));
        assert_eq!(table.slot(3).pid, Pid(3));
        for i in 1..=3 {
            let slot = table.slot(i);
            assert!(slot.is_runnable());
            assert_ne!(slot.kernel_esp, 0);
            assert_eq!(slot.tss_esp0 - slot.kernel_esp, 20 + 88);
        }
        // PIDs resolve; a free slot's stale pid does not.
        assert_eq!(table.index_by_pid(Pid(2)), Some(2));
        table.slot_mut(2).state = TaskState::Free;
        assert_eq!(table.index_by_pid(Pid(2)), None);
    }

    #[test]
    fn idle_picked_only_when_nothing_runnable() {
        let mut table = table_with_kthreads(2);
        table.slot_mut(1).state = TaskState::Sleeping;
        table.slot_mut(2).state = TaskState::Sleeping;
        assert_eq!(table.pick_next(), 0);

        table.slot_mut(2).state = TaskState::Runnable;
        assert_eq!(table.pick_next(), 2);
    }

    #[test]
    fn longest_waiting_runnable_wins_ties_to_lowest_index() {
        let mut table = table_with_kthreads(3);
        table.slot_mut(1).counter = 4;
        table.slot_mut(2).counter = 9;
        table.slot_mut(3).counter = 9;
        assert_eq!(table.pick_next(), 2);
    }

    #[test]
    fn schedule_ages_losers_and_resets_winner() {
        let mut table = table_with_kthreads(3);
        table.slot_mut(1).counter = 5;
        let plan = table.schedule().unwrap();
        assert_eq!(plan, SwitchPlan { prev: 0, next: 1 });
        assert_eq!(table.current, 1);
        assert_eq!(table.slot(1).counter, 0);
        assert_eq!(table.slot(2).counter, 1);
        assert_eq!(table.slot(3).counter, 1);
        assert_eq!(table.schedule_timer(), SCHEDULE_SLICE);
    }

    #[test]
    fn fairness_every_task_runs_within_k_quanta() {
        const K: usize = 5;
        let mut table = table_with_kthreads(K);
        let mut seen = [false; K + 1];
        for _ in 0..K {
            table.schedule();
            let pid = table.current_slot().pid.as_u32() as usize;
            assert!(pid >= 1 && pid <= K);
            assert!(!seen[pid], "pid {} ran twice before the field ran once", pid);
            seen[pid] = true;
        }
        assert!(seen[1..=K].iter().all(|&ran| ran));
    }

    #[test]
    fn tick_wakes_expired_sleepers_and_primes_them() {
        let mut table = table_with_kthreads(2);
        table.slot_mut(1).state = TaskState::Sleeping;
        table.slot_mut(1).alarm = 25;

        table.timer_tick();
        assert_eq!(table.slot(1).state, TaskState::Sleeping);
        assert_eq!(table.slot(1).alarm, 15);
        table.timer_tick();
        assert_eq!(table.slot(1).alarm, 5);
        assert!(!table.take_resched());

        // Third tick clamps to zero and wakes immediately.
        table.timer_tick();
        assert_eq!(table.slot(1).state, TaskState::Runnable);
        assert_eq!(table.slot(1).counter, COUNTER_PRIME);
        assert!(table.take_resched());

        // The primed sleeper beats everyone at the next decision.
        assert_eq!(table.pick_next(), 1);
    }

    #[test]
    fn zero_sleep_expires_on_next_tick() {
        let mut table = table_with_kthreads(1);
        table.slot_mut(1).state = TaskState::Sleeping;
        table.slot_mut(1).alarm = 0;
        table.timer_tick();
        assert!(table.slot(1).is_runnable());
        assert!(table.take_resched());
    }

    #[test]
    fn slice_exhaustion_requests_resched_after_ten_ticks() {
        let mut table = table_with_kthreads(2);
        table.schedule();
        for _ in 0..SCHEDULE_SLICE - 1 {
            table.timer_tick();
            assert!(!table.take_resched());
        }
        table.timer_tick();
        assert!(table.take_resched());
    }

    #[test]
    fn killed_slot_is_reused_by_next_spawn() {
        let mut table = table_with_kthreads(2);
        table.schedule();
        let victim = table.current;
        let victim_pid = table.current_slot().pid;
        table.current_slot_mut().mailbox.push(crate::ipc::Message::new(Pid(9), [1; 5])).unwrap();

        table.kill_current("Page fault", 0x8000_0010);
        assert!(table.slot(victim).is_free());
        assert!(table.take_resched());
        assert_ne!(table.pick_next(), victim);

        let new_pid = table.spawn_kthread(noop_task).unwrap();
        assert_ne!(new_pid, victim_pid);
        let reused = table.index_by_pid(new_pid).unwrap();
        assert_eq!(reused, victim, "lowest free slot is recycled");
        assert!(table.slot(reused).mailbox.is_empty());
        assert_eq!(table.slot(reused).counter, 0);
    }

    #[test]
    fn user_spawn_builds_own_directory_and_sleeps() {
        let mut table = TaskTable::new();
        table.init();
        let pid = table.spawn_task(VirtAddr::new(vmm::USER_IMAGE_BASE)).unwrap();
        let index = table.index_by_pid(pid).unwrap();
        let slot = table.slot(index);
        assert_eq!(slot.state, TaskState::Sleeping);
        assert_ne!(slot.page_dir.as_usize(), 0);
        assert_ne!(slot.cr3, 0);
        // The self-map entry names the task's own directory.
        // SAFETY: page_dir aliases the directory page owned by the slot.
        let self_entry = unsafe {
            PageTableEntry::from_raw(
                slot.page_dir.as_ptr::<u32>().add(SELF_MAP_INDEX).read(),
            )
        };
        assert!(self_entry.is_present());
        assert_eq!(self_entry.frame().as_usize(), slot.cr3 & !0xFFF);

        table.set_runnable(pid).unwrap();
        assert!(table.slot(index).is_runnable());
    }

    #[test]
    fn table_full_is_reported() {
        let mut table = TaskTable::new();
        table.init();
        for _ in 0..NUM_TASKS - 1 {
            table.spawn_kthread(noop_task).unwrap();
        }
        assert_eq!(
            table.spawn_kthread(noop_task),
            Err(KernelError::TaskTableFull)
        );
    }
}
