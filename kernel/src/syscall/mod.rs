//! System call layer
//!
//! One software interrupt (`int 0xFF`) carries the call number in the
//! low byte of `eax`; the dispatcher indexes a fixed table of handlers,
//! each a function from the caller's trap frame to an `i32` result.
//! Blocking calls never switch inline: they raise the need-resched flag
//! (yielding the rest of the caller's slice) and return `-EAGAIN`, so the
//! return value always lands in the frame of the task that made the call
//! before anyone else runs.
//!
//! Kernel threads use the [`send`]/[`recv`]/[`sleep`] wrappers, which
//! loop on `-EAGAIN`: the failed attempt already yielded, so the retry
//! runs only after the scheduler picks the caller again. Semantically
//! that is a true block, not a spin.

use crate::error::Errno;
use crate::ipc::{IpcError, Message, MESSAGE_ARGS};
use crate::sched::{self, Pid, TaskState, TaskTable};
use crate::trap::TrapFrame;

/// Syscall numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    Send = 1,
    Recv = 2,
    Sleep = 3,
}

/// A syscall handler: caller's table state and trap frame in, `eax` out.
pub type SyscallFn = fn(&mut TaskTable, &mut TrapFrame) -> i32;

/// Fixed dispatch vector, indexed by call number. Slot 0 and anything
/// past the end answer `-ENOSYS`.
static SYSCALL_TABLE: [SyscallFn; 4] = [sys_none, sys_send, sys_recv, sys_sleep];

// The table is indexed by raw call number; keep it glued to the enum.
static_assertions::const_assert_eq!(Syscall::Send as usize, 1);
static_assertions::const_assert_eq!(Syscall::Recv as usize, 2);
static_assertions::const_assert_eq!(Syscall::Sleep as usize, 3);

/// Dispatch a syscall trap against the given table.
pub fn dispatch(table: &mut TaskTable, frame: &mut TrapFrame) -> i32 {
    let callno = (frame.eax & 0xFF) as usize;
    match SYSCALL_TABLE.get(callno) {
        Some(handler) => handler(table, frame),
        None => Errno::NoSys.as_ret(),
    }
}

/// Syscall entry from the interrupt dispatcher.
///
/// The result is written into `frame.eax` here, before any deferred
/// reschedule runs: `frame` still names the original caller's saved
/// context, so the value cannot land in another task's registers.
pub(crate) fn handle(frame: &mut TrapFrame) {
    #[cfg(feature = "debug-syscall")]
    let callno = frame.eax & 0xFF;
    let ret = sched::with_table(|table| dispatch(table, frame));
    frame.eax = ret as u32;
    #[cfg(feature = "debug-syscall")]
    log::trace!("[SYSCALL] {:#04x} -> {}", callno, ret);
}

fn sys_none(_table: &mut TaskTable, _frame: &mut TrapFrame) -> i32 {
    Errno::NoSys.as_ret()
}

/// `send(pid, a1..a5)`: target PID in `eax[8..23]`, arguments in
/// `ebx..edi`. Returns 0, `-EINVAL` for an unknown PID, or `-EAGAIN`
/// after yielding when the target mailbox is full.
fn sys_send(table: &mut TaskTable, frame: &mut TrapFrame) -> i32 {
    let target = Pid((frame.eax >> 8) & 0xFFFF);
    let args = [
        frame.ebx as i32,
        frame.ecx as i32,
        frame.edx as i32,
        frame.esi as i32,
        frame.edi as i32,
    ];
    match do_send(table, target, args) {
        Ok(()) => 0,
        Err(errno) => errno.as_ret(),
    }
}

/// `recv()`: dequeues the oldest pending message, writes its arguments
/// back into the caller's saved `ebx..edi` and returns the sender's PID,
/// or `-EAGAIN` after yielding when the mailbox is empty.
fn sys_recv(table: &mut TaskTable, frame: &mut TrapFrame) -> i32 {
    match do_recv(table) {
        Ok(message) => {
            frame.ebx = message.args[0] as u32;
            frame.ecx = message.args[1] as u32;
            frame.edx = message.args[2] as u32;
            frame.esi = message.args[3] as u32;
            frame.edi = message.args[4] as u32;
            message.sender.as_u32() as i32
        }
        Err(errno) => errno.as_ret(),
    }
}

/// `sleep(ms)`: duration in `ebx`. Always yields; returns 0 on wakeup.
fn sys_sleep(table: &mut TaskTable, frame: &mut TrapFrame) -> i32 {
    do_sleep(table, frame.ebx);
    0
}

/// Core of `send`, shared with the kernel-thread wrapper.
fn do_send(table: &mut TaskTable, target: Pid, args: [i32; MESSAGE_ARGS]) -> Result<(), Errno> {
    let sender = table.current_slot().pid;
    let receiver = match table.task_by_pid_mut(target) {
        Some(slot) => slot,
        None => return Err(Errno::Inval),
    };
    match receiver.mailbox.push(Message::new(sender, args)) {
        Ok(()) => Ok(()),
        Err(IpcError::MailboxFull) | Err(IpcError::MailboxEmpty) => {
            // Yield the rest of the slice; the caller retries after the
            // receiver had a chance to drain.
            table.request_resched();
            Err(Errno::Again)
        }
    }
}

/// Core of `recv`, shared with the kernel-thread wrapper.
fn do_recv(table: &mut TaskTable) -> Result<Message, Errno> {
    match table.current_slot_mut().mailbox.pop() {
        Some(message) => Ok(message),
        None => {
            table.request_resched();
            Err(Errno::Again)
        }
    }
}

/// Core of `sleep`.
fn do_sleep(table: &mut TaskTable, ms: u32) {
    let slot = table.current_slot_mut();
    slot.state = TaskState::Sleeping;
    slot.alarm = ms;
    table.request_resched();
}

// ---------------------------------------------------------------------------
// Kernel-thread wrappers
// ---------------------------------------------------------------------------

/// Send a message from kernel context, blocking until the receiver has
/// room.
pub fn send(target: Pid, args: [i32; MESSAGE_ARGS]) -> Result<(), Errno> {
    loop {
        match sched::with_table(|table| do_send(table, target, args)) {
            Err(Errno::Again) => sched::run_pending_resched(),
            other => return other,
        }
    }
}

/// Receive a message in kernel context, blocking until one arrives.
pub fn recv() -> Result<Message, Errno> {
    loop {
        match sched::with_table(do_recv) {
            Err(Errno::Again) => sched::run_pending_resched(),
            other => return other,
        }
    }
}

/// Sleep for at least `ms` milliseconds (tick-quantized).
pub fn sleep(ms: u32) {
    sched::with_table(|table| do_sleep(table, ms));
    sched::run_pending_resched();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::MAX_MESSAGES;

    fn noop_task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// Table with two kernel threads; current = pid 1.
    fn two_tasks() -> TaskTable {
        let mut table = TaskTable::new();
        table.init();
        table.spawn_kthread(noop_task).unwrap();
        table.spawn_kthread(noop_task).unwrap();
        table.schedule();
        assert_eq!(table.current_slot().pid, Pid(1));
        table
    }

    fn send_frame(target: u32, args: [i32; 5]) -> TrapFrame {
        let mut frame = TrapFrame::zeroed();
        frame.eax = Syscall::Send as u32 | (target << 8);
        frame.ebx = args[0] as u32;
        frame.ecx = args[1] as u32;
        frame.edx = args[2] as u32;
        frame.esi = args[3] as u32;
        frame.edi = args[4] as u32;
        frame
    }

    #[test]
    fn out_of_range_call_returns_enosys() {
        let mut table = two_tasks();
        let mut frame = TrapFrame::zeroed();
        frame.eax = 0;
        assert_eq!(dispatch(&mut table, &mut frame), Errno::NoSys.as_ret());
        frame.eax = 0x7F;
        assert_eq!(dispatch(&mut table, &mut frame), Errno::NoSys.as_ret());
        // Only the low byte selects the call.
        frame.eax = 0x0100;
        assert_eq!(dispatch(&mut table, &mut frame), Errno::NoSys.as_ret());
    }

    #[test]
    fn send_and_recv_round_trip_registers() {
        let mut table = two_tasks();
        let mut frame = send_frame(2, [7, -8, 9, 10, 11]);
        assert_eq!(dispatch(&mut table, &mut frame), 0);

        // Switch roles: pid 2 receives.
        table.current = table.index_by_pid(Pid(2)).unwrap();
        let mut rframe = TrapFrame::zeroed();
        rframe.eax = Syscall::Recv as u32;
        let ret = dispatch(&mut table, &mut rframe);
        assert_eq!(ret, 1, "recv returns the sender's pid");
        assert_eq!(rframe.ebx as i32, 7);
        assert_eq!(rframe.ecx as i32, -8);
        assert_eq!(rframe.edx as i32, 9);
        assert_eq!(rframe.esi as i32, 10);
        assert_eq!(rframe.edi as i32, 11);
    }

    #[test]
    fn send_to_unknown_pid_is_einval() {
        let mut table = two_tasks();
        let mut frame = send_frame(42, [0; 5]);
        assert_eq!(dispatch(&mut table, &mut frame), Errno::Inval.as_ret());
        assert!(!table.take_resched(), "EINVAL does not yield");
    }

    #[test]
    fn full_mailbox_yields_and_returns_eagain() {
        let mut table = two_tasks();
        for i in 0..MAX_MESSAGES as i32 {
            let mut frame = send_frame(2, [i, 0, 0, 0, 0]);
            assert_eq!(dispatch(&mut table, &mut frame), 0);
        }
        assert!(!table.take_resched());

        let mut frame = send_frame(2, [64, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut table, &mut frame), Errno::Again.as_ret());
        assert!(table.take_resched(), "a blocked send yields its slice");

        // One recv opens one slot; the retried send lands last.
        table.current = table.index_by_pid(Pid(2)).unwrap();
        let mut rframe = TrapFrame::zeroed();
        rframe.eax = Syscall::Recv as u32;
        assert_eq!(dispatch(&mut table, &mut rframe), 1);

        table.current = table.index_by_pid(Pid(1)).unwrap();
        let mut frame = send_frame(2, [64, 0, 0, 0, 0]);
        assert_eq!(dispatch(&mut table, &mut frame), 0);
    }

    #[test]
    fn empty_mailbox_yields_and_returns_eagain() {
        let mut table = two_tasks();
        let mut frame = TrapFrame::zeroed();
        frame.eax = Syscall::Recv as u32;
        assert_eq!(dispatch(&mut table, &mut frame), Errno::Again.as_ret());
        assert!(table.take_resched());
    }

    #[test]
    fn sleep_parks_the_caller_with_its_alarm() {
        let mut table = two_tasks();
        let mut frame = TrapFrame::zeroed();
        frame.eax = Syscall::Sleep as u32;
        frame.ebx = 100;
        assert_eq!(dispatch(&mut table, &mut frame), 0);
        assert_eq!(table.current_slot().state, TaskState::Sleeping);
        assert_eq!(table.current_slot().alarm, 100);
        assert!(table.take_resched());
    }
}
