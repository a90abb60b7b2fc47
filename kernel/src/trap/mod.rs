//! Interrupt dispatch
//!
//! Every ISR/IRQ/syscall thunk pushes a complete [`TrapFrame`] and calls
//! [`handle_interrupt`], the single funnel. Vector `0xFF` goes to the
//! syscall layer, the remapped IRQ range to dynamically installed driver
//! handlers (EOI follows, slave first for the high lines), and anything
//! else to the CPU-exception policy. A reschedule requested anywhere in
//! the handler body runs once, on the way out, after the EOI and with the
//! table lock free.

pub mod frame;

mod exception;

use spin::Mutex;

pub use frame::{TrapFrame, EFLAGS_IF};

use crate::arch::x86::pic;
use crate::sched;

/// Vector of the timer IRQ (IRQ 0 after remap).
pub const VECTOR_TIMER: u32 = 0x20;

/// First and last vectors of the remapped IRQ range.
pub const VECTOR_IRQ_BASE: u32 = 0x20;
pub const VECTOR_IRQ_LAST: u32 = 0x2F;

/// The syscall gate.
pub const VECTOR_SYSCALL: u32 = 0xFF;

/// Number of legacy IRQ lines.
pub const NUM_IRQS: usize = 16;

/// A driver-installed IRQ handler. Invoked with no arguments; drivers
/// keep their own state.
pub type IrqHandler = fn();

/// Dynamically installed IRQ handler slots.
static IRQ_HANDLERS: Mutex<[Option<IrqHandler>; NUM_IRQS]> = Mutex::new([None; NUM_IRQS]);

/// Install the IDT and remap the PICs. Interrupts remain disabled until
/// the idle loop turns them on.
pub fn init() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    crate::arch::x86::idt::init();
    log::info!("[TRAP] interrupt dispatch ready");
}

/// Install (or replace) the handler for an IRQ line.
pub fn install_isr(irq: usize, handler: IrqHandler) {
    if irq >= NUM_IRQS {
        log::warn!("[TRAP] ignoring handler for bogus IRQ {}", irq);
        return;
    }
    IRQ_HANDLERS.lock()[irq] = Some(handler);
}

/// The single interrupt funnel. Called by the entry thunks with a pointer
/// to the frame they pushed; the frame is live stack memory of the
/// interrupted task, and writes to it (syscall return values) surface in
/// its registers at `iret`.
#[no_mangle]
pub extern "C" fn handle_interrupt(frame: &mut TrapFrame) {
    match frame.vector {
        VECTOR_SYSCALL => crate::syscall::handle(frame),
        VECTOR_IRQ_BASE..=VECTOR_IRQ_LAST => handle_irq(frame),
        _ => exception::handle(frame),
    }

    // A tick, a blocking syscall or a kill may have asked to reschedule.
    // Doing it here, after the handler body and the EOI, means the
    // switch happens with no locks held and the PIC already open.
    sched::run_pending_resched();
}

fn handle_irq(frame: &TrapFrame) {
    let irq = (frame.vector - VECTOR_IRQ_BASE) as usize;
    let handler = IRQ_HANDLERS.lock()[irq];
    if let Some(handler) = handler {
        handler();
    }
    pic::send_eoi(frame.vector);
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    static FIRED: AtomicUsize = AtomicUsize::new(0);

    fn counting_handler() {
        FIRED.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn installed_irq_handler_is_dispatched() {
        install_isr(5, counting_handler);

        let mut frame = TrapFrame::zeroed();
        frame.vector = VECTOR_IRQ_BASE + 5;
        frame.cs = crate::arch::x86::segment::KERNEL_CS;
        let before = FIRED.load(Ordering::SeqCst);
        handle_interrupt(&mut frame);
        assert_eq!(FIRED.load(Ordering::SeqCst), before + 1);

        // An IRQ with no handler is acknowledged and otherwise ignored.
        let mut other = TrapFrame::zeroed();
        other.vector = VECTOR_IRQ_BASE + 11;
        other.cs = crate::arch::x86::segment::KERNEL_CS;
        handle_interrupt(&mut other);
        assert_eq!(FIRED.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn bogus_irq_number_is_rejected() {
        // Must not panic or clobber slot state.
        install_isr(NUM_IRQS, counting_handler);
        install_isr(usize::MAX, counting_handler);
    }
}
