//! Interrupt descriptor table
//!
//! Exceptions 0-18 sit at their native vectors, the remapped IRQs at
//! `0x20..=0x2F`, and the syscall gate at `0xFF` with DPL 3 so ring-3
//! code can reach it. Every gate targets one of the entry thunks from
//! [`super::entry`]; dispatch by vector happens in software.

use lazy_static::lazy_static;

use super::pic;
use super::segment::KERNEL_CS;

/// One 8-byte interrupt gate.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    base_low: u16,
    segment: u16,
    reserved: u8,
    flags: u8,
    base_high: u16,
}

/// 32-bit interrupt gate, present, DPL 0.
const GATE_KERNEL: u8 = 0x8E;

/// 32-bit interrupt gate, present, DPL 3 (reachable via `int` from ring 3).
const GATE_USER: u8 = 0xEE;

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            base_low: 0,
            segment: 0,
            reserved: 0,
            flags: 0,
            base_high: 0,
        }
    }

    fn new(handler: unsafe extern "C" fn(), flags: u8) -> Self {
        let base = handler as usize as u32;
        Self {
            base_low: (base & 0xFFFF) as u16,
            segment: KERNEL_CS as u16,
            reserved: 0,
            flags,
            base_high: (base >> 16) as u16,
        }
    }
}

/// Operand for `lidt`.
#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn irq0();
    fn irq1();
    fn irq2();
    fn irq3();
    fn irq4();
    fn irq5();
    fn irq6();
    fn irq7();
    fn irq8();
    fn irq9();
    fn irq10();
    fn irq11();
    fn irq12();
    fn irq13();
    fn irq14();
    fn irq15();
    fn isr_sys();
}

lazy_static! {
    static ref IDT: [IdtEntry; 256] = {
        let mut idt = [IdtEntry::missing(); 256];

        const EXCEPTIONS: [unsafe extern "C" fn(); 19] = [
            isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12,
            isr13, isr14, isr15, isr16, isr17, isr18,
        ];
        const IRQS: [unsafe extern "C" fn(); 16] = [
            irq0, irq1, irq2, irq3, irq4, irq5, irq6, irq7, irq8, irq9, irq10, irq11, irq12,
            irq13, irq14, irq15,
        ];

        for (vector, handler) in EXCEPTIONS.iter().enumerate() {
            idt[vector] = IdtEntry::new(*handler, GATE_KERNEL);
        }
        for (line, handler) in IRQS.iter().enumerate() {
            idt[pic::IRQ_VECTOR_BASE as usize + line] = IdtEntry::new(*handler, GATE_KERNEL);
        }
        idt[crate::trap::VECTOR_SYSCALL as usize] = IdtEntry::new(isr_sys, GATE_USER);

        idt
    };
}

/// Remap the PICs and load the IDT. Interrupts stay disabled; the idle
/// task turns them on once the scheduler is live.
pub fn init() {
    pic::remap();

    let pointer = IdtPointer {
        limit: (core::mem::size_of::<[IdtEntry; 256]>() - 1) as u16,
        base: IDT.as_ptr() as usize as u32,
    };
    // SAFETY: the IDT is a 'static lazy_static and every installed gate
    // targets a live entry thunk, so the table remains valid for the
    // lifetime of the kernel.
    unsafe {
        core::arch::asm!("lidt [{}]", in(reg) &pointer, options(readonly, nostack));
    }
}
