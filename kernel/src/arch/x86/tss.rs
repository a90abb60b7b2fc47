//! Task state segment
//!
//! The kernel owns a single TSS whose only job is to supply `esp0`/`ss0`
//! for ring-3 to ring-0 transitions. The boot stub points the `0x28` GDT
//! descriptor at [`TSS`] and loads TR; after that the scheduler updates
//! `esp0` on every context switch so traps land on the incoming task's
//! kernel stack.

use core::sync::atomic::{AtomicU32, Ordering};

use super::segment::KERNEL_DS;

/// 32-bit task state segment, hardware layout. The 16-bit selector fields
/// occupy a full doubleword each (upper half reserved-zero), so plain
/// `u32` fields reproduce the memory image exactly.
#[repr(C)]
pub struct TaskStateSegment {
    pub link: u32,
    pub esp0: u32,
    pub ss0: u32,
    pub esp1: u32,
    pub ss1: u32,
    pub esp2: u32,
    pub ss2: u32,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u32,
    pub cs: u32,
    pub ss: u32,
    pub ds: u32,
    pub fs: u32,
    pub gs: u32,
    pub ldtr: u32,
    pub iopb_offset: u32,
}

static_assertions::const_assert_eq!(core::mem::size_of::<TaskStateSegment>(), 104);

// Only esp0/ss0 are ever read by the CPU in this kernel; the rest stays
// zero. Kept as an atomic rather than the raw struct so the scheduler can
// update it without a lock.
static TSS_ESP0: AtomicU32 = AtomicU32::new(0);

/// The TSS installed by the boot stub.
///
/// `ss0` must be the kernel data selector before the first ring-3 task
/// runs; [`init`] writes it.
pub static mut TSS: TaskStateSegment = TaskStateSegment {
    link: 0,
    esp0: 0,
    ss0: 0,
    esp1: 0,
    ss1: 0,
    esp2: 0,
    ss2: 0,
    cr3: 0,
    eip: 0,
    eflags: 0,
    eax: 0,
    ecx: 0,
    edx: 0,
    ebx: 0,
    esp: 0,
    ebp: 0,
    esi: 0,
    edi: 0,
    es: 0,
    cs: 0,
    ss: 0,
    ds: 0,
    fs: 0,
    gs: 0,
    ldtr: 0,
    iopb_offset: 0,
};

/// Seed `ss0` and disable the I/O permission bitmap.
pub fn init() {
    // SAFETY: called once during boot, before interrupts are enabled and
    // before any ring-3 task exists, so nothing else references TSS yet.
    unsafe {
        let tss = &raw mut TSS;
        (*tss).ss0 = KERNEL_DS;
        (*tss).iopb_offset = core::mem::size_of::<TaskStateSegment>() as u32;
    }
}

/// Update the kernel stack used for ring-3 -> ring-0 transitions.
///
/// Called from the context switch with interrupts disabled.
pub fn set_esp0(esp0: u32) {
    TSS_ESP0.store(esp0, Ordering::Relaxed);
    // SAFETY: single-CPU kernel, interrupts are disabled for the duration
    // of the context switch, so no trap can read esp0 mid-update.
    unsafe {
        let tss = &raw mut TSS;
        (*tss).esp0 = esp0;
    }
}

/// Read back the current `esp0` value.
pub fn esp0() -> u32 {
    TSS_ESP0.load(Ordering::Relaxed)
}
