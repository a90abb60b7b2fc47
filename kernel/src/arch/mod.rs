//! Architecture support
//!
//! System Alpha targets i386 protected mode only; this module exists to
//! keep the instruction-level code behind one seam. Generic kernel code
//! imports the intrinsics from here rather than from `x86` directly.

pub mod x86;

pub use x86::{
    disable_interrupts, enable_interrupts, flush_tlb, halt, halt_forever, interrupts_enabled,
    read_cr0, read_cr2, read_cr3,
};
