//! GDT segment selectors
//!
//! The GDT itself is built by the boot stub; the kernel only consumes the
//! selector values. Changing the layout here cascades into every synthetic
//! trap frame, so the values are centralized.
//!
//! Layout:
//! - `0x00`: Null descriptor
//! - `0x08`: Kernel code segment (Ring 0)
//! - `0x10`: Kernel data segment (Ring 0)
//! - `0x18`: User code segment (Ring 3, selector `0x1B` with RPL)
//! - `0x20`: User data segment (Ring 3, selector `0x23` with RPL)
//! - `0x28`: TSS

/// Kernel code selector. A trap frame with `cs == KERNEL_CS` was taken in
/// kernel mode.
pub const KERNEL_CS: u32 = 0x08;

/// Kernel data/stack selector.
pub const KERNEL_DS: u32 = 0x10;

/// User code selector including RPL 3.
pub const USER_CS: u32 = 0x1B;

/// User data/stack selector including RPL 3.
pub const USER_DS: u32 = 0x23;

/// Task state segment selector, loaded into TR by the boot stub.
pub const TSS_SELECTOR: u16 = 0x28;
