//! Interrupt entry thunks, first-entry trampoline and the context switch
//!
//! The assembly here is the only code that manipulates the
//! [`TrapFrame`](crate::trap::TrapFrame) layout positionally. Per-vector
//! stubs normalize the stack (a dummy error code where the CPU pushed
//! none, then the vector number) and fall into `trap_common`, which
//! completes the frame, switches to kernel data selectors and calls
//! `handle_interrupt` with a pointer to the frame.
//!
//! `iret_to_task` is the shared return epilogue. A freshly spawned task's
//! kernel stack is seeded so that `switch_stacks`' register pops and `ret`
//! land exactly there, making first entry indistinguishable from a resume.

use core::mem::size_of;

use crate::trap::TrapFrame;

#[cfg(all(target_arch = "x86", target_os = "none"))]
core::arch::global_asm!(
    r#"
.macro ISR_NOERR num
.global isr\num
isr\num:
    push 0
    push \num
    jmp trap_common
.endm

.macro ISR_ERR num
.global isr\num
isr\num:
    push \num
    jmp trap_common
.endm

.macro IRQ num, vector
.global irq\num
irq\num:
    push 0
    push \vector
    jmp trap_common
.endm

ISR_NOERR 0
ISR_NOERR 1
ISR_NOERR 2
ISR_NOERR 3
ISR_NOERR 4
ISR_NOERR 5
ISR_NOERR 6
ISR_NOERR 7
ISR_ERR   8
ISR_NOERR 9
ISR_ERR   10
ISR_ERR   11
ISR_ERR   12
ISR_ERR   13
ISR_ERR   14
ISR_NOERR 15
ISR_NOERR 16
ISR_ERR   17
ISR_NOERR 18

IRQ 0,  0x20
IRQ 1,  0x21
IRQ 2,  0x22
IRQ 3,  0x23
IRQ 4,  0x24
IRQ 5,  0x25
IRQ 6,  0x26
IRQ 7,  0x27
IRQ 8,  0x28
IRQ 9,  0x29
IRQ 10, 0x2A
IRQ 11, 0x2B
IRQ 12, 0x2C
IRQ 13, 0x2D
IRQ 14, 0x2E
IRQ 15, 0x2F

.global isr_sys
isr_sys:
    push 0
    push 0xFF
    jmp trap_common

trap_common:
    push gs
    push fs
    push es
    push ds
    pushad
    mov eax, cr3
    push eax
    mov eax, cr2
    push eax
    mov eax, cr0
    push eax
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax
    push esp
    call handle_interrupt
    add esp, 4

.global iret_to_task
iret_to_task:
    add esp, 12
    popad
    pop ds
    pop es
    pop fs
    pop gs
    add esp, 8
    iretd

# switch_stacks(prev_esp_slot: *mut u32, next_esp: u32)
#
# Saves the callee-saved registers and the current kernel stack pointer
# into the outgoing task, adopts the incoming task's stack and unwinds on
# it. For a first run the seeded stack sends `ret` into iret_to_task.
.global switch_stacks
switch_stacks:
    push ebx
    push esi
    push edi
    push ebp
    mov eax, [esp + 20]
    mov ecx, [esp + 24]
    mov [eax], esp
    mov esp, ecx
    pop ebp
    pop edi
    pop esi
    pop ebx
    ret
"#
);

#[cfg(all(target_arch = "x86", target_os = "none"))]
extern "C" {
    fn switch_stacks(prev_esp_slot: *mut usize, next_esp: usize);
    fn iret_to_task();
}

/// Number of callee-saved register words `switch_stacks` pops before its
/// `ret`.
const SWITCH_POP_WORDS: usize = 4;

/// Address of the shared interrupt-return epilogue.
fn trampoline_address() -> usize {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        iret_to_task as usize
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        // Host builds never resume a seeded stack; a recognizable
        // sentinel keeps the layout inspectable in tests.
        0x1_F000
    }
}

/// Lay a synthetic first-entry image onto a fresh kernel stack.
///
/// `stack_top` is the exclusive upper end of a zeroed stack page. The
/// image, top down: the trap frame, the `iret_to_task` return address,
/// and four zero words for the register pops of `switch_stacks`. Returns
/// the value to store as the task's `kernel_esp`.
///
/// # Safety
///
/// `stack_top` must be the end of a writable region of at least
/// `size_of::<TrapFrame>() + 20` bytes that nothing else references.
pub unsafe fn seed_task_stack(stack_top: usize, frame: &TrapFrame) -> usize {
    let frame_addr = stack_top - size_of::<TrapFrame>();
    // SAFETY: frame_addr..stack_top lies inside the caller-owned stack
    // page and is suitably aligned for u32 writes.
    unsafe {
        (frame_addr as *mut TrapFrame).write(*frame);
        let ret_slot = frame_addr - 4;
        (ret_slot as *mut u32).write(trampoline_address() as u32);
        ret_slot - SWITCH_POP_WORDS * 4
    }
}

/// Switch from the running task to `next`.
///
/// Stores the outgoing kernel stack pointer through `prev_esp_slot`,
/// updates the TSS ring-0 stack, reloads CR3 only when the incoming
/// directory differs (reloading always would flush the TLB for nothing)
/// and swaps stacks. Returns when the outgoing task is scheduled again.
///
/// # Safety
///
/// Interrupts must be disabled. `next_esp` must be a kernel stack seeded
/// by [`seed_task_stack`] or saved by a previous switch, and `next_cr3`
/// must be a valid page directory mapping the kernel half.
pub unsafe fn context_switch(
    prev_esp_slot: *mut usize,
    next_esp: usize,
    next_cr3: usize,
    next_esp0: u32,
) {
    super::tss::set_esp0(next_esp0);
    if super::read_cr3() != next_cr3 {
        // SAFETY: forwarded caller contract on next_cr3.
        unsafe { super::write_cr3(next_cr3) };
    }
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: forwarded caller contract on next_esp and interrupt state.
    unsafe {
        switch_stacks(prev_esp_slot, next_esp)
    };
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        // Host build: record the handoff; the scheduler's bookkeeping is
        // the observable effect.
        // SAFETY: caller passes a live pointer into the task table.
        unsafe { prev_esp_slot.write(next_esp) };
    }
}

#[cfg(test)]
mod tests {
    use std::vec;

    use super::*;
    use crate::trap::TrapFrame;

    #[test]
    fn seeded_stack_layout() {
        let mut stack = vec![0u32; 1024].into_boxed_slice();
        let top = stack.as_mut_ptr() as usize + 4096;
        let frame = TrapFrame::new_kthread(0x0010_2000);
        // SAFETY: `top` bounds a private, writable, zeroed buffer.
        let esp = unsafe { seed_task_stack(top, &frame) };

        // Four pop words, the trampoline word, then the frame.
        assert_eq!(esp, top - size_of::<TrapFrame>() - 20);
        let words = esp as *const u32;
        // SAFETY: reads stay inside `stack`.
        unsafe {
            for i in 0..4 {
                assert_eq!(*words.add(i), 0);
            }
            assert_eq!(*words.add(4), trampoline_address() as u32);
            let seeded = &*((esp + 20) as *const TrapFrame);
            assert_eq!(*seeded, frame);
        }
    }
}
