//! Scoped interrupt control
//!
//! Every critical section that inspects or mutates the task table runs
//! under an [`IrqGuard`]: interrupts are disabled on construction and the
//! previous state is restored on *every* exit path when the guard drops.
//! On a uniprocessor this guard is the whole locking story; the
//! `spin::Mutex` wrappers around global state document the same invariant
//! and keep the host test harness honest.

use crate::arch;

/// RAII interrupt-disable guard.
///
/// Nesting is safe: an inner guard observes interrupts already disabled
/// and restores nothing, so the outermost guard decides when `sti`
/// happens.
#[must_use = "dropping the guard immediately re-enables interrupts"]
pub struct IrqGuard {
    was_enabled: bool,
}

impl IrqGuard {
    /// Disable interrupts, remembering the prior state.
    pub fn new() -> Self {
        let was_enabled = arch::interrupts_enabled();
        arch::disable_interrupts();
        Self { was_enabled }
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.was_enabled {
            arch::enable_interrupts();
        }
    }
}
