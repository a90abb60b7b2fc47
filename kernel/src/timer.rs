//! System timer
//!
//! IRQ 0 drives everything time-related: the `jiffies` uptime counter,
//! a small pool of software timers for other parts of the kernel, and
//! the scheduler tick. The PIT is programmed once at init for a divider
//! of [`TIMER_DIVIDER`], which is as close to 100 Hz (one jiffy = 10 ms)
//! as the hardware gets.

use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::arch::x86::pit;
use crate::sched;
use crate::trap;

/// PIT divider: 1193182 Hz / 11932 = 99.998 Hz.
pub const TIMER_DIVIDER: u16 = 11932;

/// Milliseconds per jiffy.
pub const MS_PER_JIFFY: u32 = 10;

/// Software timer slots available to the rest of the kernel.
pub const MAX_TIMERS: usize = 16;

/// Global uptime in jiffies.
static JIFFIES: AtomicU32 = AtomicU32::new(0);

/// Current uptime in jiffies.
pub fn jiffies() -> u32 {
    JIFFIES.load(Ordering::Relaxed)
}

/// Handle to an armed software timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(u8);

/// Firing behavior of a software timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerMode {
    /// Fire once, then free the slot.
    OneShot,
    /// Reload and fire again every interval.
    Interval,
}

/// Timer callbacks are plain function pointers so the pool lives in
/// static data.
pub type TimerCallback = fn();

#[derive(Clone, Copy)]
struct TimerSlot {
    mode: TimerMode,
    /// Jiffies until the next firing.
    remaining: u32,
    /// Reload value for interval timers.
    interval: u32,
    callback: TimerCallback,
}

/// Fixed pool of software timers.
pub struct TimerWheel {
    slots: [Option<TimerSlot>; MAX_TIMERS],
}

impl TimerWheel {
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_TIMERS],
        }
    }

    fn arm(&mut self, slot: TimerSlot) -> Option<TimerId> {
        let index = self.slots.iter().position(|s| s.is_none())?;
        self.slots[index] = Some(slot);
        Some(TimerId(index as u8))
    }

    /// Arm a one-shot timer firing after `jiffies` ticks.
    pub fn set_timeout(&mut self, jiffies: u32, callback: TimerCallback) -> Option<TimerId> {
        if jiffies == 0 {
            return None;
        }
        self.arm(TimerSlot {
            mode: TimerMode::OneShot,
            remaining: jiffies,
            interval: 0,
            callback,
        })
    }

    /// Arm an interval timer firing every `jiffies` ticks.
    pub fn set_interval(&mut self, jiffies: u32, callback: TimerCallback) -> Option<TimerId> {
        if jiffies == 0 {
            return None;
        }
        self.arm(TimerSlot {
            mode: TimerMode::Interval,
            remaining: jiffies,
            interval: jiffies,
            callback,
        })
    }

    /// Disarm a timer. Clearing an already-expired one-shot is harmless.
    pub fn clear(&mut self, id: TimerId) {
        if (id.0 as usize) < MAX_TIMERS {
            self.slots[id.0 as usize] = None;
        }
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Advance one tick. Expired callbacks are *returned*, not invoked:
    /// the caller runs them after releasing the pool lock so a callback
    /// can arm new timers.
    pub fn advance(&mut self) -> [Option<TimerCallback>; MAX_TIMERS] {
        let mut fired = [None; MAX_TIMERS];
        for (index, entry) in self.slots.iter_mut().enumerate() {
            let Some(slot) = entry else { continue };
            slot.remaining -= 1;
            if slot.remaining > 0 {
                continue;
            }
            fired[index] = Some(slot.callback);
            match slot.mode {
                TimerMode::Interval => slot.remaining = slot.interval,
                TimerMode::OneShot => *entry = None,
            }
        }
        fired
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

/// The global timer pool.
static TIMERS: Mutex<TimerWheel> = Mutex::new(TimerWheel::new());

/// Arm a one-shot timer on the global pool. Returns `None` when every
/// slot is armed or `jiffies` is zero.
pub fn set_timeout(jiffies: u32, callback: TimerCallback) -> Option<TimerId> {
    TIMERS.lock().set_timeout(jiffies, callback)
}

/// Arm an interval timer on the global pool.
pub fn set_interval(jiffies: u32, callback: TimerCallback) -> Option<TimerId> {
    TIMERS.lock().set_interval(jiffies, callback)
}

/// Disarm a global timer.
pub fn clear(id: TimerId) {
    TIMERS.lock().clear(id);
}

/// IRQ 0 handler: count the jiffy, fire expired software timers, then
/// run the scheduler tick (slice accounting, sleep alarms).
pub fn tick() {
    JIFFIES.fetch_add(1, Ordering::Relaxed);

    let fired = TIMERS.lock().advance();
    for callback in fired.into_iter().flatten() {
        callback();
    }

    sched::timer_tick();
}

/// Program the PIT and install [`tick`] on IRQ 0.
pub fn init() {
    pit::program(TIMER_DIVIDER);
    trap::install_isr(0, tick);
    log::info!("[TIMER] PIT divider {} (~100 Hz)", TIMER_DIVIDER);
}
