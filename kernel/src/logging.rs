//! Logging plumbing
//!
//! The kernel logs exclusively through the `log` facade; this module
//! wires the facade to whatever sink the console driver registers at
//! boot. Before [`init`] runs (and on host builds that never call it)
//! the macros are free no-ops, which keeps the core loggable without
//! dragging a text driver into it.

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// A log sink: receives one formatted record at a time. Installed by the
/// console driver, which owns the actual output device.
pub type LogSink = fn(&core::fmt::Arguments);

static SINK: Mutex<Option<LogSink>> = Mutex::new(None);

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        SINK.lock().is_some()
    }

    fn log(&self, record: &Record) {
        let sink = *SINK.lock();
        if let Some(sink) = sink {
            sink(&format_args!("[{:5}] {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Install `sink` as the output device and route the `log` macros to it.
/// Safe to call more than once; the most recent sink wins.
pub fn init(sink: LogSink) {
    *SINK.lock() = Some(sink);
    // Err means a logger is already installed (ours, from an earlier
    // call), so the new sink is still picked up.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(LevelFilter::Info);
}
