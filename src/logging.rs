//! Temporary implementation of kernel log

use core::fmt::Arguments;
use log::{LevelFilter, Metadata, Record, SetLoggerError};

/// Destination of formatted log lines.
pub type LogSink = fn(Arguments);

pub struct KernelLog {
    max_level: LevelFilter,
    sink: LogSink,
}

impl KernelLog {
    pub const fn new(max_level: LevelFilter, sink: LogSink) -> Self {
        Self { max_level, sink }
    }

    /// Log to the Bochs/QEMU debug console.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    pub const fn debug_console(max_level: LevelFilter) -> Self {
        Self::new(max_level, write_debug_console)
    }
}

/// Install `logger` as the global kernel log. Fails if a logger is already installed.
pub fn initialize_kernel_log(logger: &'static KernelLog) -> Result<(), SetLoggerError> {
    log::set_logger(logger).map(|()| log::set_max_level(logger.max_level))
}

impl log::Log for KernelLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            (self.sink)(format_args!("{}\n", record.args()));
        }
    }

    fn flush(&self) {}
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn write_debug_console(args: Arguments) {
    use crate::arch::io::{Port, PortWriter};
    use core::fmt::Write;

    // Nowhere to report a failing console to.
    let _ = PortWriter(Port::DEBUG_CONSOLE).write_fmt(args);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static CAPTURED: Mutex<String> = Mutex::new(String::new());

    fn capture(args: Arguments) {
        use std::fmt::Write;
        if let Ok(mut captured) = CAPTURED.lock() {
            let _ = captured.write_fmt(args);
        }
    }

    static LOGGER: KernelLog = KernelLog::new(LevelFilter::Info, capture);

    #[test]
    fn records_are_filtered_and_written_per_line() {
        initialize_kernel_log(&LOGGER).unwrap();
        log::debug!("too verbose");
        log::info!("├─ {}", 42);
        log::warn!("ramdisk disabled");

        let captured = CAPTURED.lock().unwrap();
        assert!(captured.contains("├─ 42\n"));
        assert!(captured.contains("ramdisk disabled\n"));
        assert!(!captured.contains("too verbose"));
        assert!(initialize_kernel_log(&LOGGER).is_err());
    }
}
