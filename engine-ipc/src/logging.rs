//! `log` backend writing to any `core::fmt::Write` sink.
//!
//! The platform wraps its console (a UART, a ring in memory) and installs the
//! logger once at startup.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spinning_top::Spinlock;

pub struct Logger<W> {
    sink: Spinlock<W>,
    level: LevelFilter,
}

impl<W: Write + Send> Logger<W> {
    pub fn new(sink: W, level: LevelFilter) -> Self {
        Self {
            sink: Spinlock::new(sink),
            level,
        }
    }

    /// Route the `log` macros to this logger.
    pub fn install(&'static self) -> Result<(), SetLoggerError>
    where
        W: 'static,
    {
        log::set_logger(self)?;
        log::set_max_level(self.level);
        Ok(())
    }

    /// Run `f` with the sink locked.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        let mut sink = self.sink.lock();
        f(&mut *sink)
    }
}

impl<W: Write + Send> Log for Logger<W> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut sink = self.sink.lock();
            // A console that cannot take the line has nowhere to report it.
            let _ = writeln!(
                sink,
                "[{}:{}] {}: {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        // nothing
    }
}
