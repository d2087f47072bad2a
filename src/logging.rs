//! Stderr logger behind the `log` facade.
//!
//! Messages are written as `[LEVEL] message` so they never mix with the
//! listings and reports printed on stdout.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;

pub static LOGGER: Logger = Logger;

pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let stderr = std::io::stderr();
            let mut handle = stderr.lock();
            let _ = writeln!(handle, "[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// Installs [`LOGGER`]. Fails if another logger is already registered.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn enabled_follows_max_level() {
        log::set_max_level(LevelFilter::Warn);
        let warn = Metadata::builder().level(Level::Warn).build();
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(LOGGER.enabled(&warn));
        assert!(!LOGGER.enabled(&debug));
    }
}
