use crate::host_trace;
use core::fmt;
use libos_sync::SyncOnceCell;
use log::{LevelFilter, Log, Metadata, Record};

/// Host printk-equivalent.
pub type ConsoleSink = fn(fmt::Arguments<'_>);

static CONSOLE: SyncOnceCell<ConsoleSink> = SyncOnceCell::new();
static LOGGER: SyncOnceCell<HostLogger> = SyncOnceCell::new();

/// Install the host console. Only the first sink sticks.
///
/// # Errors
/// Returns the rejected sink if one was already installed.
pub fn install_console_sink(sink: ConsoleSink) -> Result<(), ConsoleSink> {
    CONSOLE.set(sink)
}

#[inline]
pub(crate) fn console_sink() -> Option<ConsoleSink> {
    CONSOLE.get().copied()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LoggerError {
    #[error("a host logger is already installed")]
    AlreadyInstalled,
    #[error("another logger is registered with the log facade")]
    FacadeTaken,
}

pub struct HostLogger {
    max_level: LevelFilter,
}

impl HostLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Call this once while the module loads, after the console sink is installed.
    ///
    /// # Errors
    /// * [`LoggerError::AlreadyInstalled`] on every call after the first.
    /// * [`LoggerError::FacadeTaken`] if a foreign logger owns the `log` facade.
    pub fn init(self) -> Result<(), LoggerError> {
        let max_level = self.max_level;
        LOGGER.set(self).map_err(|_| LoggerError::AlreadyInstalled)?;
        let logger = LOGGER.get().ok_or(LoggerError::AlreadyInstalled)?;
        log::set_logger(logger).map_err(|_| LoggerError::FacadeTaken)?;
        log::set_max_level(max_level);
        Ok(())
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }
}

impl Log for HostLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        host_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // The host console is unbuffered.
    }
}
