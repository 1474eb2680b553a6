//! Logger used by the `log` crate, writing to stderr.
//!
//! The maximum level is read once from the `FAT16_LOG` environment variable.
use log::{Level, LevelFilter};
use owo_colors::OwoColorize;
use std::io::Write;

/// Environment variable selecting the maximum log level.
pub const LEVEL_VAR: &str = "FAT16_LOG";

/// The static API for the logger.
static LOGGER: StderrLogger = StderrLogger;

pub struct StderrLogger;

/// Installs the logger. Logging stays disabled if another logger is already set.
pub fn init() {
    let level = std::env::var(LEVEL_VAR)
        .ok()
        .and_then(|value| value.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Warn);

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        let level = record.level();
        if level > log::max_level() {
            return;
        }

        let tag = format!("[{level:5}]");
        let tag: &dyn core::fmt::Display = match level {
            Level::Error => &tag.bright_red(),
            Level::Warn => &tag.bright_yellow(),
            Level::Info => &tag.bright_green(),
            Level::Debug => &tag.bright_blue(),
            Level::Trace => &tag.dimmed(),
        };

        // Nowhere to report a failing stderr
        let _ = writeln!(std::io::stderr().lock(), "{tag} {}", record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
