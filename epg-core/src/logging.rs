//! Logger construction, following the teacher's `flux::logging` module:
//! every subsystem is handed a `slog::Logger` at construction time rather
//! than reaching for a global static.

use slog::{Drain, Logger};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Runtime logging configuration, sourced from the `[VERSION]`-adjacent
/// daemon settings (see `epg_core::config`).
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub verbose: bool,
    pub to_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            verbose: false,
            to_stderr: true,
        }
    }
}

/// Build the root logger for the daemon. Acquisition, server and client
/// components each derive a child logger via `log.new(o!("component" => ..))`.
pub fn init(cfg: &LoggingConfig) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(if cfg.verbose {
        Severity::Debug
    } else {
        Severity::Info
    });
    builder.destination(if cfg.to_stderr {
        Destination::Stderr
    } else {
        Destination::Stdout
    });

    match builder.build() {
        Ok(logger) => logger,
        Err(_) => Logger::root(slog::Discard, slog::o!()),
    }
}

/// A logger that drops everything; used in tests and for library embedders
/// that don't want daemon output.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}
