//! Logging initialization and configuration.
//!
//! This module provides mode-aware logging setup:
//! - **Production** (`log_dir` set): JSON logs to rolling files + compact logs to stderr
//! - **Development**: compact, colored logs to stderr
//!
//! Operator lines (`[monitor]`, `[summary]`, ...) go to stdout directly and
//! never pass through `tracing`, so the two streams do not interleave.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use scanwatch_core::RunOptions;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Static guards to keep non-blocking writers alive.
/// These must persist for the lifetime of the program.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDERR_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Prefix of the rolling log files.
const LOG_FILE_PREFIX: &str = "scanwatch";

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The filter directive could not be parsed.
    #[error("Invalid log filter '{directive}': {source}")]
    InvalidFilter {
        /// The rejected directive.
        directive: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },

    /// The log directory could not be created.
    #[error("Cannot create log directory {}: {source}", path.display())]
    LogDirectory {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A global subscriber is already installed.
    #[error("Logging already initialized")]
    AlreadyInitialized,
}

/// Where and how to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    /// Human-readable stderr only.
    Development,
    /// JSON daily files in the given directory, plus plain stderr.
    Production {
        /// Directory for the rolling files.
        log_dir: PathBuf,
    },
}

/// Everything [`init`] needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Output mode.
    pub mode: LogMode,
    /// Filter used when `RUST_LOG` is unset.
    pub default_directive: String,
}

impl LogSettings {
    /// Derive settings from run options.
    ///
    /// The directive is the configured `log_level` if any, else `debug` with
    /// `verbose`, else `info`.
    #[must_use]
    pub fn from_options(options: &RunOptions) -> Self {
        let default_directive = options.log_level.clone().unwrap_or_else(|| {
            if options.verbose { "debug" } else { "info" }.to_string()
        });
        let mode = options
            .log_dir
            .clone()
            .map_or(LogMode::Development, |log_dir| LogMode::Production { log_dir });

        Self {
            mode,
            default_directive,
        }
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over the configured directive, which itself
/// may come from `SCANWATCH_LOG_LEVEL`.
///
/// # Errors
///
/// Returns an error if the filter cannot be parsed, the log directory cannot
/// be created, or a subscriber is already installed.
pub fn init(settings: &LogSettings) -> Result<(), LoggingError> {
    let env_filter = build_filter(&settings.default_directive)?;

    match &settings.mode {
        LogMode::Production { log_dir } => init_production(env_filter, log_dir),
        LogMode::Development => init_development(env_filter),
    }
}

fn build_filter(default_directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_from_default_env().or_else(|_| {
        EnvFilter::try_new(default_directive).map_err(|source| LoggingError::InvalidFilter {
            directive: default_directive.to_string(),
            source,
        })
    })
}

/// Initialize production logging with file + stderr output.
fn init_production(env_filter: EnvFilter, log_dir: &Path) -> Result<(), LoggingError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggingError::LogDirectory {
        path: log_dir.to_path_buf(),
        source,
    })?;

    // Rolling file appender - creates new file daily
    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    // File layer - JSON format for structured logging
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // Stderr layer - compact format for journald
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_stderr)
        .with_target(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)?;

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDERR_GUARD.set(stderr_guard);

    Ok(())
}

/// Initialize development logging on stderr.
fn init_development(env_filter: EnvFilter) -> Result<(), LoggingError> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_to_info_development() {
        let settings = LogSettings::from_options(&RunOptions::default());
        assert_eq!(settings.mode, LogMode::Development);
        assert_eq!(settings.default_directive, "info");
    }

    #[test]
    fn test_verbose_and_explicit_level() {
        let verbose = RunOptions {
            verbose: true,
            ..RunOptions::default()
        };
        assert_eq!(LogSettings::from_options(&verbose).default_directive, "debug");

        let explicit = RunOptions {
            verbose: true,
            log_level: Some("scanwatch_core=trace".into()),
            ..RunOptions::default()
        };
        assert_eq!(
            LogSettings::from_options(&explicit).default_directive,
            "scanwatch_core=trace"
        );
    }

    #[test]
    fn test_log_dir_selects_production() {
        let options = RunOptions {
            log_dir: Some(PathBuf::from("/tmp/scanwatch-logs")),
            ..RunOptions::default()
        };
        assert_eq!(
            LogSettings::from_options(&options).mode,
            LogMode::Production {
                log_dir: PathBuf::from("/tmp/scanwatch-logs")
            }
        );
    }

    #[test]
    fn test_unreadable_directive_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let err = build_filter("scanwatch=loud").unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter { .. }));
    }
}
