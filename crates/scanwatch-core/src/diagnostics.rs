//! Injectable diagnostic-warning output.
//!
//! The adapter stack and the monitor write human-facing warnings through a
//! [`DiagnosticHub`] instead of a process-wide function. The hub holds the
//! current [`DiagnosticSink`] and lets a component (the warning tap) swap in
//! a wrapper and later put the previous sink back.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// One argument of a diagnostic call.
#[derive(Debug, Clone)]
pub enum DiagnosticArg {
    /// Plain text.
    Text(String),
    /// An error; rendered with its cause chain and backtrace when captured.
    Error(Arc<anyhow::Error>),
    /// Any other structured value.
    Value(serde_json::Value),
}

impl DiagnosticArg {
    /// Render the argument as text.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            // The Debug form of anyhow::Error includes the cause chain and,
            // when RUST_BACKTRACE is set, the captured backtrace.
            Self::Error(err) => format!("{err:?}"),
            Self::Value(serde_json::Value::String(s)) => s.clone(),
            Self::Value(value) => value.to_string(),
        }
    }
}

impl From<&str> for DiagnosticArg {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for DiagnosticArg {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<anyhow::Error> for DiagnosticArg {
    fn from(err: anyhow::Error) -> Self {
        Self::Error(Arc::new(err))
    }
}

impl From<serde_json::Value> for DiagnosticArg {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(value)
    }
}

impl fmt::Display for DiagnosticArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Join rendered arguments with single spaces.
#[must_use]
pub fn render_args(args: &[DiagnosticArg]) -> String {
    args.iter()
        .map(DiagnosticArg::render)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Destination for diagnostic warnings.
pub trait DiagnosticSink: Send + Sync {
    /// Emit one warning made of `args`.
    fn warn(&self, args: &[DiagnosticArg]);
}

/// Writes warnings to stderr, space-joined.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn warn(&self, args: &[DiagnosticArg]) {
        eprintln!("{}", render_args(args));
    }
}

/// Holder of the currently installed sink.
pub struct DiagnosticHub {
    current: RwLock<Arc<dyn DiagnosticSink>>,
}

impl DiagnosticHub {
    /// Create a hub writing to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            current: RwLock::new(sink),
        }
    }

    /// Create a hub writing to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Arc::new(StderrSink))
    }

    /// The sink currently installed.
    #[must_use]
    pub fn current(&self) -> Arc<dyn DiagnosticSink> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Install `sink` and return the one it replaced.
    pub fn replace(&self, sink: Arc<dyn DiagnosticSink>) -> Arc<dyn DiagnosticSink> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, sink)
    }

    /// Whether `sink` is the installed sink (pointer identity).
    #[must_use]
    pub fn is_current(&self, sink: &Arc<dyn DiagnosticSink>) -> bool {
        same_sink(&self.current(), sink)
    }

    /// Emit a warning through the installed sink.
    pub fn warn(&self, args: &[DiagnosticArg]) {
        // Clone out of the lock so a sink may itself touch the hub.
        let sink = self.current();
        sink.warn(args);
    }

    /// Emit a single-text warning.
    pub fn warn_text(&self, text: impl Into<String>) {
        self.warn(&[DiagnosticArg::Text(text.into())]);
    }
}

impl Default for DiagnosticHub {
    fn default() -> Self {
        Self::stderr()
    }
}

impl fmt::Debug for DiagnosticHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticHub").finish_non_exhaustive()
    }
}

/// Pointer identity of two sinks, ignoring vtables.
#[must_use]
pub fn same_sink(a: &Arc<dyn DiagnosticSink>, b: &Arc<dyn DiagnosticSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a).cast::<()>(),
        Arc::as_ptr(b).cast::<()>(),
    )
}

/// Sink that keeps every rendered warning in memory.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    lines: std::sync::Mutex<Vec<String>>,
}

#[cfg(test)]
impl RecordingSink {
    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl DiagnosticSink for RecordingSink {
    fn warn(&self, args: &[DiagnosticArg]) {
        self.lines.lock().unwrap().push(render_args(args));
    }
}
