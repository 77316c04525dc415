//! Pluggable sink for non-fatal diagnostics.
//!
//! Several packages in this workspace report expected-but-suspicious
//! conditions (an unhandled event, a duplicate subscriber, a cyclic parent
//! request) as single human-readable lines. None of these are fatal, so they
//! are not errors in the `Result` sense; instead each reporting component
//! accepts an injectable [`DiagnosticSink`] and keeps working after emitting
//! the line.
//!
//! The default sink is [`TracingSink`], which forwards to `tracing::warn!`.
//! Tests redirect to a [`MemorySink`] and assert on the captured lines.
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use diagnostics::{DiagnosticSink, MemorySink};
//!
//! let sink = Rc::new(MemorySink::new());
//! sink.report("duplicate subscriber");
//!
//! assert_eq!(sink.lines(), ["duplicate subscriber"]);
//! ```

use std::cell::RefCell;

/// Receives one-line, human-readable reports of non-fatal conditions.
///
/// Implementations must not panic; a diagnostic is informational and the
/// reporting component continues after emitting it.
pub trait DiagnosticSink {
    /// Records one diagnostic line.
    fn report(&self, message: &str);
}

/// The default sink: forwards each line to `tracing::warn!`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Creates the default tracing-backed sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl DiagnosticSink for TracingSink {
    fn report(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// A sink that collects lines in memory, for assertions in tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: RefCell<Vec<String>>,
}

impl MemorySink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every line reported so far, in order.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Returns `true` if no diagnostic has been reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.borrow().is_empty()
    }

    /// Returns `true` if any reported line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.borrow().iter().any(|line| line.contains(needle))
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, message: &str) {
        self.lines.borrow_mut().push(message.to_string());
    }
}
