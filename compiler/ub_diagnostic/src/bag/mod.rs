//! Deferred diagnostic collection.
//!
//! Phases that process many independent units (modules, architectures,
//! tasks) push every problem into a [`DiagnosticBag`] and keep going. At the
//! end of the phase the bag is turned into a result: warnings pass through,
//! any error turns the whole phase into an [`AggregateError`].

use std::fmt;

use crate::{Diagnostic, ErrorCode, Severity};

/// Collects diagnostics without interrupting the current phase.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Add an error with the given code and message.
    pub fn error(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.push(Diagnostic::error(code).with_message(message));
    }

    /// Add a warning with the given code and message.
    pub fn warning(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.push(Diagnostic::warning(code).with_message(message));
    }

    /// Add every diagnostic from an iterator.
    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    /// Absorb the contents of an aggregate error.
    pub fn absorb(&mut self, error: AggregateError) {
        self.diagnostics.extend(error.diagnostics);
    }

    /// Check if any error has been collected.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    /// Number of errors collected.
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Check if the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Number of diagnostics of any severity.
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// All collected diagnostics, in insertion order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Take all warnings out of the bag, leaving the errors.
    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        let (warnings, rest): (Vec<_>, Vec<_>) = self
            .diagnostics
            .drain(..)
            .partition(|d| d.severity == Severity::Warning);
        self.diagnostics = rest;
        warnings
    }

    /// Finish the phase.
    ///
    /// Returns the warnings when no error was collected; otherwise every
    /// diagnostic (warnings included) is raised together.
    pub fn into_result(self) -> Result<Vec<Diagnostic>, AggregateError> {
        if self.has_errors() {
            Err(AggregateError {
                diagnostics: self.diagnostics,
            })
        } else {
            Ok(self.diagnostics)
        }
    }
}

impl From<Diagnostic> for DiagnosticBag {
    fn from(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
        }
    }
}

impl FromIterator<Diagnostic> for DiagnosticBag {
    fn from_iter<I: IntoIterator<Item = Diagnostic>>(iter: I) -> Self {
        Self {
            diagnostics: iter.into_iter().collect(),
        }
    }
}

/// One or more diagnostics raised together at a phase barrier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateError {
    /// Every diagnostic of the failed phase; at least one is an error.
    pub diagnostics: Vec<Diagnostic>,
}

impl AggregateError {
    /// Wrap a single error diagnostic.
    pub fn single(diagnostic: Diagnostic) -> Self {
        Self {
            diagnostics: vec![diagnostic],
        }
    }

    /// Iterate over the error-severity diagnostics.
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    /// Check whether any diagnostic carries the given code.
    pub fn contains(&self, code: ErrorCode) -> bool {
        self.diagnostics.iter().any(|d| d.code == code)
    }
}

impl From<Diagnostic> for AggregateError {
    fn from(diagnostic: Diagnostic) -> Self {
        Self::single(diagnostic)
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self.errors().count();
        write!(
            f,
            "build failed with {errors} error{}",
            if errors == 1 { "" } else { "s" }
        )?;
        for diagnostic in &self.diagnostics {
            write!(f, "\n{diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
