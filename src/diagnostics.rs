//! Skipped-loop reporting
//!
//! Loops the pass cannot instrument are reported through a caller-supplied
//! [`DiagnosticSink`]. Reporting never changes what the pass does next.

use std::fmt;

/// Severity level of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// Why a loop was left uninstrumented
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No single out-of-loop block branches only to the header
    NoPreheader,
    /// Exit edges reach more than one block, or none
    NoUniqueExit { exits: usize },
    /// No well-formed single-entry single-exit region encloses the loop
    NoRegion,
    /// Outlining the region failed
    ExtractionFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::NoPreheader => write!(f, "Found a loop without a preheader"),
            SkipReason::NoUniqueExit { exits } => {
                write!(f, "Found a loop without an exit block ({} exit targets)", exits)
            }
            SkipReason::NoRegion => write!(f, "Found a loop outside any single-exit region"),
            SkipReason::ExtractionFailed(why) => write!(f, "Failed to outline loop ({})", why),
        }
    }
}

/// A report about one loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub routine: String,
    /// `file:line:col` of the loop, or `<unknown>`
    pub location: String,
    pub reason: SkipReason,
}

impl Diagnostic {
    pub fn skipped(routine: &str, location: String, reason: SkipReason) -> Self {
        Diagnostic {
            severity: Severity::Warning,
            routine: routine.to_string(),
            location,
            reason,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: {} at {} in `{}`. Skipping.",
            self.severity, self.reason, self.location, self.routine
        )
    }
}

/// Receives skipped-loop reports
pub trait DiagnosticSink {
    fn report(&mut self, diagnostic: Diagnostic);
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for &mut S {
    fn report(&mut self, diagnostic: Diagnostic) {
        (**self).report(diagnostic);
    }
}

/// Forwards reports to the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Warning => log::warn!("{}", diagnostic),
            Severity::Note => log::info!("{}", diagnostic),
        }
    }
}
