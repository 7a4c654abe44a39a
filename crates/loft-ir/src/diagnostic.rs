//! Diagnostic messages emitted during rewriting and lowering.

use crate::Span;

/// A diagnostic message with source location, collected via Salsa accumulators.
///
/// The IR core never formats user-facing text beyond the message string;
/// rendering is left to the embedding driver.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[salsa::accumulator]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
    pub severity: Severity,
    pub phase: Phase,
}

impl Diagnostic {
    pub fn remark(message: impl Into<String>, span: Span, phase: Phase) -> Self {
        Self {
            message: message.into(),
            span,
            severity: Severity::Remark,
            phase,
        }
    }

    pub fn error(message: impl Into<String>, span: Span, phase: Phase) -> Self {
        Self {
            message: message.into(),
            span,
            severity: Severity::Error,
            phase,
        }
    }
}

/// Severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Informational; the surrounding transformation continues.
    Remark,
    /// The transformation of the enclosing function failed.
    Error,
}

/// Pipeline phase where a diagnostic was emitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Rewriting,
    Lowering,
    CodeGen,
    Cleanup,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Remark => write!(f, "REMARK"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}
