//! Non-fatal problems found while resolving the xref
//!
//! Every irregularity that is absorbed instead of failing the parse ends up
//! here and in the `tracing` output.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Unexpected bytes or tokens skipped during parsing
    StructuralWarning,
    /// An xref offset did not point at an xref table or stream
    OffsetInvalid,
    /// A cross-reference stream could not be decoded
    StreamDecodeError,
    /// A /Prev chain led back to an offset already visited
    RevisionCycle,
    /// An in-use offset does not point at the object it claims to
    OffsetMismatch,
    /// An object could not be read during recovery
    ObjectSkipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Byte offset the problem relates to, when there is one
    pub offset: Option<u64>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{:?} at {}: {}", self.kind, offset, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Diagnostic sink owned by one parse
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    collect: bool,
}

impl Diagnostics {
    pub fn new(collect: bool) -> Self {
        Self {
            entries: Vec::new(),
            collect,
        }
    }

    /// Log a problem and keep it when collection is enabled
    pub fn record(&mut self, kind: DiagnosticKind, offset: Option<u64>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            kind,
            offset,
            message: message.into(),
        };

        match kind {
            DiagnosticKind::ObjectSkipped => tracing::debug!("{}", diagnostic),
            _ => tracing::warn!("{}", diagnostic),
        }

        if self.collect {
            self.entries.push(diagnostic);
        }
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<Diagnostic> {
        self.entries
    }
}
