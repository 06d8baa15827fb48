//! Diagnostics: semantic and parse problems attached to a unit.
//!
//! Builders never fail on semantic errors; they record a [`Diagnostic`] and
//! carry on. The collector offers helpers for the messages the builders emit
//! more than once.

use std::sync::Arc;

use crate::base::{FileId, TextRange};

// ============================================================================
// DIAGNOSTIC TYPES
// ============================================================================

/// Severity level of a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    /// Convert to LSP severity number.
    pub fn to_lsp(&self) -> u32 {
        match self {
            Severity::Error => 1,
            Severity::Warning => 2,
            Severity::Info => 3,
            Severity::Hint => 4,
        }
    }
}

/// Which component produced a diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Origin {
    Builder,
    Parser,
}

/// A diagnostic message with location.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    /// The file containing this diagnostic.
    pub file: FileId,
    pub range: TextRange,
    pub severity: Severity,
    /// Error/warning code (e.g., "E0001").
    pub code: Option<&'static str>,
    pub message: Arc<str>,
    pub origin: Origin,
    /// Optional related information.
    pub related: Vec<RelatedInfo>,
}

/// Related information for a diagnostic.
#[derive(Clone, Debug, PartialEq)]
pub struct RelatedInfo {
    pub file: FileId,
    pub range: TextRange,
    pub message: Arc<str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(file: FileId, range: TextRange, message: impl Into<Arc<str>>) -> Self {
        Self {
            file,
            range,
            severity: Severity::Error,
            code: None,
            message: message.into(),
            origin: Origin::Builder,
            related: Vec::new(),
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(file: FileId, range: TextRange, message: impl Into<Arc<str>>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(file, range, message)
        }
    }

    /// A syntax error reported by the parser.
    pub fn parse_error(file: FileId, range: TextRange, message: impl Into<Arc<str>>) -> Self {
        Self {
            origin: Origin::Parser,
            code: Some(codes::SYNTAX_ERROR),
            ..Self::error(file, range, message)
        }
    }

    /// Set the error code.
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    /// Add related information.
    pub fn with_related(mut self, info: RelatedInfo) -> Self {
        self.related.push(info);
        self
    }
}

// ============================================================================
// DIAGNOSTIC CODES
// ============================================================================

/// Standard diagnostic codes.
pub mod codes {
    /// Unparsable source.
    pub const SYNTAX_ERROR: &str = "E0000";
    /// Undefined reference (name not found).
    pub const UNDEFINED_REFERENCE: &str = "E0001";
    /// Redeclaration of a class, function, member or constant.
    pub const DUPLICATE_DEFINITION: &str = "E0004";
    /// Circular inheritance.
    pub const CIRCULAR_DEPENDENCY: &str = "E0007";
    /// Illegal modifier or body on a member.
    pub const INVALID_MODIFIER: &str = "E0008";
    /// Illegal override of a final or abstract method.
    pub const INVALID_OVERRIDE: &str = "E0009";
    /// Any other language rule violation.
    pub const INVALID_CONSTRUCT: &str = "E0010";

    /// Deprecated usage.
    pub const DEPRECATED: &str = "W0002";
    /// A statement that has no effect.
    pub const NO_EFFECT: &str = "W0004";
}

// ============================================================================
// DIAGNOSTIC COLLECTOR
// ============================================================================

/// Collects diagnostics during one build.
#[derive(Clone, Debug)]
pub struct DiagnosticCollector {
    file: FileId,
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticCollector {
    pub fn new(file: FileId) -> Self {
        Self {
            file,
            diagnostics: Vec::new(),
        }
    }

    /// Add a diagnostic.
    pub fn add(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, range: TextRange, code: &'static str, message: impl Into<Arc<str>>) {
        self.add(Diagnostic::error(self.file, range, message).with_code(code));
    }

    pub fn warning(&mut self, range: TextRange, code: &'static str, message: impl Into<Arc<str>>) {
        self.add(Diagnostic::warning(self.file, range, message).with_code(code));
    }

    /// Add an undefined reference error.
    pub fn undefined_reference(&mut self, range: TextRange, name: &str) {
        self.error(
            range,
            codes::UNDEFINED_REFERENCE,
            format!("Declaration not found: {name}"),
        );
    }

    /// Add a deprecated usage warning.
    pub fn deprecated(&mut self, range: TextRange, name: &str) {
        self.warning(range, codes::DEPRECATED, format!("Usage of {name} is deprecated."));
    }

    /// Add a circular inheritance error.
    pub fn circular_inheritance(&mut self, range: TextRange, class: &str, base: &str) {
        self.error(
            range,
            codes::CIRCULAR_DEPENDENCY,
            format!("Circular inheritance of {class} and {base}"),
        );
    }

    /// Add a redeclaration error pointing at the earlier declaration.
    pub fn redeclaration(
        &mut self,
        range: TextRange,
        name: &str,
        previous: Option<(FileId, TextRange)>,
        location: &str,
        line: u32,
    ) {
        let mut diag = Diagnostic::error(
            self.file,
            range,
            format!("Cannot redeclare {name}, already declared in {location} on line {line}"),
        )
        .with_code(codes::DUPLICATE_DEFINITION);
        if let Some((file, range)) = previous {
            diag = diag.with_related(RelatedInfo {
                file,
                range,
                message: Arc::from(format!("previous declaration of {name}")),
            });
        }
        self.add(diag);
    }

    /// Get all diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Get the number of errors.
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error).count()
    }

    /// Get the number of warnings.
    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning).count()
    }

    /// Check if there are any errors.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    /// Take all diagnostics, leaving the collector empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range() -> TextRange {
        TextRange::new(0.into(), 4.into())
    }

    #[test]
    fn test_diagnostic_error() {
        let diag = Diagnostic::error(FileId::new(0), range(), "test error");
        assert_eq!(diag.severity, Severity::Error);
        assert_eq!(diag.origin, Origin::Builder);
        assert_eq!(diag.range, range());
    }

    #[test]
    fn test_parse_error_origin() {
        let diag = Diagnostic::parse_error(FileId::new(0), range(), "bad");
        assert_eq!(diag.origin, Origin::Parser);
        assert_eq!(diag.code, Some(codes::SYNTAX_ERROR));
    }

    #[test]
    fn test_collector_counts() {
        let mut collector = DiagnosticCollector::new(FileId::new(0));
        collector.undefined_reference(range(), "foo");
        collector.circular_inheritance(range(), "A", "B");
        collector.deprecated(range(), "bar");

        assert_eq!(collector.error_count(), 2);
        assert_eq!(collector.warning_count(), 1);
        assert!(collector.has_errors());
        assert_eq!(
            &*collector.diagnostics()[0].message,
            "Declaration not found: foo"
        );
        assert_eq!(
            &*collector.diagnostics()[2].message,
            "Usage of bar is deprecated."
        );
    }

    #[test]
    fn test_redeclaration_related_info() {
        let mut collector = DiagnosticCollector::new(FileId::new(3));
        collector.redeclaration(range(), "A", Some((FileId::new(3), range())), "a.php", 2);

        let diags = collector.take();
        assert_eq!(
            &*diags[0].message,
            "Cannot redeclare A, already declared in a.php on line 2"
        );
        assert_eq!(diags[0].related.len(), 1);
        assert!(collector.diagnostics().is_empty());
    }

    #[test]
    fn test_severity_to_lsp() {
        assert_eq!(Severity::Error.to_lsp(), 1);
        assert_eq!(Severity::Warning.to_lsp(), 2);
        assert_eq!(Severity::Info.to_lsp(), 3);
        assert_eq!(Severity::Hint.to_lsp(), 4);
    }
}
