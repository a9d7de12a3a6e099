//! Validation findings
//!
//! Single finding type shared by the binder and the three validator phases.
//! Every finding carries the node path of the clause it refers to, e.g.
//! `kyc-case/ownership-structure/owner[1]`.

use serde::{Deserialize, Serialize};

/// Finding severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Which validator phase produced a finding
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Bind,
    Grammar,
    Semantic,
    Ontology,
}

/// Finding codes for categorizing issues
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // =========================================================================
    // Binder warnings
    // =========================================================================
    UnknownClause,

    // =========================================================================
    // Grammar phase
    // =========================================================================
    WrongArity,
    ExpectedAtom,
    ExpectedList,
    InvalidPercent,
    EmptyClause,
    UnexpectedClause,

    // =========================================================================
    // Semantic phase
    // =========================================================================
    UnknownFunction,
    InvalidTokenState,
    OwnershipSumMismatch,
    MissingController,
    PercentOutOfRange,
    MissingNaturePurpose,
    MissingClientBusinessUnit,
    MissingKycToken,
    DuplicateEntry,

    // =========================================================================
    // Ontology phase
    // =========================================================================
    UnknownAttribute,
    UnknownDocument,
    UnknownRegulation,
    MissingJurisdiction,
}

impl DiagnosticCode {
    /// Stable dotted identifier used in reports and persisted audit data
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticCode::UnknownClause => "bind.unknown-clause",
            DiagnosticCode::WrongArity => "grammar.wrong-arity",
            DiagnosticCode::ExpectedAtom => "grammar.expected-atom",
            DiagnosticCode::ExpectedList => "grammar.expected-list",
            DiagnosticCode::InvalidPercent => "grammar.invalid-percent",
            DiagnosticCode::EmptyClause => "grammar.empty-clause",
            DiagnosticCode::UnexpectedClause => "grammar.unexpected-clause",
            DiagnosticCode::UnknownFunction => "semantic.unknown-function",
            DiagnosticCode::InvalidTokenState => "semantic.invalid-token-state",
            DiagnosticCode::OwnershipSumMismatch => "semantic.ownership-sum",
            DiagnosticCode::MissingController => "semantic.missing-controller",
            DiagnosticCode::PercentOutOfRange => "semantic.percent-out-of-range",
            DiagnosticCode::MissingNaturePurpose => "semantic.missing-nature-purpose",
            DiagnosticCode::MissingClientBusinessUnit => "semantic.missing-client-business-unit",
            DiagnosticCode::MissingKycToken => "semantic.missing-kyc-token",
            DiagnosticCode::DuplicateEntry => "semantic.duplicate-entry",
            DiagnosticCode::UnknownAttribute => "ontology.unknown-attribute",
            DiagnosticCode::UnknownDocument => "ontology.unknown-document",
            DiagnosticCode::UnknownRegulation => "ontology.unknown-regulation",
            DiagnosticCode::MissingJurisdiction => "ontology.missing-jurisdiction",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            DiagnosticCode::UnknownClause => Phase::Bind,
            DiagnosticCode::WrongArity
            | DiagnosticCode::ExpectedAtom
            | DiagnosticCode::ExpectedList
            | DiagnosticCode::InvalidPercent
            | DiagnosticCode::EmptyClause
            | DiagnosticCode::UnexpectedClause => Phase::Grammar,
            DiagnosticCode::UnknownFunction
            | DiagnosticCode::InvalidTokenState
            | DiagnosticCode::OwnershipSumMismatch
            | DiagnosticCode::MissingController
            | DiagnosticCode::PercentOutOfRange
            | DiagnosticCode::MissingNaturePurpose
            | DiagnosticCode::MissingClientBusinessUnit
            | DiagnosticCode::MissingKycToken
            | DiagnosticCode::DuplicateEntry => Phase::Semantic,
            DiagnosticCode::UnknownAttribute
            | DiagnosticCode::UnknownDocument
            | DiagnosticCode::UnknownRegulation
            | DiagnosticCode::MissingJurisdiction => Phase::Ontology,
        }
    }
}

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding with severity, code and the node path it refers to
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: DiagnosticCode,
    pub message: String,
    pub path: String,
}

impl Diagnostic {
    /// Create an error finding
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            code,
            message: message.into(),
            path: String::new(),
        }
    }

    /// Create a warning finding
    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            code,
            message: message.into(),
            path: String::new(),
        }
    }

    /// Attach the node path
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }

    pub fn is_warning(&self) -> bool {
        matches!(self.severity, Severity::Warning)
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}[{}] {}: {}", level, self.code, self.path, self.message)
    }
}

// =============================================================================
// Convenience Builders
// =============================================================================

/// Error for a clause with the wrong number of arguments
pub fn arity_error(clause: &str, expected: &str, found: usize, path: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::WrongArity,
        format!(
            "'{}' expects {}, found {} argument(s)",
            clause, expected, found
        ),
    )
    .at(path)
}

/// Error for a code the ontology does not know
pub fn unresolved_error(code: DiagnosticCode, kind: &str, value: &str, path: &str) -> Diagnostic {
    Diagnostic::error(code, format!("unknown {} code '{}'", kind, value)).at(path)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let diag = Diagnostic::error(DiagnosticCode::MissingController, "no controller");
        assert!(diag.is_error());
        assert!(!diag.is_warning());
        assert_eq!(diag.message, "no controller");
    }

    #[test]
    fn test_warning_not_error() {
        let diag = Diagnostic::warning(DiagnosticCode::UnknownClause, "ignored");
        assert!(!diag.is_error());
        assert!(diag.is_warning());
    }

    #[test]
    fn test_display_includes_code_and_path() {
        let diag = arity_error(
            "owner",
            "a name and a percentage",
            1,
            "kyc-case/ownership-structure/owner[0]",
        );
        let rendered = diag.to_string();
        assert!(rendered.starts_with("error[grammar.wrong-arity]"));
        assert!(rendered.contains("kyc-case/ownership-structure/owner[0]"));
    }

    #[test]
    fn test_code_phase() {
        assert_eq!(DiagnosticCode::UnknownAttribute.phase(), Phase::Ontology);
        assert_eq!(DiagnosticCode::OwnershipSumMismatch.phase(), Phase::Semantic);
        assert_eq!(DiagnosticCode::WrongArity.phase(), Phase::Grammar);
    }

    #[test]
    fn test_serializes_lowercase_severity() {
        let diag = Diagnostic::warning(DiagnosticCode::MissingKycToken, "missing");
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["severity"], "warning");
    }
}
