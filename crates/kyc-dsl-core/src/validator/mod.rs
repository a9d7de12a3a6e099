//! Three-phase case validator
//!
//! 1. Grammar: clause shape and arity, checked on the AST.
//! 2. Semantic: closed enumerations, ownership arithmetic, missing clauses,
//!    checked on the bound `Case`.
//! 3. Ontology: attribute, document and regulation codes resolved through an
//!    [`OntologyResolver`].
//!
//! Every phase runs and every finding is reported. A case is persistable only
//! when no error-severity finding exists.
//!
//! # Usage
//!
//! ```
//! use kyc_dsl_core::{bind, parse_source, OntologyResolver, Validator};
//!
//! struct AcceptAll;
//! impl OntologyResolver for AcceptAll {
//!     fn resolve_attribute(&self, _: &str) -> bool { true }
//!     fn resolve_document(&self, _: &str) -> bool { true }
//!     fn resolve_regulation(&self, _: &str) -> bool { true }
//! }
//!
//! let forms = parse_source(
//!     r#"(kyc-case X (ownership-structure (owner A 60) (owner B 40) (controller J "Director")))"#,
//! ).unwrap();
//! let bound = bind(&forms[0]).unwrap();
//! let report = Validator::new(&AcceptAll).validate(&forms[0], &bound);
//! assert!(!report.has_errors());
//! ```

mod grammar;
mod ontology;
mod semantic;

use serde::{Deserialize, Serialize};

use crate::ast::AstNode;
use crate::diagnostics::Diagnostic;
use crate::error::ValidationError;
use crate::binder::BoundCase;

pub use grammar::{GRAMMAR_VERSION, KYC_GRAMMAR_EBNF};

/// Allowed gap between the ownership percentage total and 100
pub const DEFAULT_OWNERSHIP_TOLERANCE: f64 = 0.01;

/// Existence checks against the closed code sets of the ontology
pub trait OntologyResolver {
    fn resolve_attribute(&self, code: &str) -> bool;
    fn resolve_document(&self, code: &str) -> bool;
    fn resolve_regulation(&self, code: &str) -> bool;
}

// =============================================================================
// REPORT
// =============================================================================

/// All findings for one case, in phase order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub case_name: String,
    pub findings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(Diagnostic::is_error)
    }

    pub fn is_valid(&self) -> bool {
        !self.has_errors()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.findings.iter().filter(|f| f.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.findings.iter().filter(|f| f.is_warning())
    }

    /// Prepend findings collected before validation (binder warnings)
    pub fn with_prior(mut self, prior: Vec<Diagnostic>) -> Self {
        let mut findings = prior;
        findings.append(&mut self.findings);
        self.findings = findings;
        self
    }

    /// `Err` carrying every finding when any error-severity finding exists
    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.has_errors() {
            Err(ValidationError {
                case_name: self.case_name,
                findings: self.findings,
            })
        } else {
            Ok(self)
        }
    }
}

// =============================================================================
// VALIDATOR
// =============================================================================

pub struct Validator<'a> {
    ontology: &'a dyn OntologyResolver,
    ownership_tolerance: f64,
}

impl<'a> Validator<'a> {
    pub fn new(ontology: &'a dyn OntologyResolver) -> Self {
        Self {
            ontology,
            ownership_tolerance: DEFAULT_OWNERSHIP_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.ownership_tolerance = tolerance;
        self
    }

    /// Run all three phases; `node` must be the form `bound` came from
    pub fn validate(&self, node: &AstNode, bound: &BoundCase) -> ValidationReport {
        let case = &bound.case;
        let mut findings = grammar::check(node);
        findings.extend(semantic::check(case, &bound.sources, self.ownership_tolerance));
        findings.extend(ontology::check(case, &bound.sources, self.ontology));

        let errors = findings.iter().filter(|f| f.is_error()).count();
        tracing::debug!(
            case = %case.name,
            errors,
            warnings = findings.len() - errors,
            "validated case"
        );

        ValidationReport {
            case_name: case.name.clone(),
            findings,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FixedOntology;
    use super::*;
    use crate::binder::bind;
    use crate::diagnostics::DiagnosticCode;
    use crate::parser::parse_source;

    fn validate_source(source: &str) -> ValidationReport {
        let forms = parse_source(source).unwrap();
        let bound = bind(&forms[0]).unwrap();
        let ontology = FixedOntology::standard();
        Validator::new(&ontology)
            .validate(&forms[0], &bound)
            .with_prior(bound.warnings)
    }

    fn error_codes(report: &ValidationReport) -> Vec<DiagnosticCode> {
        report.errors().map(|f| f.code).collect()
    }

    #[test]
    fn test_ownership_scenario_valid() {
        let report = validate_source(
            r#"(kyc-case X
                (ownership-structure (owner A 60)(owner B 40)(controller J "Director")))"#,
        );
        assert!(report.is_valid(), "{:?}", report.findings);
    }

    #[test]
    fn test_ownership_scenario_sum_mismatch() {
        let report = validate_source(
            r#"(kyc-case X
                (ownership-structure (owner A 50)(owner B 40)(controller J "Director")))"#,
        );
        let errors: Vec<_> = report.errors().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code, DiagnosticCode::OwnershipSumMismatch);
        assert!(errors[0].message.contains("ownership percentages must sum to 100"));
        assert_eq!(errors[0].path, "kyc-case/ownership-structure[0]");
    }

    #[test]
    fn test_finding_paths_follow_source_clauses() {
        let report = validate_source(
            r#"(kyc-case X
                 (function)
                 (function NOT-A-FUNCTION)
                 (ownership-structure (owner A 100) (controller J "CEO"))
                 (ownership-structure (owner A 50) (controller J "CEO")))"#,
        );
        let path_of = |code: DiagnosticCode| {
            report.errors().find(|f| f.code == code).map(|f| f.path.clone())
        };
        assert_eq!(
            path_of(DiagnosticCode::UnknownFunction).as_deref(),
            Some("kyc-case/function[1]")
        );
        assert_eq!(
            path_of(DiagnosticCode::OwnershipSumMismatch).as_deref(),
            Some("kyc-case/ownership-structure[1]")
        );
    }

    #[test]
    fn test_ownership_over_100() {
        let report = validate_source(
            r#"(kyc-case X
                (ownership-structure (owner A 70)(beneficial-owner B 40)(controller J "CEO")))"#,
        );
        assert_eq!(error_codes(&report), vec![DiagnosticCode::OwnershipSumMismatch]);
    }

    #[test]
    fn test_ownership_within_tolerance() {
        let report = validate_source(
            r#"(kyc-case X (ownership-structure
                 (owner A 33.333)(owner B 33.333)(owner C 33.333)(controller J "CEO")))"#,
        );
        assert!(report.is_valid(), "{:?}", report.findings);
    }

    #[test]
    fn test_zero_controllers_fails() {
        let report = validate_source("(kyc-case X (ownership-structure (owner A 100)))");
        assert_eq!(error_codes(&report), vec![DiagnosticCode::MissingController]);
    }

    #[test]
    fn test_unresolved_attribute() {
        let report = validate_source(
            "(kyc-case X
               (data-dictionary (attribute SHOE_SIZE (primary-source (document PASSPORT)))))",
        );
        assert_eq!(error_codes(&report), vec![DiagnosticCode::UnknownAttribute]);
    }

    #[test]
    fn test_resolvable_attribute_passes() {
        let report = validate_source(
            "(kyc-case X
               (data-dictionary (attribute legal_name (primary-source (document cert_incorp)))))",
        );
        assert!(report.is_valid(), "{:?}", report.findings);
    }

    #[test]
    fn test_phases_report_together() {
        let report = validate_source(
            r#"(kyc-case X
                 (function LAUNCH-ROCKETS)
                 (kyc-token "closed")
                 (owner-typo A)
                 (document-requirements (jurisdiction EU) (required (document FAKE_DOC))))"#,
        );
        assert_eq!(
            error_codes(&report),
            vec![
                DiagnosticCode::UnknownFunction,
                DiagnosticCode::InvalidTokenState,
                DiagnosticCode::UnknownDocument
            ]
        );
        assert!(report.warnings().any(|w| w.code == DiagnosticCode::UnknownClause));
    }

    #[test]
    fn test_into_result() {
        let ok = validate_source("(kyc-case X (kyc-token \"approved\"))");
        assert!(ok.into_result().is_ok());

        let bad = validate_source("(kyc-case X (kyc-token \"closed\"))");
        let err = bad.into_result().unwrap_err();
        assert_eq!(err.case_name, "X");
        assert_eq!(err.error_count(), 1);
    }
}
