//! Text to validated canonical case
//!
//! tokenize -> parse -> (per case) bind -> validate -> serialize -> hash.
//! A syntax error rejects the whole input; bind and validation failures only
//! reject the case they belong to.

use std::sync::Arc;

use kyc_dsl_core::binder::CASE_HEAD;
use kyc_dsl_core::{
    bind, parse_source, serialize, AstNode, Case, ContentHash, OntologyResolver, ValidationReport,
    Validator, DEFAULT_OWNERSHIP_TOLERANCE, GRAMMAR_VERSION,
};

use crate::config::KycConfig;
use crate::error::PipelineError;
use crate::ontology::OntologySnapshot;
use crate::store::{ValidationStatus, ValidationSummary};

/// Checks counted in a validation summary: binding plus the three validator
/// phases
const VALIDATION_CHECKS: i32 = 4;

/// A case that passed validation, with its canonical form
#[derive(Debug, Clone)]
pub struct ProcessedCase {
    pub case: Case,
    pub canonical_text: String,
    pub hash: ContentHash,
    /// All findings, warnings only
    pub report: ValidationReport,
}

/// The result for one top-level form of an input
#[derive(Debug)]
pub struct CaseAttempt {
    /// Name the form declares, if it has one
    pub case_name: Option<String>,
    pub result: Result<ProcessedCase, PipelineError>,
}

#[derive(Clone)]
pub struct CasePipeline {
    ontology: Arc<dyn OntologyResolver + Send + Sync>,
    ontology_version: String,
    ownership_tolerance: f64,
}

impl CasePipeline {
    pub fn new(ontology: Arc<dyn OntologyResolver + Send + Sync>) -> Self {
        Self {
            ontology,
            ontology_version: "unversioned".to_string(),
            ownership_tolerance: DEFAULT_OWNERSHIP_TOLERANCE,
        }
    }

    /// Pipeline over a loaded snapshot with the configured tolerance
    pub fn from_config(snapshot: OntologySnapshot, config: &KycConfig) -> Self {
        let version = snapshot.version();
        Self::new(Arc::new(snapshot))
            .with_ontology_version(version)
            .with_tolerance(config.ownership_tolerance)
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.ownership_tolerance = tolerance;
        self
    }

    /// Ontology version written to validation summaries
    pub fn with_ontology_version(mut self, version: impl Into<String>) -> Self {
        self.ontology_version = version.into();
        self
    }

    pub fn ownership_tolerance(&self) -> f64 {
        self.ownership_tolerance
    }

    pub fn ontology_version(&self) -> &str {
        &self.ontology_version
    }

    /// Process every case in `text`. The outer error is a syntax error; each
    /// case then succeeds or fails on its own.
    pub fn process(&self, text: &str) -> Result<Vec<CaseAttempt>, PipelineError> {
        let forms = parse_source(text)?;
        tracing::debug!(forms = forms.len(), "parsed input");
        Ok(forms
            .iter()
            .map(|form| CaseAttempt {
                case_name: declared_name(form),
                result: self.process_form(form),
            })
            .collect())
    }

    /// Audit summary for one case result. `version` is left unset.
    pub fn summarize(
        &self,
        case_name: &str,
        result: &Result<ProcessedCase, PipelineError>,
        actor: &str,
    ) -> ValidationSummary {
        let (status, error_message, passed, failed) = match result {
            Ok(_) => (ValidationStatus::Passed, None, VALIDATION_CHECKS, 0),
            // binding stops before the validator phases run
            Err(PipelineError::Bind(e)) => {
                (ValidationStatus::Failed, Some(format!("structure: {}", e)), 0, 1)
            }
            Err(PipelineError::Validation(e)) => {
                let failed = e.failed_phases().len() as i32;
                let message = e
                    .findings
                    .iter()
                    .filter(|f| f.is_error())
                    .map(|f| format!("{} at {}: {}", f.code, f.path, f.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                (ValidationStatus::Failed, Some(message), VALIDATION_CHECKS - failed, failed)
            }
            Err(e) => (ValidationStatus::Failed, Some(e.to_string()), VALIDATION_CHECKS, 0),
        };

        ValidationSummary {
            case_name: case_name.to_string(),
            version: None,
            status,
            error_message,
            total_checks: passed + failed,
            passed_checks: passed,
            failed_checks: failed,
            grammar_version: GRAMMAR_VERSION.to_string(),
            ontology_version: self.ontology_version.clone(),
            actor: actor.to_string(),
        }
    }

    /// Process text that must hold exactly one case
    pub fn process_one(&self, text: &str) -> Result<ProcessedCase, PipelineError> {
        let forms = parse_source(text)?;
        match forms.as_slice() {
            [form] => self.process_form(form),
            _ => Err(PipelineError::CaseCount(forms.len())),
        }
    }

    /// Parse and bind a single stored case without validating it
    pub fn load(&self, text: &str) -> Result<Case, PipelineError> {
        let forms = parse_source(text)?;
        match forms.as_slice() {
            [form] => Ok(bind(form)?.case),
            _ => Err(PipelineError::CaseCount(forms.len())),
        }
    }

    /// Validate and canonicalize an in-memory case by sending its text back
    /// through the full pipeline
    pub fn process_case(&self, case: &Case) -> Result<ProcessedCase, PipelineError> {
        let text = serialize(case)?;
        self.process_one(&text)
    }

    fn process_form(&self, form: &AstNode) -> Result<ProcessedCase, PipelineError> {
        let bound = bind(form)?;
        let report = Validator::new(self.ontology.as_ref())
            .with_tolerance(self.ownership_tolerance)
            .validate(form, &bound)
            .with_prior(bound.warnings)
            .into_result()?;

        let canonical_text = serialize(&bound.case)?;
        let hash = ContentHash::of(&canonical_text);
        tracing::debug!(case = %bound.case.name, hash = %hash.short(), "processed case");

        Ok(ProcessedCase {
            case: bound.case,
            canonical_text,
            hash,
            report,
        })
    }
}

fn declared_name(form: &AstNode) -> Option<String> {
    if form.head() != Some(CASE_HEAD) {
        return None;
    }
    form.args()
        .first()
        .and_then(AstNode::as_atom)
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::InMemoryOntology;
    use crate::ontology::OntologyRepository;
    use kyc_dsl_core::DiagnosticCode;

    async fn pipeline() -> CasePipeline {
        let snapshot = InMemoryOntology::standard().load_snapshot().await.unwrap();
        CasePipeline::new(Arc::new(snapshot))
    }

    #[tokio::test]
    async fn test_multiple_cases_isolated() {
        let outcomes = pipeline()
            .await
            .process(
                r#"
(kyc-case GOOD (ownership-structure (owner A 60)(owner B 40)(controller J "Director")))
(kyc-case BAD (ownership-structure (owner A 50)(owner B 40)(controller J "Director")))
"#,
            )
            .unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].result.is_ok());
        assert_eq!(outcomes[1].case_name.as_deref(), Some("BAD"));

        let err = outcomes[1].result.as_ref().unwrap_err();
        let findings = err.findings();
        assert_eq!(findings.iter().filter(|f| f.is_error()).count(), 1);
        assert_eq!(
            findings.iter().find(|f| f.is_error()).unwrap().code,
            DiagnosticCode::OwnershipSumMismatch
        );
    }

    #[tokio::test]
    async fn test_syntax_error_rejects_input() {
        let err = pipeline().await.process("(kyc-case A (policy P)").unwrap_err();
        assert!(matches!(err, PipelineError::Syntax(_)));
    }

    #[tokio::test]
    async fn test_canonical_text_and_hash() {
        let processed = pipeline()
            .await
            .process_one("(kyc-case   A\n (policy P) ; note\n)")
            .unwrap();
        assert_eq!(processed.canonical_text, "(kyc-case A\n  (policy P))\n");
        assert_eq!(processed.hash, ContentHash::of("(kyc-case A\n  (policy P))\n"));
        assert!(processed.report.is_valid());
        assert!(processed.report.warnings().count() > 0);
    }

    #[tokio::test]
    async fn test_process_one_rejects_many() {
        let err = pipeline()
            .await
            .process_one("(kyc-case A) (kyc-case B)")
            .unwrap_err();
        assert!(matches!(err, PipelineError::CaseCount(2)));
    }

    #[tokio::test]
    async fn test_from_config_uses_tolerance_and_snapshot_version() {
        let snapshot = InMemoryOntology::standard().load_snapshot().await.unwrap();
        let version = snapshot.version();
        let config = KycConfig {
            ownership_tolerance: 1.0,
            ..KycConfig::default()
        };
        let pipeline = CasePipeline::from_config(snapshot, &config);
        assert_eq!(pipeline.ontology_version(), version);
        assert_eq!(pipeline.ownership_tolerance(), 1.0);

        let text = r#"(kyc-case A (ownership-structure (owner X 99.5)(controller J "Director")))"#;
        let processed = pipeline.process_one(text).unwrap();
        assert_eq!(processed.case.name, "A");
    }

    #[tokio::test]
    async fn test_summarize_counts_checks() {
        let pipeline = pipeline().await.with_ontology_version("v7");
        let outcomes = pipeline
            .process(
                r#"
(kyc-case GOOD (policy P))
(kyc-case BAD (ownership-structure (owner A 50)(controller J "Director")))
(kyc-case (policy P))
"#,
            )
            .unwrap();

        let passed = pipeline.summarize("GOOD", &outcomes[0].result, "tester");
        assert_eq!(passed.status, ValidationStatus::Passed);
        assert_eq!((passed.total_checks, passed.passed_checks, passed.failed_checks), (4, 4, 0));
        assert_eq!(passed.grammar_version, GRAMMAR_VERSION);
        assert_eq!(passed.ontology_version, "v7");
        assert_eq!(passed.actor, "tester");
        assert_eq!(passed.error_message, None);

        let failed = pipeline.summarize("BAD", &outcomes[1].result, "tester");
        assert_eq!(failed.status, ValidationStatus::Failed);
        assert_eq!((failed.total_checks, failed.passed_checks, failed.failed_checks), (4, 3, 1));
        assert!(failed.error_message.unwrap().contains("semantic.ownership-sum"));

        assert_eq!(outcomes[2].case_name, None);
        let unbound = pipeline.summarize("?", &outcomes[2].result, "tester");
        assert_eq!((unbound.total_checks, unbound.passed_checks, unbound.failed_checks), (1, 0, 1));
    }
}
