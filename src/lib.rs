//! KYC DSL - versioned regulatory cases
//!
//! Services around the `kyc-dsl-core` front end: case submission, an
//! append-only version store, the amendment engine and derived-attribute
//! lineage.
//!
//! ## Flow
//! DSL text -> CasePipeline (parse, bind, validate, serialize, hash) -> VersionStore
//!
//! Each submitted case also leaves a pass/fail record in the ValidationLog.
//!
//! Amendments re-enter the pipeline from the latest stored version; lineage
//! evaluation reads a stored case and records every result.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use kyc_dsl::{CasePipeline, CaseService, InMemoryOntology, MemoryStore, OntologyRepository};
//!
//! # async fn run() -> kyc_dsl::Result<()> {
//! let ontology = InMemoryOntology::standard().load_snapshot().await?;
//! let pipeline = CasePipeline::new(Arc::new(ontology));
//! let service = CaseService::new(Arc::new(MemoryStore::new()), pipeline);
//! let outcomes = service.submit(r#"(kyc-case ACME (policy KYCPOL-UK-2025))"#).await?;
//! assert_eq!(outcomes.len(), 1);
//! # Ok(())
//! # }
//! ```

// Errors and configuration
pub mod config;
pub mod error;
pub mod telemetry;

// Persistence and reference data
pub mod ontology;
pub mod store;

// Case services
pub mod amendment;
pub mod lineage;
pub mod pipeline;
pub mod service;

pub use amendment::{
    catalogue, AmendmentEngine, AmendmentStrategy, AppliedAmendment, ChangeType,
    RemoteAmendmentService, StepInfo,
};
pub use config::{DatabaseConfig, KycConfig};
pub use error::{AmendmentError, KycError, PipelineError, RemoteError, Result};
pub use kyc_dsl_core::validator::{GRAMMAR_VERSION, KYC_GRAMMAR_EBNF};
pub use lineage::{CaseEvaluation, LineageService};
pub use ontology::{InMemoryOntology, OntologyRepository, OntologySnapshot};
pub use pipeline::{CaseAttempt, CasePipeline, ProcessedCase};
pub use service::{CaseService, SubmitOutcome};
pub use store::{
    Amendment, AmendmentLog, CaseStore, CaseVersion, EvaluationRecord, LineageLog, MemoryStore,
    StoreError, ValidationLog, ValidationRecord, ValidationStatus, ValidationSummary, VersionStore,
};

#[cfg(feature = "database")]
pub use ontology::PgOntologyRepository;
#[cfg(feature = "database")]
pub use store::PgStore;
