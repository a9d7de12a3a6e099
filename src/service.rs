//! Case submission
//!
//! Runs submitted text through the pipeline and stores every valid case as a
//! new version. Invalid cases are reported and never written. Every case that
//! declares a name leaves a validation record, pass or fail.

use std::sync::Arc;
use std::time::Duration;

use kyc_dsl_core::Diagnostic;

use crate::config::KycConfig;
use crate::error::{KycError, PipelineError, Result};
use crate::pipeline::{CasePipeline, ProcessedCase};
use crate::store::{CaseStore, CaseVersion, StoreError, ValidationLog, VersionStore};

/// What happened to one case of a submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Stored as a new version
    Created {
        version: CaseVersion,
        warnings: Vec<Diagnostic>,
    },
    /// Canonical text matches the latest stored version; nothing written
    Unchanged { version: CaseVersion },
    /// Failed to bind or validate
    Rejected(PipelineError),
}

impl SubmitOutcome {
    pub fn version(&self) -> Option<&CaseVersion> {
        match self {
            SubmitOutcome::Created { version, .. } | SubmitOutcome::Unchanged { version } => {
                Some(version)
            }
            SubmitOutcome::Rejected(_) => None,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, SubmitOutcome::Rejected(_))
    }
}

pub struct CaseService {
    store: Arc<dyn CaseStore>,
    pipeline: CasePipeline,
    actor: String,
    max_retries: u32,
}

impl CaseService {
    pub fn new(store: Arc<dyn CaseStore>, pipeline: CasePipeline) -> Self {
        let defaults = KycConfig::default();
        Self {
            store,
            pipeline,
            actor: defaults.validator_actor,
            max_retries: defaults.store_max_retries,
        }
    }

    /// Take validation actor and retry budget from configuration
    pub fn with_config(mut self, config: &KycConfig) -> Self {
        self.actor = config.validator_actor.clone();
        self.max_retries = config.store_max_retries.max(1);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn pipeline(&self) -> &CasePipeline {
        &self.pipeline
    }

    /// Process and persist every case in `text`, one outcome per case form.
    /// A syntax error rejects the whole submission.
    pub async fn submit(&self, text: &str) -> Result<Vec<SubmitOutcome>> {
        let attempts = self.pipeline.process(text)?;
        let mut outcomes = Vec::with_capacity(attempts.len());

        for attempt in attempts {
            let mut summary = attempt
                .case_name
                .as_deref()
                .map(|name| self.pipeline.summarize(name, &attempt.result, &self.actor));

            let outcome = match attempt.result {
                Ok(case) => self.persist(case).await?,
                Err(e) => {
                    tracing::warn!("rejected case: {}", e);
                    SubmitOutcome::Rejected(e)
                }
            };

            if let Some(summary) = summary.as_mut() {
                summary.version = outcome.version().map(|v| v.version);
                let record = self.store.record_validation(summary).await?;
                tracing::debug!(
                    case = %record.summary.case_name,
                    id = record.id,
                    "recorded validation"
                );
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Store `processed` unless it matches the latest version, retrying when
    /// another writer saves the same case in between
    async fn persist(&self, processed: ProcessedCase) -> Result<SubmitOutcome> {
        let mut attempt = 0;
        loop {
            match self.try_persist(&processed).await {
                Err(KycError::Store(StoreError::Conflict { version, .. }))
                    if attempt + 1 < self.max_retries =>
                {
                    tracing::warn!(
                        case = %processed.case.name,
                        version,
                        "Submission retry {} due to concurrent writer",
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_millis(50 * (attempt + 1) as u64)).await;
                    attempt += 1;
                }
                Ok(SubmitOutcome::Created { version, .. }) => {
                    return Ok(SubmitOutcome::Created {
                        version,
                        warnings: processed.report.findings,
                    })
                }
                result => return result,
            }
        }
    }

    async fn try_persist(&self, processed: &ProcessedCase) -> Result<SubmitOutcome> {
        let name = &processed.case.name;
        let latest = self.store.get_latest_version(name).await?;
        if let Some(latest) = latest.as_ref() {
            if latest.hash == processed.hash {
                tracing::info!(
                    case = %name,
                    version = latest.version,
                    "content unchanged, no new version"
                );
                return Ok(SubmitOutcome::Unchanged { version: latest.clone() });
            }
        }

        // the save only lands on top of the version the hash was compared with
        let based_on = latest.map_or(0, |v| v.version);
        let version = self
            .store
            .save_version_after(name, based_on, &processed.canonical_text)
            .await?;
        Ok(SubmitOutcome::Created {
            version,
            warnings: Vec::new(),
        })
    }
}
