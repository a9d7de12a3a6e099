//! Amendment engine
//!
//! load latest -> parse + bind -> mutate (local or remote) -> serialize ->
//! validate -> save as latest + 1 -> append audit record.
//!
//! The save only succeeds while the loaded version is still the latest. A
//! concurrent amendment that got there first turns into a store conflict, and
//! the whole cycle is repeated against the new latest version.

mod diff;
mod mutations;
mod steps;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use kyc_dsl_core::{Case, ValidationReport};

use crate::config::KycConfig;
use crate::error::{AmendmentError, RemoteError};
use crate::pipeline::{CasePipeline, ProcessedCase};
use crate::store::{Amendment, AmendmentLog, CaseStore, CaseVersion, StoreError, VersionStore};

pub use diff::{line_diff, NO_CHANGES};
pub use mutations::builtin;
pub use steps::{catalogue, find_step, ChangeType, StepInfo};

/// A pure mutation of the case model; `Err` carries a reason
pub type MutationFn = Arc<dyn Fn(&mut Case) -> Result<(), String> + Send + Sync>;

/// How an amendment changes the case
#[derive(Clone)]
pub enum AmendmentStrategy {
    /// Mutate the bound model in process
    LocalMutation(MutationFn),
    /// Ask the remote amendment service to rewrite the case for this step
    RemoteMutation(String),
}

impl AmendmentStrategy {
    pub fn local<F>(mutation: F) -> Self
    where
        F: Fn(&mut Case) -> Result<(), String> + Send + Sync + 'static,
    {
        AmendmentStrategy::LocalMutation(Arc::new(mutation))
    }

    /// The built-in local mutation for a catalogue step
    pub fn builtin(step: &str) -> Result<Self, AmendmentError> {
        builtin(step)
            .map(AmendmentStrategy::LocalMutation)
            .ok_or_else(|| AmendmentError::UnknownStep(step.to_string()))
    }

    pub fn remote(step: impl Into<String>) -> Self {
        AmendmentStrategy::RemoteMutation(step.into())
    }
}

impl std::fmt::Debug for AmendmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AmendmentStrategy::LocalMutation(_) => f.write_str("LocalMutation(..)"),
            AmendmentStrategy::RemoteMutation(step) => {
                f.debug_tuple("RemoteMutation").field(step).finish()
            }
        }
    }
}

/// Remote collaborator that rewrites a case for a named step
#[async_trait]
pub trait RemoteAmendmentService: Send + Sync {
    /// Amended DSL text for `case_name`
    async fn amend(
        &self,
        case_name: &str,
        step: &str,
        current_dsl: &str,
    ) -> Result<String, RemoteError>;
}

/// Result of a successful amendment
#[derive(Debug, Clone)]
pub struct AppliedAmendment {
    pub previous: CaseVersion,
    pub version: CaseVersion,
    pub amendment: Amendment,
    pub change_type: ChangeType,
    pub report: ValidationReport,
}

pub struct AmendmentEngine {
    store: Arc<dyn CaseStore>,
    pipeline: CasePipeline,
    remote: Option<Arc<dyn RemoteAmendmentService>>,
    remote_timeout: Duration,
    max_retries: u32,
}

impl AmendmentEngine {
    pub fn new(store: Arc<dyn CaseStore>, pipeline: CasePipeline) -> Self {
        let defaults = KycConfig::default();
        Self {
            store,
            pipeline,
            remote: None,
            remote_timeout: defaults.remote_timeout,
            max_retries: defaults.store_max_retries,
        }
    }

    /// Take remote timeout and retry budget from configuration
    pub fn with_config(mut self, config: &KycConfig) -> Self {
        self.remote_timeout = config.remote_timeout;
        self.max_retries = config.store_max_retries.max(1);
        self
    }

    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteAmendmentService>,
        timeout: Duration,
    ) -> Self {
        self.remote = Some(remote);
        self.remote_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Apply `strategy` to the latest version of `case_name` and store the
    /// result as a new version with an audit record
    pub async fn apply_amendment(
        &self,
        case_name: &str,
        step: &str,
        strategy: AmendmentStrategy,
    ) -> Result<AppliedAmendment, AmendmentError> {
        let mut attempt = 0;
        loop {
            match self.try_apply(case_name, step, &strategy).await {
                Err(AmendmentError::Store(StoreError::Conflict { version, .. }))
                    if attempt + 1 < self.max_retries =>
                {
                    tracing::warn!(
                        case = case_name,
                        step,
                        version,
                        "Amendment retry {} due to concurrent writer",
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_millis(50 * (attempt + 1) as u64)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Apply the built-in mutation registered for `step`
    pub async fn apply_step(
        &self,
        case_name: &str,
        step: &str,
    ) -> Result<AppliedAmendment, AmendmentError> {
        let strategy = AmendmentStrategy::builtin(step)?;
        self.apply_amendment(case_name, step, strategy).await
    }

    pub async fn get_amendments(&self, case_name: &str) -> Result<Vec<Amendment>, AmendmentError> {
        Ok(self.store.get_amendments(case_name).await?)
    }

    async fn try_apply(
        &self,
        case_name: &str,
        step: &str,
        strategy: &AmendmentStrategy,
    ) -> Result<AppliedAmendment, AmendmentError> {
        let previous = self
            .store
            .get_latest_version(case_name)
            .await?
            .ok_or_else(|| AmendmentError::CaseNotFound(case_name.to_string()))?;

        let amended = match strategy {
            AmendmentStrategy::LocalMutation(mutation) => {
                self.mutate_locally(&previous, step, mutation)?
            }
            AmendmentStrategy::RemoteMutation(remote_step) => {
                self.mutate_remotely(&previous, remote_step).await?
            }
        };

        if amended.case.name != case_name {
            return Err(AmendmentError::CaseRenamed {
                expected: case_name.to_string(),
                found: amended.case.name,
            });
        }

        let version = self
            .store
            .save_version_after(case_name, previous.version, &amended.canonical_text)
            .await?;

        let change_type = ChangeType::classify(step);
        let diff = line_diff(&previous.dsl_snapshot, &version.dsl_snapshot);
        let amendment = self
            .store
            .insert_amendment(case_name, step, &change_type.to_string(), &diff)
            .await?;

        tracing::info!(
            case = case_name,
            step,
            change_type = %change_type,
            version = version.version,
            "applied amendment"
        );

        Ok(AppliedAmendment {
            previous,
            version,
            amendment,
            change_type,
            report: amended.report,
        })
    }

    fn mutate_locally(
        &self,
        previous: &CaseVersion,
        step: &str,
        mutation: &MutationFn,
    ) -> Result<ProcessedCase, AmendmentError> {
        let mut case = self
            .pipeline
            .load(&previous.dsl_snapshot)
            .map_err(|source| AmendmentError::Load {
                case_name: previous.case_name.clone(),
                source,
            })?;

        mutation(&mut case).map_err(|message| AmendmentError::Mutation {
            step: step.to_string(),
            message,
        })?;

        self.pipeline
            .process_case(&case)
            .map_err(|source| AmendmentError::Invalid {
                case_name: previous.case_name.clone(),
                source,
            })
    }

    async fn mutate_remotely(
        &self,
        previous: &CaseVersion,
        step: &str,
    ) -> Result<ProcessedCase, AmendmentError> {
        let remote = self.remote.as_ref().ok_or_else(|| AmendmentError::Remote {
            step: step.to_string(),
            source: RemoteError::Unavailable("no remote amendment service configured".to_string()),
        })?;

        let call = remote.amend(&previous.case_name, step, &previous.dsl_snapshot);
        let text = match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(Ok(text)) => text,
            Ok(Err(source)) => {
                return Err(AmendmentError::Remote {
                    step: step.to_string(),
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(case = %previous.case_name, step, "remote amendment timed out");
                return Err(AmendmentError::Timeout {
                    step: step.to_string(),
                    timeout: self.remote_timeout,
                });
            }
        };

        self.pipeline
            .process_one(&text)
            .map_err(|source| AmendmentError::Invalid {
                case_name: previous.case_name.clone(),
                source,
            })
    }
}
