//! Append-only persistence: case versions, amendment log, validation log,
//! lineage log
//!
//! Versions of a case are numbered 1, 2, 3... with no gaps. Allocating the
//! next number and inserting the row happen as one serialized unit per case
//! name; the in-memory store holds a lock across both, the Postgres store
//! takes a transaction-scoped advisory lock and relies on a unique
//! `(case_name, version)` constraint as a backstop.

mod memory;
#[cfg(feature = "database")]
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kyc_dsl_core::{ContentHash, EvaluationResult};

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use postgres::PgStore;

/// One immutable snapshot of a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseVersion {
    pub case_name: String,
    pub version: i32,
    pub dsl_snapshot: String,
    pub hash: ContentHash,
    pub created_at: DateTime<Utc>,
}

/// Audit record of one applied amendment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amendment {
    pub id: i64,
    pub case_name: String,
    pub step: String,
    pub change_type: String,
    pub diff: String,
    pub created_at: DateTime<Utc>,
}

/// Whether a validated case was accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Passed,
    Failed,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationStatus::Passed => "passed",
            ValidationStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for ValidationStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(ValidationStatus::Passed),
            "failed" => Ok(ValidationStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown validation status '{}'", other))),
        }
    }
}

/// Result of validating one submitted case, as written to the validation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub case_name: String,
    /// Version the case was stored as or already matched; `None` when rejected
    pub version: Option<i32>,
    pub status: ValidationStatus,
    pub error_message: Option<String>,
    pub total_checks: i32,
    pub passed_checks: i32,
    pub failed_checks: i32,
    pub grammar_version: String,
    pub ontology_version: String,
    pub actor: String,
}

/// Validation audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub id: i64,
    #[serde(flatten)]
    pub summary: ValidationSummary,
    pub created_at: DateTime<Utc>,
}

/// Evaluation result recorded against a case version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub case_name: String,
    pub case_version: i32,
    pub result: EvaluationResult,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("case '{0}' not found")]
    NotFound(String),

    #[error("version {version} of case '{case_name}' was taken by a concurrent writer")]
    Conflict { case_name: String, version: i32 },

    #[error("database error: {0}")]
    Database(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Store `text` as the next version of `case_name`
    async fn save_case_version(
        &self,
        case_name: &str,
        text: &str,
    ) -> Result<CaseVersion, StoreError>;

    /// Store `text` as version `based_on + 1`, failing with
    /// [`StoreError::Conflict`] if another writer got there first
    async fn save_version_after(
        &self,
        case_name: &str,
        based_on: i32,
        text: &str,
    ) -> Result<CaseVersion, StoreError>;

    async fn get_latest_version(&self, case_name: &str) -> Result<Option<CaseVersion>, StoreError>;

    async fn get_version(
        &self,
        case_name: &str,
        version: i32,
    ) -> Result<Option<CaseVersion>, StoreError>;

    /// All versions, oldest first
    async fn list_versions(&self, case_name: &str) -> Result<Vec<CaseVersion>, StoreError>;

    /// Earliest version of `case_name` whose content hash is `hash`
    async fn find_version_by_hash(
        &self,
        case_name: &str,
        hash: &ContentHash,
    ) -> Result<Option<CaseVersion>, StoreError>;

    async fn get_latest_dsl(&self, case_name: &str) -> Result<String, StoreError> {
        self.get_latest_version(case_name)
            .await?
            .map(|v| v.dsl_snapshot)
            .ok_or_else(|| StoreError::NotFound(case_name.to_string()))
    }
}

#[async_trait]
pub trait AmendmentLog: Send + Sync {
    async fn insert_amendment(
        &self,
        case_name: &str,
        step: &str,
        change_type: &str,
        diff: &str,
    ) -> Result<Amendment, StoreError>;

    /// Amendments in insertion order
    async fn get_amendments(&self, case_name: &str) -> Result<Vec<Amendment>, StoreError>;
}

#[async_trait]
pub trait ValidationLog: Send + Sync {
    async fn record_validation(
        &self,
        summary: &ValidationSummary,
    ) -> Result<ValidationRecord, StoreError>;

    /// Recorded validations in insertion order
    async fn get_validations(&self, case_name: &str) -> Result<Vec<ValidationRecord>, StoreError>;
}

#[async_trait]
pub trait LineageLog: Send + Sync {
    async fn record_evaluation(
        &self,
        case_name: &str,
        case_version: i32,
        result: &EvaluationResult,
    ) -> Result<(), StoreError>;

    /// Recorded results in insertion order
    async fn get_evaluations(&self, case_name: &str) -> Result<Vec<EvaluationRecord>, StoreError>;
}

/// A store that keeps versions and every audit log
pub trait CaseStore: VersionStore + AmendmentLog + ValidationLog + LineageLog {}

impl<T: VersionStore + AmendmentLog + ValidationLog + LineageLog> CaseStore for T {}
