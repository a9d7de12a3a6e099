//! Service-level error types
//!
//! Core failures (syntax, bind, validation, serialization) are wrapped as they
//! are; nothing is stringified until it reaches the caller.

use std::time::Duration;

use thiserror::Error;

use kyc_dsl_core::{BindError, SerializationError, SyntaxError, ValidationError};

use crate::store::StoreError;

/// Failure to turn text into a validated canonical case
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),

    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("expected exactly one kyc-case form, found {0}")]
    CaseCount(usize),
}

impl PipelineError {
    /// Findings carried by a validation failure
    pub fn findings(&self) -> &[kyc_dsl_core::Diagnostic] {
        match self {
            PipelineError::Validation(e) => &e.findings,
            _ => &[],
        }
    }
}

/// Remote amendment collaborator failure
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RemoteError {
    #[error("remote amendment service unavailable: {0}")]
    Unavailable(String),

    #[error("remote amendment service rejected step: {0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum AmendmentError {
    #[error("case '{0}' has no stored version")]
    CaseNotFound(String),

    #[error("stored case '{case_name}' failed to load: {source}")]
    Load {
        case_name: String,
        #[source]
        source: PipelineError,
    },

    #[error("amended case '{case_name}' is invalid: {source}")]
    Invalid {
        case_name: String,
        #[source]
        source: PipelineError,
    },

    #[error("amendment returned case '{found}' for '{expected}'")]
    CaseRenamed { expected: String, found: String },

    #[error("unknown amendment step '{0}'")]
    UnknownStep(String),

    #[error("mutation for step '{step}' failed: {message}")]
    Mutation { step: String, message: String },

    #[error("step '{step}': {source}")]
    Remote {
        step: String,
        #[source]
        source: RemoteError,
    },

    #[error("remote amendment for step '{step}' timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AmendmentError {
    /// True when nothing was persisted and the same call may be repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            AmendmentError::Timeout { .. } => true,
            AmendmentError::Remote { source, .. } => matches!(source, RemoteError::Unavailable(_)),
            AmendmentError::Store(e) => e.is_conflict(),
            _ => false,
        }
    }
}

/// Everything the crate can fail with
#[derive(Debug, Error)]
pub enum KycError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Amendment(#[from] AmendmentError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = KycError> = std::result::Result<T, E>;
