//! Derived-attribute evaluation for stored cases
//!
//! Raw attribute values arrive as JSON, are normalized into rule values, and
//! every evaluation result is written to the lineage audit log against the
//! case version it was computed for.

use std::collections::BTreeMap;
use std::sync::Arc;

use kyc_dsl_core::{Case, CompileError, Environment, EvaluationResult, LineageEvaluator, Value};

use crate::error::{KycError, Result};
use crate::pipeline::CasePipeline;
use crate::store::{CaseStore, EvaluationRecord, LineageLog, StoreError, VersionStore};

/// Outcome of evaluating one case version's derived attributes
#[derive(Debug, Clone)]
pub struct CaseEvaluation {
    pub case_name: String,
    pub case_version: i32,
    /// One result per derived attribute, in definition order
    pub results: Vec<EvaluationResult>,
    pub compile_errors: Vec<CompileError>,
    /// Raw values that have no rule representation (null, objects)
    pub rejected_inputs: BTreeMap<String, String>,
}

impl CaseEvaluation {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn value(&self, code: &str) -> Option<&Value> {
        self.results
            .iter()
            .find(|r| r.derived_code == code)
            .and_then(|r| r.value.as_ref())
    }
}

/// Normalize raw JSON attribute values into a rule environment. Values with
/// no counterpart are returned separately with the reason.
pub fn environment_from_json(
    values: &serde_json::Map<String, serde_json::Value>,
) -> (Environment, BTreeMap<String, String>) {
    let mut env = Environment::new();
    let mut rejected = BTreeMap::new();
    for (code, raw) in values {
        match Value::from_json(raw) {
            Ok(value) => {
                env.insert(code.clone(), value);
            }
            Err(reason) => {
                rejected.insert(code.clone(), reason);
            }
        }
    }
    (env, rejected)
}

pub struct LineageService {
    store: Arc<dyn CaseStore>,
    pipeline: CasePipeline,
}

impl LineageService {
    pub fn new(store: Arc<dyn CaseStore>, pipeline: CasePipeline) -> Self {
        Self { store, pipeline }
    }

    /// Evaluate the derived attributes of `case` and record every result
    pub async fn evaluate_case(
        &self,
        case_name: &str,
        case_version: i32,
        case: &Case,
        values: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CaseEvaluation, StoreError> {
        let (env, rejected_inputs) = environment_from_json(values);
        for (code, reason) in &rejected_inputs {
            tracing::warn!(
                case = case_name,
                attribute = %code,
                "ignoring attribute value: {}",
                reason
            );
        }

        let mut evaluator = LineageEvaluator::new(env);
        let compile_errors = evaluator.compile_derivations(&case.derived_attributes);
        let results = evaluator.evaluate(&case.derived_attributes);

        for result in &results {
            self.store.record_evaluation(case_name, case_version, result).await?;
        }

        let evaluation = CaseEvaluation {
            case_name: case_name.to_string(),
            case_version,
            results,
            compile_errors,
            rejected_inputs,
        };
        tracing::info!(
            case = case_name,
            version = case_version,
            succeeded = evaluation.succeeded(),
            failed = evaluation.failed(),
            "recorded lineage evaluations"
        );
        Ok(evaluation)
    }

    /// Load the latest stored version of `case_name` and evaluate it
    pub async fn evaluate_latest(
        &self,
        case_name: &str,
        values: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<CaseEvaluation> {
        let latest = self
            .store
            .get_latest_version(case_name)
            .await?
            .ok_or_else(|| StoreError::NotFound(case_name.to_string()))?;
        let case = self.pipeline.load(&latest.dsl_snapshot).map_err(KycError::Pipeline)?;
        Ok(self.evaluate_case(case_name, latest.version, &case, values).await?)
    }

    pub async fn get_evaluations(
        &self,
        case_name: &str,
    ) -> Result<Vec<EvaluationRecord>, StoreError> {
        self.store.get_evaluations(case_name).await
    }
}
