//! In-memory store
//!
//! Backs tests and database-free runs. One async mutex guards all state, so
//! version allocation and insertion are a single critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use kyc_dsl_core::{ContentHash, EvaluationResult};

use super::{
    Amendment, AmendmentLog, CaseVersion, EvaluationRecord, LineageLog, StoreError, ValidationLog,
    ValidationRecord, ValidationSummary, VersionStore,
};

#[derive(Default)]
struct State {
    versions: HashMap<String, Vec<CaseVersion>>,
    amendments: Vec<Amendment>,
    validations: Vec<ValidationRecord>,
    evaluations: Vec<EvaluationRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_version(versions: &mut Vec<CaseVersion>, case_name: &str, text: &str) -> CaseVersion {
    let row = CaseVersion {
        case_name: case_name.to_string(),
        version: versions.last().map_or(1, |v| v.version + 1),
        dsl_snapshot: text.to_string(),
        hash: ContentHash::of(text),
        created_at: Utc::now(),
    };
    versions.push(row.clone());
    row
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn save_case_version(
        &self,
        case_name: &str,
        text: &str,
    ) -> Result<CaseVersion, StoreError> {
        let mut state = self.state.lock().await;
        let versions = state.versions.entry(case_name.to_string()).or_default();
        let row = push_version(versions, case_name, text);
        tracing::info!(
            case = case_name,
            version = row.version,
            hash = %row.hash.short(),
            "saved case version"
        );
        Ok(row)
    }

    async fn save_version_after(
        &self,
        case_name: &str,
        based_on: i32,
        text: &str,
    ) -> Result<CaseVersion, StoreError> {
        let mut state = self.state.lock().await;
        let versions = state.versions.entry(case_name.to_string()).or_default();
        let latest = versions.last().map_or(0, |v| v.version);
        if latest != based_on {
            return Err(StoreError::Conflict {
                case_name: case_name.to_string(),
                version: based_on + 1,
            });
        }
        let row = push_version(versions, case_name, text);
        tracing::info!(
            case = case_name,
            based_on,
            version = row.version,
            hash = %row.hash.short(),
            "saved case version"
        );
        Ok(row)
    }

    async fn get_latest_version(&self, case_name: &str) -> Result<Option<CaseVersion>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.versions.get(case_name).and_then(|v| v.last()).cloned())
    }

    async fn get_version(
        &self,
        case_name: &str,
        version: i32,
    ) -> Result<Option<CaseVersion>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .versions
            .get(case_name)
            .and_then(|v| v.iter().find(|row| row.version == version))
            .cloned())
    }

    async fn list_versions(&self, case_name: &str) -> Result<Vec<CaseVersion>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.versions.get(case_name).cloned().unwrap_or_default())
    }

    async fn find_version_by_hash(
        &self,
        case_name: &str,
        hash: &ContentHash,
    ) -> Result<Option<CaseVersion>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .versions
            .get(case_name)
            .and_then(|v| v.iter().find(|row| &row.hash == hash))
            .cloned())
    }
}

#[async_trait]
impl AmendmentLog for MemoryStore {
    async fn insert_amendment(
        &self,
        case_name: &str,
        step: &str,
        change_type: &str,
        diff: &str,
    ) -> Result<Amendment, StoreError> {
        let mut state = self.state.lock().await;
        let row = Amendment {
            id: state.amendments.len() as i64 + 1,
            case_name: case_name.to_string(),
            step: step.to_string(),
            change_type: change_type.to_string(),
            diff: diff.to_string(),
            created_at: Utc::now(),
        };
        state.amendments.push(row.clone());
        Ok(row)
    }

    async fn get_amendments(&self, case_name: &str) -> Result<Vec<Amendment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .amendments
            .iter()
            .filter(|a| a.case_name == case_name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ValidationLog for MemoryStore {
    async fn record_validation(
        &self,
        summary: &ValidationSummary,
    ) -> Result<ValidationRecord, StoreError> {
        let mut state = self.state.lock().await;
        let row = ValidationRecord {
            id: state.validations.len() as i64 + 1,
            summary: summary.clone(),
            created_at: Utc::now(),
        };
        state.validations.push(row.clone());
        Ok(row)
    }

    async fn get_validations(&self, case_name: &str) -> Result<Vec<ValidationRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .validations
            .iter()
            .filter(|v| v.summary.case_name == case_name)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LineageLog for MemoryStore {
    async fn record_evaluation(
        &self,
        case_name: &str,
        case_version: i32,
        result: &EvaluationResult,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.evaluations.push(EvaluationRecord {
            case_name: case_name.to_string(),
            case_version,
            result: result.clone(),
        });
        Ok(())
    }

    async fn get_evaluations(&self, case_name: &str) -> Result<Vec<EvaluationRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .evaluations
            .iter()
            .filter(|e| e.case_name == case_name)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ValidationStatus;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_versions_start_at_one() {
        let store = MemoryStore::new();
        let v1 = store.save_case_version("ACME", "(kyc-case ACME)\n").await.unwrap();
        let v2 = store.save_case_version("ACME", "(kyc-case ACME\n  (policy P))\n").await.unwrap();
        let other = store.save_case_version("OTHER", "(kyc-case OTHER)\n").await.unwrap();

        assert_eq!((v1.version, v2.version, other.version), (1, 2, 1));
        assert_eq!(store.get_latest_dsl("ACME").await.unwrap(), "(kyc-case ACME\n  (policy P))\n");
        assert_eq!(store.get_version("ACME", 1).await.unwrap(), Some(v1.clone()));
        assert_eq!(store.list_versions("ACME").await.unwrap(), vec![v1, v2]);
    }

    #[tokio::test]
    async fn test_save_after_stale_version_conflicts() {
        let store = MemoryStore::new();
        store.save_case_version("ACME", "(kyc-case ACME)\n").await.unwrap();
        let v2 = store
            .save_version_after("ACME", 1, "(kyc-case ACME\n  (policy A))\n")
            .await
            .unwrap();
        assert_eq!(v2.version, 2);

        let err = store
            .save_version_after("ACME", 1, "(kyc-case ACME\n  (policy B))\n")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { version: 2, .. }));
        assert_eq!(store.list_versions("ACME").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_latest_dsl_not_found() {
        let store = MemoryStore::new();
        let err = store.get_latest_dsl("MISSING").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref name) if name == "MISSING"));
    }

    #[tokio::test]
    async fn test_identical_text_identical_hash() {
        let store = MemoryStore::new();
        let a = store.save_case_version("ACME", "(kyc-case ACME)\n").await.unwrap();
        let b = store.save_case_version("ACME", "(kyc-case ACME)\n").await.unwrap();
        assert_eq!(a.hash, b.hash);
        let found = store.find_version_by_hash("ACME", &a.hash).await.unwrap().unwrap();
        assert_eq!(found.version, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_are_gapless() {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .save_case_version("RACE", &format!("(kyc-case RACE (policy P{}))\n", i))
                        .await
                        .unwrap()
                        .version
                })
            })
            .collect();

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=32).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn test_validations_filtered_by_case() {
        let store = MemoryStore::new();
        let summary = |case_name: &str, status| ValidationSummary {
            case_name: case_name.to_string(),
            version: None,
            status,
            error_message: None,
            total_checks: 4,
            passed_checks: 4,
            failed_checks: 0,
            grammar_version: "1.0".into(),
            ontology_version: "test".into(),
            actor: "tester".into(),
        };
        store.record_validation(&summary("A", ValidationStatus::Passed)).await.unwrap();
        store.record_validation(&summary("B", ValidationStatus::Failed)).await.unwrap();
        let second = store
            .record_validation(&summary("A", ValidationStatus::Failed))
            .await
            .unwrap();

        let rows = store.get_validations("A").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].summary.status, ValidationStatus::Passed);
        assert_eq!(rows[1], second);
    }

    #[tokio::test]
    async fn test_amendments_filtered_by_case() {
        let store = MemoryStore::new();
        store.insert_amendment("A", "approve", "token-update:approved", "+x").await.unwrap();
        store.insert_amendment("B", "review", "token-update:review", "+y").await.unwrap();
        let rows = store.get_amendments("A").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].change_type, "token-update:approved");
    }
}
