//! Postgres-backed store
//!
//! Write path for a new version:
//! 1. BEGIN
//! 2. `pg_advisory_xact_lock(hashtext(case_name))` serializes writers per case
//! 3. `COALESCE(MAX(version), 0) + 1`, INSERT, COMMIT
//!
//! The `UNIQUE (case_name, version)` constraint catches any writer that
//! bypasses the lock; a unique violation is retried with backoff.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use kyc_dsl_core::{ContentHash, EvaluationResult};

use super::{
    Amendment, AmendmentLog, CaseVersion, EvaluationRecord, LineageLog, StoreError, ValidationLog,
    ValidationRecord, ValidationStatus, ValidationSummary, VersionStore,
};
use crate::config::{DatabaseConfig, KycConfig};

const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS kyc_case_versions (
        id BIGSERIAL PRIMARY KEY,
        case_name TEXT NOT NULL,
        version INT NOT NULL,
        dsl_snapshot TEXT NOT NULL,
        hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE (case_name, version)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_kyc_case_versions_hash
        ON kyc_case_versions (case_name, hash)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS kyc_case_amendments (
        id BIGSERIAL PRIMARY KEY,
        case_name TEXT NOT NULL,
        step TEXT NOT NULL,
        change_type TEXT NOT NULL,
        diff TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS kyc_case_validations (
        id BIGSERIAL PRIMARY KEY,
        case_name TEXT NOT NULL,
        version INT,
        validation_status TEXT NOT NULL,
        error_message TEXT,
        total_checks INT NOT NULL,
        passed_checks INT NOT NULL,
        failed_checks INT NOT NULL,
        grammar_version TEXT NOT NULL,
        ontology_version TEXT NOT NULL,
        validator_actor TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS kyc_lineage_evaluations (
        id BIGSERIAL PRIMARY KEY,
        case_name TEXT NOT NULL,
        case_version INT NOT NULL,
        derived_code TEXT NOT NULL,
        value JSONB,
        value_type TEXT,
        success BOOLEAN NOT NULL,
        error TEXT,
        inputs JSONB NOT NULL,
        rule TEXT NOT NULL,
        evaluated_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

pub struct PgStore {
    pool: PgPool,
    max_retries: u32,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, max_retries: 3 }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        tracing::info!("Connecting to database: {}", config.masked_url());
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                tracing::warn!("Failed to connect to database: {}", e);
                StoreError::from(e)
            })?;
        Ok(Self::new(pool))
    }

    /// Connect with the pool settings and retry budget from `config`
    pub async fn from_config(config: &KycConfig) -> Result<Self, StoreError> {
        Ok(Self::connect(&config.database)
            .await?
            .with_max_retries(config.store_max_retries))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("kyc schema verified");
        Ok(())
    }

    /// One attempt at inserting the next version. With `based_on` set the
    /// insert only happens while that version is still the latest.
    async fn try_save(
        &self,
        case_name: &str,
        text: &str,
        based_on: Option<i32>,
    ) -> Result<CaseVersion, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(case_name)
            .execute(&mut *tx)
            .await?;

        let next: i32 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM kyc_case_versions WHERE case_name = $1",
        )
        .bind(case_name)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(base) = based_on {
            if next != base + 1 {
                // dropping the transaction rolls it back
                return Err(StoreError::Conflict {
                    case_name: case_name.to_string(),
                    version: base + 1,
                });
            }
        }

        let hash = ContentHash::of(text);
        let inserted = sqlx::query(
            r#"
            INSERT INTO kyc_case_versions (case_name, version, dsl_snapshot, hash)
            VALUES ($1, $2, $3, $4)
            RETURNING case_name, version, dsl_snapshot, hash, created_at
            "#,
        )
        .bind(case_name)
        .bind(next)
        .bind(text)
        .bind(hash.as_str())
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                return Err(StoreError::Conflict {
                    case_name: case_name.to_string(),
                    version: next,
                });
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        version_from_row(&row)
    }
}

fn version_from_row(row: &PgRow) -> Result<CaseVersion, StoreError> {
    let dsl_snapshot: String = row.try_get("dsl_snapshot")?;
    let stored: String = row.try_get("hash")?;
    let hash = ContentHash::from_hex(stored);
    if hash != ContentHash::of(&dsl_snapshot) {
        let case_name: String = row.try_get("case_name")?;
        return Err(StoreError::Corrupt(format!(
            "hash mismatch for case '{}' version {}",
            case_name,
            row.try_get::<i32, _>("version")?
        )));
    }
    Ok(CaseVersion {
        case_name: row.try_get("case_name")?,
        version: row.try_get("version")?,
        dsl_snapshot,
        hash,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl VersionStore for PgStore {
    async fn save_case_version(
        &self,
        case_name: &str,
        text: &str,
    ) -> Result<CaseVersion, StoreError> {
        let mut attempt = 0;
        loop {
            match self.try_save(case_name, text, None).await {
                Ok(row) => {
                    tracing::info!(
                        case = case_name,
                        version = row.version,
                        hash = %row.hash.short(),
                        "saved case version"
                    );
                    return Ok(row);
                }
                Err(StoreError::Conflict { version, .. }) if attempt + 1 < self.max_retries => {
                    tracing::warn!(
                        case = case_name,
                        version,
                        "Version save retry {} due to concurrent writer",
                        attempt + 1
                    );
                    tokio::time::sleep(Duration::from_millis(50 * (attempt + 1) as u64)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn save_version_after(
        &self,
        case_name: &str,
        based_on: i32,
        text: &str,
    ) -> Result<CaseVersion, StoreError> {
        let row = self.try_save(case_name, text, Some(based_on)).await?;
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
        let row = sqlx::query(
            r#"
            SELECT case_name, version, dsl_snapshot, hash, created_at
            FROM kyc_case_versions
            WHERE case_name = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(case_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn get_version(
        &self,
        case_name: &str,
        version: i32,
    ) -> Result<Option<CaseVersion>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT case_name, version, dsl_snapshot, hash, created_at
            FROM kyc_case_versions
            WHERE case_name = $1 AND version = $2
            "#,
        )
        .bind(case_name)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(version_from_row).transpose()
    }

    async fn list_versions(&self, case_name: &str) -> Result<Vec<CaseVersion>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT case_name, version, dsl_snapshot, hash, created_at
            FROM kyc_case_versions
            WHERE case_name = $1
            ORDER BY version ASC
            "#,
        )
        .bind(case_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(version_from_row).collect()
    }

    async fn find_version_by_hash(
        &self,
        case_name: &str,
        hash: &ContentHash,
    ) -> Result<Option<CaseVersion>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT case_name, version, dsl_snapshot, hash, created_at
            FROM kyc_case_versions
            WHERE case_name = $1 AND hash = $2
            ORDER BY version ASC
            LIMIT 1
            "#,
        )
        .bind(case_name)
        .bind(hash.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(version_from_row).transpose()
    }
}

fn amendment_from_row(row: &PgRow) -> Result<Amendment, StoreError> {
    Ok(Amendment {
        id: row.try_get("id")?,
        case_name: row.try_get("case_name")?,
        step: row.try_get("step")?,
        change_type: row.try_get("change_type")?,
        diff: row.try_get("diff")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AmendmentLog for PgStore {
    async fn insert_amendment(
        &self,
        case_name: &str,
        step: &str,
        change_type: &str,
        diff: &str,
    ) -> Result<Amendment, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO kyc_case_amendments (case_name, step, change_type, diff)
            VALUES ($1, $2, $3, $4)
            RETURNING id, case_name, step, change_type, diff, created_at
            "#,
        )
        .bind(case_name)
        .bind(step)
        .bind(change_type)
        .bind(diff)
        .fetch_one(&self.pool)
        .await?;
        amendment_from_row(&row)
    }

    async fn get_amendments(&self, case_name: &str) -> Result<Vec<Amendment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, case_name, step, change_type, diff, created_at
            FROM kyc_case_amendments
            WHERE case_name = $1
            ORDER BY id ASC
            "#,
        )
        .bind(case_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(amendment_from_row).collect()
    }
}

fn validation_from_row(row: &PgRow) -> Result<ValidationRecord, StoreError> {
    let status: String = row.try_get("validation_status")?;
    Ok(ValidationRecord {
        id: row.try_get("id")?,
        summary: ValidationSummary {
            case_name: row.try_get("case_name")?,
            version: row.try_get("version")?,
            status: status.parse::<ValidationStatus>()?,
            error_message: row.try_get("error_message")?,
            total_checks: row.try_get("total_checks")?,
            passed_checks: row.try_get("passed_checks")?,
            failed_checks: row.try_get("failed_checks")?,
            grammar_version: row.try_get("grammar_version")?,
            ontology_version: row.try_get("ontology_version")?,
            actor: row.try_get("validator_actor")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

const VALIDATION_COLUMNS: &str = "id, case_name, version, validation_status, error_message, \
     total_checks, passed_checks, failed_checks, grammar_version, ontology_version, \
     validator_actor, created_at";

#[async_trait]
impl ValidationLog for PgStore {
    async fn record_validation(
        &self,
        summary: &ValidationSummary,
    ) -> Result<ValidationRecord, StoreError> {
        let query = format!(
            r#"
            INSERT INTO kyc_case_validations
                (case_name, version, validation_status, error_message, total_checks, passed_checks,
                 failed_checks, grammar_version, ontology_version, validator_actor)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            VALIDATION_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(&summary.case_name)
            .bind(summary.version)
            .bind(summary.status.as_str())
            .bind(summary.error_message.as_deref())
            .bind(summary.total_checks)
            .bind(summary.passed_checks)
            .bind(summary.failed_checks)
            .bind(&summary.grammar_version)
            .bind(&summary.ontology_version)
            .bind(&summary.actor)
            .fetch_one(&self.pool)
            .await?;
        validation_from_row(&row)
    }

    async fn get_validations(&self, case_name: &str) -> Result<Vec<ValidationRecord>, StoreError> {
        let query = format!(
            "SELECT {} FROM kyc_case_validations WHERE case_name = $1 ORDER BY id ASC",
            VALIDATION_COLUMNS
        );
        let rows = sqlx::query(&query).bind(case_name).fetch_all(&self.pool).await?;
        rows.iter().map(validation_from_row).collect()
    }
}

#[async_trait]
impl LineageLog for PgStore {
    async fn record_evaluation(
        &self,
        case_name: &str,
        case_version: i32,
        result: &EvaluationResult,
    ) -> Result<(), StoreError> {
        let inputs = serde_json::to_value(&result.inputs)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO kyc_lineage_evaluations
                (case_name, case_version, derived_code, value, value_type,
                 success, error, inputs, rule, evaluated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(case_name)
        .bind(case_version)
        .bind(&result.derived_code)
        .bind(result.value.as_ref().map(|v| v.to_json()))
        .bind(result.value.as_ref().map(|v| v.kind()))
        .bind(result.success)
        .bind(result.error.as_deref())
        .bind(inputs)
        .bind(&result.rule)
        .bind(result.evaluated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_evaluations(&self, case_name: &str) -> Result<Vec<EvaluationRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT case_name, case_version, derived_code, value, success, error, inputs, rule,
                   evaluated_at
            FROM kyc_lineage_evaluations
            WHERE case_name = $1
            ORDER BY id ASC
            "#,
        )
        .bind(case_name)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<EvaluationRecord, StoreError> {
                let value: Option<serde_json::Value> = row.try_get("value")?;
                let inputs: serde_json::Value = row.try_get("inputs")?;
                let evaluated_at: DateTime<Utc> = row.try_get("evaluated_at")?;
                let result = EvaluationResult {
                    derived_code: row.try_get("derived_code")?,
                    value: value
                        .map(serde_json::from_value)
                        .transpose()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    success: row.try_get("success")?,
                    error: row.try_get("error")?,
                    inputs: serde_json::from_value(inputs)
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    rule: row.try_get("rule")?,
                    evaluated_at,
                };
                Ok(EvaluationRecord {
                    case_name: row.try_get("case_name")?,
                    case_version: row.try_get("case_version")?,
                    result,
                })
            })
            .collect()
    }
}
