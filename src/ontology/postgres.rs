//! Ontology codes read from Postgres

use async_trait::async_trait;
use sqlx::PgPool;

use super::{OntologyRepository, OntologySnapshot};
use crate::store::StoreError;

pub struct PgOntologyRepository {
    pool: PgPool,
}

impl PgOntologyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn codes(&self, table: &str) -> Result<Vec<String>, StoreError> {
        // table names come from the fixed list in load_snapshot
        let query = format!("SELECT code FROM {} ORDER BY code", table);
        Ok(sqlx::query_scalar::<_, String>(&query).fetch_all(&self.pool).await?)
    }
}

#[async_trait]
impl OntologyRepository for PgOntologyRepository {
    async fn load_snapshot(&self) -> Result<OntologySnapshot, StoreError> {
        let attributes = self.codes("kyc_attributes").await?;
        let documents = self.codes("kyc_documents").await?;
        let regulations = self.codes("kyc_regulations").await?;

        let snapshot = OntologySnapshot::new(attributes, documents, regulations);
        tracing::info!(
            attributes = snapshot.attribute_count(),
            documents = snapshot.document_count(),
            regulations = snapshot.regulation_count(),
            "loaded ontology snapshot"
        );
        Ok(snapshot)
    }
}
