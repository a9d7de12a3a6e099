//! Ontology repository
//!
//! The validator resolves codes synchronously, so the repository is read once
//! into an [`OntologySnapshot`] and the snapshot answers lookups.

#[cfg(feature = "database")]
mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;

use kyc_dsl_core::{ContentHash, OntologyResolver};

use crate::store::StoreError;

#[cfg(feature = "database")]
pub use postgres::PgOntologyRepository;

/// Preloaded attribute, document and regulation codes (case-insensitive)
#[derive(Debug, Clone, Default)]
pub struct OntologySnapshot {
    attributes: HashSet<String>,
    documents: HashSet<String>,
    regulations: HashSet<String>,
}

impl OntologySnapshot {
    pub fn new<A, D, R>(attributes: A, documents: D, regulations: R) -> Self
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
        R: IntoIterator,
        R::Item: AsRef<str>,
    {
        Self {
            attributes: normalize(attributes),
            documents: normalize(documents),
            regulations: normalize(regulations),
        }
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    pub fn regulation_count(&self) -> usize {
        self.regulations.len()
    }

    /// Fingerprint of the code sets; equal snapshots share a version
    pub fn version(&self) -> String {
        let mut text = String::new();
        for (kind, codes) in [
            ("attribute", &self.attributes),
            ("document", &self.documents),
            ("regulation", &self.regulations),
        ] {
            let mut sorted: Vec<&String> = codes.iter().collect();
            sorted.sort();
            for code in sorted {
                text.push_str(kind);
                text.push(':');
                text.push_str(code);
                text.push('\n');
            }
        }
        ContentHash::of(&text).short().to_string()
    }
}

fn normalize<I>(codes: I) -> HashSet<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    codes.into_iter().map(|c| c.as_ref().trim().to_uppercase()).collect()
}

impl OntologyResolver for OntologySnapshot {
    fn resolve_attribute(&self, code: &str) -> bool {
        self.attributes.contains(&code.trim().to_uppercase())
    }

    fn resolve_document(&self, code: &str) -> bool {
        self.documents.contains(&code.trim().to_uppercase())
    }

    fn resolve_regulation(&self, code: &str) -> bool {
        self.regulations.contains(&code.trim().to_uppercase())
    }
}

#[async_trait]
pub trait OntologyRepository: Send + Sync {
    async fn load_snapshot(&self) -> Result<OntologySnapshot, StoreError>;
}

/// Repository over fixed code lists
#[derive(Debug, Clone, Default)]
pub struct InMemoryOntology {
    snapshot: OntologySnapshot,
}

impl InMemoryOntology {
    pub fn new(snapshot: OntologySnapshot) -> Self {
        Self { snapshot }
    }

    /// The regulatory codes used by the bundled sample cases
    pub fn standard() -> Self {
        Self::new(OntologySnapshot::new(
            [
                "LEGAL_NAME",
                "REGISTERED_NAME",
                "REGISTERED_ADDRESS",
                "INCORPORATION_DATE",
                "TAX_RESIDENCY_COUNTRY",
                "UBO_NAME",
                "UBO_PERCENT",
                "PEP_STATUS",
                "SANCTIONS_STATUS",
                "HIGH_RISK_JURISDICTION_FLAG",
                "ENHANCED_DUE_DILIGENCE",
            ],
            [
                "CERT_INCORP",
                "ARTICLES_ASSOC",
                "W8BENE",
                "W9",
                "PASSPORT",
                "UBO_DECLARATION",
                "PROOF_OF_ADDRESS",
                "REGISTER_OF_MEMBERS",
            ],
            ["FATF", "AMLD5", "AMLD6", "FATCA", "CRS", "MLR2017"],
        ))
    }
}

#[async_trait]
impl OntologyRepository for InMemoryOntology {
    async fn load_snapshot(&self) -> Result<OntologySnapshot, StoreError> {
        Ok(self.snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_snapshot_is_case_insensitive() {
        let snapshot = InMemoryOntology::standard().load_snapshot().await.unwrap();
        assert!(snapshot.resolve_attribute("ubo_name"));
        assert!(snapshot.resolve_document(" Passport "));
        assert!(snapshot.resolve_regulation("amld5"));
        assert!(!snapshot.resolve_attribute("SHOE_SIZE"));
        assert!(!snapshot.resolve_regulation("GDPR"));
    }

    #[test]
    fn test_counts() {
        let snapshot = OntologySnapshot::new(["A", "a", "B"], Vec::<String>::new(), ["R"]);
        assert_eq!(snapshot.attribute_count(), 2);
        assert_eq!(snapshot.document_count(), 0);
        assert_eq!(snapshot.regulation_count(), 1);
    }

    #[test]
    fn test_version_tracks_codes() {
        let a = OntologySnapshot::new(["UBO_NAME", "LEGAL_NAME"], ["PASSPORT"], ["FATF"]);
        let same = OntologySnapshot::new(["legal_name", "ubo_name"], ["passport"], ["fatf"]);
        let more =
            OntologySnapshot::new(["UBO_NAME", "LEGAL_NAME"], ["PASSPORT", "W8BENE"], ["FATF"]);
        assert_eq!(a.version(), same.version());
        assert_ne!(a.version(), more.version());
        assert_eq!(a.version().len(), 12);
    }
}
