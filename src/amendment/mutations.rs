//! Built-in local mutations, one per catalogue step
//!
//! Every mutation is idempotent: applying a step twice leaves the case as
//! applying it once.

use std::sync::Arc;

use kyc_dsl_core::{
    AttributeSource, AttributeSources, Case, CaseFunction, DocumentRef, DocumentRequirement,
    SourceTier, TokenState,
};

use super::MutationFn;

const DISCOVERED_POLICIES: &[&str] = &["KYCPOL-UK-2025", "AMLPOL-EU-2024"];

const SOLICITED_OBLIGATIONS: &[&str] = &["OBL-W8BENE", "OBL-UBO-DECLARATION"];

const EU_JURISDICTION: &str = "EU";

/// AMLD5 documents required in the EU
const EU_DOCUMENTS: &[(&str, &str)] = &[
    ("CERT_INCORP", "Certificate of Incorporation"),
    ("ARTICLES_ASSOC", "Articles of Association"),
    ("UBO_DECLARATION", "Ultimate Beneficial Owner Declaration"),
    ("PROOF_OF_ADDRESS", "Proof of Registered Address"),
];

/// Attribute -> (primary, secondary) document sources
const DICTIONARY_SOURCES: &[(&str, &str, &str)] = &[
    ("UBO_NAME", "UBO_DECLARATION", "REGISTER_OF_MEMBERS"),
    ("REGISTERED_NAME", "CERT_INCORP", "ARTICLES_ASSOC"),
    ("TAX_RESIDENCY_COUNTRY", "W8BENE", "PROOF_OF_ADDRESS"),
];

/// Built-in mutation for a catalogue step
pub fn builtin(step: &str) -> Option<MutationFn> {
    let mutation: MutationFn = match step.trim().to_ascii_lowercase().as_str() {
        "policy-discovery" => Arc::new(policy_discovery),
        "document-solicitation" => Arc::new(document_solicitation),
        "document-discovery" => Arc::new(document_discovery),
        "ownership-discovery" => Arc::new(ownership_discovery),
        "risk-assessment" => Arc::new(|case: &mut Case| {
            case.add_function(CaseFunction::AssessRisk);
            Ok(())
        }),
        "regulator-notification" => Arc::new(|case: &mut Case| {
            case.add_function(CaseFunction::RegulatorNotify);
            Ok(())
        }),
        "approve" => Arc::new(|case: &mut Case| set_token(case, TokenState::Approved)),
        "decline" => Arc::new(|case: &mut Case| set_token(case, TokenState::Declined)),
        "review" => Arc::new(|case: &mut Case| set_token(case, TokenState::Review)),
        _ => return None,
    };
    Some(mutation)
}

fn policy_discovery(case: &mut Case) -> Result<(), String> {
    case.add_function(CaseFunction::DiscoverPolicies);
    for policy in DISCOVERED_POLICIES {
        case.add_policy(policy);
    }
    Ok(())
}

fn document_solicitation(case: &mut Case) -> Result<(), String> {
    case.add_function(CaseFunction::SolicitDocuments);
    for obligation in SOLICITED_OBLIGATIONS {
        case.add_obligation(obligation);
    }
    Ok(())
}

fn document_discovery(case: &mut Case) -> Result<(), String> {
    case.add_function(CaseFunction::ExtractData);

    let index = match case
        .document_requirements
        .iter()
        .position(|r| r.jurisdiction == EU_JURISDICTION)
    {
        Some(i) => i,
        None => {
            case.document_requirements.push(DocumentRequirement {
                jurisdiction: EU_JURISDICTION.to_string(),
                documents: Vec::new(),
            });
            case.document_requirements.len() - 1
        }
    };
    let requirement = &mut case.document_requirements[index];
    for (code, name) in EU_DOCUMENTS {
        if !requirement.documents.iter().any(|d| d.code == *code) {
            requirement.documents.push(DocumentRef::new(*code, Some(*name)));
        }
    }

    for (attribute, primary, secondary) in DICTIONARY_SOURCES {
        if case.data_dictionary.iter().any(|e| e.attribute == *attribute) {
            continue;
        }
        case.data_dictionary.push(AttributeSources {
            attribute: attribute.to_string(),
            sources: vec![
                AttributeSource {
                    tier: SourceTier::Primary,
                    document: primary.to_string(),
                },
                AttributeSource {
                    tier: SourceTier::Secondary,
                    document: secondary.to_string(),
                },
            ],
        });
    }
    Ok(())
}

fn ownership_discovery(case: &mut Case) -> Result<(), String> {
    if case.ownership.is_none() {
        return Err("case has no ownership-structure to build a tree from".to_string());
    }
    case.add_function(CaseFunction::BuildOwnershipTree);
    case.add_function(CaseFunction::VerifyOwnership);
    Ok(())
}

fn set_token(case: &mut Case, state: TokenState) -> Result<(), String> {
    case.set_token(state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amendment::steps::catalogue;
    use pretty_assertions::assert_eq;

    fn apply(step: &str, case: &mut Case) -> Result<(), String> {
        let mutation = builtin(step).ok_or_else(|| format!("no builtin for {}", step))?;
        mutation(case)
    }

    #[test]
    fn test_every_catalogue_step_has_builtin() {
        for step in catalogue() {
            assert!(builtin(step.name).is_some(), "{}", step.name);
        }
        assert!(builtin("unknown-step").is_none());
    }

    #[test]
    fn test_policy_discovery_is_idempotent() {
        let mut case = Case::new("ACME");
        apply("policy-discovery", &mut case).unwrap();
        apply("policy-discovery", &mut case).unwrap();
        assert_eq!(case.functions, vec!["DISCOVER-POLICIES"]);
        assert_eq!(case.policies, vec!["KYCPOL-UK-2025", "AMLPOL-EU-2024"]);
    }

    #[test]
    fn test_document_discovery_merges_eu_requirement() {
        let mut case = Case::new("ACME");
        case.document_requirements.push(DocumentRequirement {
            jurisdiction: "EU".into(),
            documents: vec![DocumentRef::new("CERT_INCORP", None)],
        });
        apply("document-discovery", &mut case).unwrap();
        apply("document-discovery", &mut case).unwrap();

        assert_eq!(case.document_requirements.len(), 1);
        let codes: Vec<_> = case.document_requirements[0]
            .documents
            .iter()
            .map(|d| d.code.as_str())
            .collect();
        assert_eq!(
            codes,
            vec!["CERT_INCORP", "ARTICLES_ASSOC", "UBO_DECLARATION", "PROOF_OF_ADDRESS"]
        );
        assert_eq!(case.data_dictionary.len(), 3);
        assert_eq!(case.data_dictionary[0].sources[0].tier, SourceTier::Primary);
    }

    #[test]
    fn test_ownership_discovery_requires_structure() {
        let mut case = Case::new("ACME");
        assert!(apply("ownership-discovery", &mut case).is_err());
        assert!(case.functions.is_empty());
    }

    #[test]
    fn test_token_steps() {
        let mut case = Case::new("ACME");
        apply("review", &mut case).unwrap();
        assert_eq!(case.token_state(), Some(TokenState::Review));
        apply("decline", &mut case).unwrap();
        assert_eq!(case.token.as_deref(), Some("declined"));
    }
}
