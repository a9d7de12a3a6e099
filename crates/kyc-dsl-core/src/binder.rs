//! Binder: AST to typed `Case`
//!
//! Binding is lenient about clause contents: an entry that does not have the
//! expected shape is skipped here and reported by the grammar phase of the
//! validator, which sees the same AST. Only the case name, a usable
//! nature-purpose entry (when the clause is present) and a derived attribute's
//! code and rule are required. Unknown clause keys become warnings.

use std::collections::BTreeMap;

use crate::ast::AstNode;
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::error::BindError;
use crate::model::*;

pub const CASE_HEAD: &str = "kyc-case";

/// Top-level clause keys the binder understands
pub const KNOWN_CLAUSES: &[&str] = &[
    "nature-purpose",
    "client-business-unit",
    "policy",
    "obligation",
    "function",
    "ownership-structure",
    "data-dictionary",
    "document-requirements",
    "derived-attributes",
    "kyc-token",
];

/// A bound case plus the non-fatal warnings collected on the way
#[derive(Clone, Debug, PartialEq)]
pub struct BoundCase {
    pub case: Case,
    pub warnings: Vec<Diagnostic>,
    pub sources: SourceIndex,
}

/// Where each bound entry came from in the AST
///
/// Malformed entries are skipped during binding, so the n-th bound policy is
/// not always the n-th `(policy ...)` clause. Diagnostics use this to point at
/// the clause that produced a value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceIndex {
    paths: BTreeMap<&'static str, Vec<String>>,
}

impl SourceIndex {
    fn record(&mut self, key: &'static str, path: String) {
        self.paths.entry(key).or_default().push(path);
    }

    /// Path of the `entry`-th bound value under `key`
    pub fn path(&self, key: &str, entry: usize) -> String {
        self.paths
            .get(key)
            .and_then(|paths| paths.get(entry))
            .cloned()
            .unwrap_or_else(|| clause_path(CASE_HEAD, key, entry))
    }

    /// Path of the clause a single-valued field was last bound from
    pub fn last_path(&self, key: &str) -> String {
        self.paths
            .get(key)
            .and_then(|paths| paths.last())
            .cloned()
            .unwrap_or_else(|| clause_path(CASE_HEAD, key, 0))
    }
}

/// Path of the `index`-th clause named `head` under `parent`
pub fn clause_path(parent: &str, head: &str, index: usize) -> String {
    format!("{}/{}[{}]", parent, head, index)
}

/// Parse a percentage atom, accepting a trailing `%`
pub fn parse_percent(text: &str) -> Option<f64> {
    let trimmed = text.trim().trim_end_matches('%');
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Bind one top-level form into a `Case`
pub fn bind(node: &AstNode) -> Result<BoundCase, BindError> {
    if node.head() != Some(CASE_HEAD) {
        return Err(BindError::NotACase {
            path: "<root>".to_string(),
            found: summarize(node),
        });
    }

    let name = node
        .args()
        .first()
        .and_then(AstNode::as_atom)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| BindError::MissingKey {
            key: "name".to_string(),
            path: CASE_HEAD.to_string(),
        })?;

    let mut case = Case::new(name);
    let mut warnings = Vec::new();
    let mut sources = SourceIndex::default();
    let mut seen: Vec<(String, usize)> = Vec::new();

    for clause in &node.args()[1..] {
        let Some(head) = clause.head() else {
            warnings.push(
                Diagnostic::warning(
                    DiagnosticCode::UnknownClause,
                    format!("unrecognized clause {} ignored", summarize(clause)),
                )
                .at(CASE_HEAD),
            );
            continue;
        };
        let index = occurrence(&mut seen, head);
        let path = clause_path(CASE_HEAD, head, index);

        match head {
            "nature-purpose" => case.nature_purpose = Some(bind_nature_purpose(clause, &path)?),
            "client-business-unit" => {
                if let Some(cbu) = first_atom(clause) {
                    case.client_business_unit = Some(cbu.to_string());
                }
            }
            "policy" | "obligation" | "function" => {
                let Some(value) = first_atom(clause) else {
                    continue;
                };
                let (key, list) = match head {
                    "policy" => ("policy", &mut case.policies),
                    "obligation" => ("obligation", &mut case.obligations),
                    _ => ("function", &mut case.functions),
                };
                list.push(value.to_string());
                sources.record(key, path);
            }
            "ownership-structure" => {
                case.ownership = Some(bind_ownership(clause));
                sources.record("ownership-structure", path);
            }
            "data-dictionary" => {
                for (entry_path, attribute) in bind_data_dictionary(clause, &path) {
                    case.data_dictionary.push(attribute);
                    sources.record("data-dictionary/attribute", entry_path);
                }
            }
            "document-requirements" => {
                case.document_requirements.push(bind_document_requirement(clause));
                sources.record("document-requirements", path);
            }
            "derived-attributes" => {
                for (entry_path, def) in bind_derived_attributes(clause, &path)? {
                    case.derived_attributes.push(def);
                    sources.record("derived-attributes/attribute", entry_path);
                }
            }
            "kyc-token" => {
                if let Some(token) = first_atom(clause) {
                    case.token = Some(token.to_string());
                    sources.record("kyc-token", path);
                }
            }
            other => warnings.push(
                Diagnostic::warning(
                    DiagnosticCode::UnknownClause,
                    format!("unrecognized clause '{}' ignored", other),
                )
                .at(path),
            ),
        }
    }

    tracing::debug!(case = %case.name, warnings = warnings.len(), "bound case");
    Ok(BoundCase {
        case,
        warnings,
        sources,
    })
}

/// Bind every top-level form, failing on the first bind error
pub fn bind_all(nodes: &[AstNode]) -> Result<Vec<BoundCase>, BindError> {
    nodes.iter().map(bind).collect()
}

// =============================================================================
// Clause binders
// =============================================================================

fn bind_nature_purpose(clause: &AstNode, path: &str) -> Result<NaturePurpose, BindError> {
    let np = NaturePurpose {
        nature: clause.clauses("nature").find_map(first_atom).map(str::to_string),
        purpose: clause.clauses("purpose").find_map(first_atom).map(str::to_string),
    };
    if np.nature.is_none() && np.purpose.is_none() {
        return Err(BindError::MissingKey {
            key: "nature".to_string(),
            path: path.to_string(),
        });
    }
    Ok(np)
}

fn bind_ownership(clause: &AstNode) -> OwnershipStructure {
    let mut structure = OwnershipStructure::default();

    for entry in clause.args() {
        let args = entry.args();
        match entry.head() {
            Some("entity") => {
                if let Some(entity) = first_atom(entry) {
                    structure.entity = Some(entity.to_string());
                }
            }
            Some(kind @ ("owner" | "beneficial-owner")) => {
                let stake = match args {
                    [name, percent] => name
                        .as_atom()
                        .zip(percent.as_atom().and_then(parse_percent))
                        .map(|(n, p)| OwnershipStake::new(n, p)),
                    _ => None,
                };
                if let Some(stake) = stake {
                    if kind == "owner" {
                        structure.owners.push(stake);
                    } else {
                        structure.beneficial_owners.push(stake);
                    }
                }
            }
            Some("controller") => {
                if let [name, role] = args {
                    if let (Some(n), Some(r)) = (name.as_atom(), role.as_atom()) {
                        structure.controllers.push(Controller::new(n, r));
                    }
                }
            }
            _ => {}
        }
    }

    structure
}

fn bind_data_dictionary(clause: &AstNode, path: &str) -> Vec<(String, AttributeSources)> {
    clause
        .args()
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.head() == Some("attribute"))
        .filter_map(|(i, attr)| {
            let code = first_atom(attr)?;
            let sources = attr
                .args()
                .iter()
                .filter_map(|src| {
                    let tier = SourceTier::from_keyword(src.head()?)?;
                    let document = source_document(src)?;
                    Some(AttributeSource {
                        tier,
                        document: document.to_string(),
                    })
                })
                .collect();
            let entry = AttributeSources {
                attribute: code.to_string(),
                sources,
            };
            Some((format!("{}/attribute[{}]", path, i), entry))
        })
        .collect()
}

/// `(primary-source (document D))`, or the shorthand `(tertiary-source "D")`
fn source_document(src: &AstNode) -> Option<&str> {
    match src.args() {
        [AstNode::Atom(doc)] => Some(doc.as_str()),
        [doc @ AstNode::List(_)] if doc.head() == Some("document") => first_atom(doc),
        _ => None,
    }
}

fn bind_document_requirement(clause: &AstNode) -> DocumentRequirement {
    let jurisdiction = clause
        .clauses("jurisdiction")
        .find_map(first_atom)
        .unwrap_or_default()
        .to_string();

    let documents = clause
        .clauses("required")
        .flat_map(|req| req.clauses("document"))
        .filter_map(|doc| {
            let code = first_atom(doc)?;
            let name = doc.args().get(1).and_then(AstNode::as_atom);
            Some(DocumentRef::new(code, name))
        })
        .collect();

    DocumentRequirement {
        jurisdiction,
        documents,
    }
}

fn bind_derived_attributes(
    clause: &AstNode,
    path: &str,
) -> Result<Vec<(String, DerivedAttributeDefinition)>, BindError> {
    let mut defs = Vec::new();

    for (i, attr) in clause.clauses("attribute").enumerate() {
        let attr_path = clause_path(path, "attribute", i);
        let code = first_atom(attr).ok_or_else(|| BindError::Malformed {
            path: attr_path.clone(),
            message: "derived attribute has no code".to_string(),
        })?;
        let rule = attr
            .clauses("rule")
            .find_map(first_atom)
            .ok_or_else(|| BindError::MissingKey {
                key: "rule".to_string(),
                path: attr_path.clone(),
            })?;

        // (sources A B) or (sources (A B))
        let sources = attr
            .clauses("sources")
            .flat_map(|s| s.args())
            .flat_map(|n| match n {
                AstNode::Atom(a) => vec![a.clone()],
                AstNode::List(items) => items
                    .iter()
                    .filter_map(AstNode::as_atom)
                    .map(str::to_string)
                    .collect(),
            })
            .collect();

        let def = DerivedAttributeDefinition {
            derived_code: code.to_string(),
            sources,
            rule: rule.to_string(),
            jurisdiction: attr.clauses("jurisdiction").find_map(first_atom).map(str::to_string),
            regulation: attr.clauses("regulation").find_map(first_atom).map(str::to_string),
        };
        defs.push((attr_path, def));
    }

    Ok(defs)
}

// =============================================================================
// Helpers
// =============================================================================

fn first_atom(node: &AstNode) -> Option<&str> {
    node.args().first().and_then(AstNode::as_atom)
}

fn occurrence(seen: &mut Vec<(String, usize)>, head: &str) -> usize {
    match seen.iter_mut().find(|(h, _)| h == head) {
        Some((_, count)) => {
            *count += 1;
            *count - 1
        }
        None => {
            seen.push((head.to_string(), 1));
            0
        }
    }
}

fn summarize(node: &AstNode) -> String {
    let text = node.to_dsl_string();
    if text.chars().count() > 40 {
        let cut: String = text.chars().take(40).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn bind_one(source: &str) -> Result<BoundCase, BindError> {
        let forms = parse_source(source).unwrap();
        bind(&forms[0])
    }

    #[test]
    fn test_bind_basic_case() {
        let bound = bind_one(
            r#"
(kyc-case BIND-TEST
  (nature-purpose
    (nature "Binding test nature")
    (purpose "Binding test purpose"))
  (client-business-unit BIND-CBU)
  (function DISCOVER-POLICIES)
  (policy POL-001)
  (obligation OBL-001)
  (kyc-token "pending"))
"#,
        )
        .unwrap();

        let case = bound.case;
        assert_eq!(case.name, "BIND-TEST");
        assert_eq!(
            case.nature_purpose,
            Some(NaturePurpose {
                nature: Some("Binding test nature".into()),
                purpose: Some("Binding test purpose".into()),
            })
        );
        assert_eq!(case.client_business_unit.as_deref(), Some("BIND-CBU"));
        assert_eq!(case.functions, vec!["DISCOVER-POLICIES"]);
        assert_eq!(case.policies, vec!["POL-001"]);
        assert_eq!(case.obligations, vec!["OBL-001"]);
        assert_eq!(case.token.as_deref(), Some("pending"));
        assert!(bound.warnings.is_empty());
    }

    #[test]
    fn test_absent_clauses_bind_empty() {
        let case = bind_one("(kyc-case MINIMAL)").unwrap().case;
        assert!(case.policies.is_empty());
        assert!(case.data_dictionary.is_empty());
        assert!(case.document_requirements.is_empty());
        assert!(case.ownership.is_none());
        assert!(case.token.is_none());
    }

    #[test]
    fn test_bind_ownership_structure() {
        let case = bind_one(
            r#"(kyc-case X (ownership-structure
                 (entity "Acme Holdings")
                 (owner A 60%)
                 (owner B 40)
                 (beneficial-owner C 0)
                 (controller J "Director")))"#,
        )
        .unwrap()
        .case;

        let ownership = case.ownership.unwrap();
        assert_eq!(ownership.entity.as_deref(), Some("Acme Holdings"));
        assert_eq!(
            ownership.owners,
            vec![OwnershipStake::new("A", 60.0), OwnershipStake::new("B", 40.0)]
        );
        assert_eq!(ownership.beneficial_owners.len(), 1);
        assert_eq!(ownership.controllers, vec![Controller::new("J", "Director")]);
    }

    #[test]
    fn test_malformed_owner_skipped() {
        let case = bind_one("(kyc-case X (ownership-structure (owner A) (owner B lots)))")
            .unwrap()
            .case;
        assert!(case.ownership.unwrap().owners.is_empty());
    }

    #[test]
    fn test_bind_data_dictionary() {
        let case = bind_one(
            r#"(kyc-case X (data-dictionary
                 (attribute LEGAL_NAME
                   (primary-source (document CERT_INCORP))
                   (secondary-source (document W8BENE))
                   (tertiary-source "Public registry"))))"#,
        )
        .unwrap()
        .case;

        assert_eq!(
            case.data_dictionary,
            vec![AttributeSources {
                attribute: "LEGAL_NAME".into(),
                sources: vec![
                    AttributeSource {
                        tier: SourceTier::Primary,
                        document: "CERT_INCORP".into()
                    },
                    AttributeSource {
                        tier: SourceTier::Secondary,
                        document: "W8BENE".into()
                    },
                    AttributeSource {
                        tier: SourceTier::Tertiary,
                        document: "Public registry".into()
                    },
                ],
            }]
        );
    }

    #[test]
    fn test_bind_document_requirements() {
        let case = bind_one(
            r#"(kyc-case X
                 (document-requirements (jurisdiction EU)
                   (required (document PASSPORT "Passport") (document UTILITY_BILL)))
                 (document-requirements (jurisdiction US)
                   (required (document W9 "Form W-9"))))"#,
        )
        .unwrap()
        .case;

        assert_eq!(case.document_requirements.len(), 2);
        assert_eq!(case.document_requirements[0].jurisdiction, "EU");
        assert_eq!(
            case.document_requirements[0].documents,
            vec![
                DocumentRef::new("PASSPORT", Some("Passport")),
                DocumentRef::new("UTILITY_BILL", None)
            ]
        );
    }

    #[test]
    fn test_bind_derived_attributes() {
        let case = bind_one(
            r#"(kyc-case X (derived-attributes
                 (attribute HIGH_RISK_JURISDICTION_FLAG
                   (sources (TAX_RESIDENCY_COUNTRY))
                   (rule "TAX_RESIDENCY_COUNTRY in [\"IR\",\"KP\"]")
                   (jurisdiction GLOBAL)
                   (regulation FATF))))"#,
        )
        .unwrap()
        .case;

        assert_eq!(
            case.derived_attributes,
            vec![DerivedAttributeDefinition::new(
                "HIGH_RISK_JURISDICTION_FLAG",
                r#"TAX_RESIDENCY_COUNTRY in ["IR","KP"]"#
            )
            .with_sources(&["TAX_RESIDENCY_COUNTRY"])
            .with_regulation("GLOBAL", "FATF")]
        );
    }

    #[test]
    fn test_derived_attribute_requires_rule() {
        let err =
            bind_one("(kyc-case X (derived-attributes (attribute FLAG (sources A))))").unwrap_err();
        assert_eq!(
            err,
            BindError::MissingKey {
                key: "rule".into(),
                path: "kyc-case/derived-attributes[0]/attribute[0]".into(),
            }
        );
    }

    #[test]
    fn test_derived_attribute_without_code_is_malformed() {
        let err = bind_one(r#"(kyc-case X (derived-attributes (attribute (rule "1 > 0"))))"#)
            .unwrap_err();
        let expected = "kyc-case/derived-attributes[0]/attribute[0]";
        assert!(matches!(err, BindError::Malformed { ref path, .. } if path == expected));
    }

    #[test]
    fn test_source_paths_skip_malformed_entries() {
        let bound = bind_one(
            r#"(kyc-case X
                 (function)
                 (function ASSESS-RISK)
                 (ownership-structure (owner A 100))
                 (ownership-structure (owner B 100) (controller J "Director"))
                 (data-dictionary
                   (attribute)
                   (attribute UBO_NAME (primary-source (document PASSPORT)))))"#,
        )
        .unwrap();

        assert_eq!(bound.case.functions, vec!["ASSESS-RISK"]);
        assert_eq!(bound.sources.path("function", 0), "kyc-case/function[1]");
        assert_eq!(
            bound.sources.last_path("ownership-structure"),
            "kyc-case/ownership-structure[1]"
        );
        assert_eq!(
            bound.sources.path("data-dictionary/attribute", 0),
            "kyc-case/data-dictionary[0]/attribute[1]"
        );
        // unrecorded entries fall back to their bound position
        assert_eq!(bound.sources.path("policy", 3), "kyc-case/policy[3]");
    }

    #[test]
    fn test_unknown_clause_is_warning() {
        let bound = bind_one("(kyc-case X (risk-rating HIGH) (policy P))").unwrap();
        assert_eq!(bound.case.policies, vec!["P"]);
        assert_eq!(bound.warnings.len(), 1);
        assert_eq!(bound.warnings[0].code, DiagnosticCode::UnknownClause);
        assert_eq!(bound.warnings[0].path, "kyc-case/risk-rating[0]");
    }

    #[test]
    fn test_missing_name() {
        let err = bind_one("(kyc-case (policy P))").unwrap_err();
        assert_eq!(
            err,
            BindError::MissingKey {
                key: "name".into(),
                path: "kyc-case".into()
            }
        );
    }

    #[test]
    fn test_empty_nature_purpose_is_bind_error() {
        let err = bind_one("(kyc-case X (nature-purpose))").unwrap_err();
        assert!(matches!(err, BindError::MissingKey { ref key, .. } if key == "nature"));
    }

    #[test]
    fn test_not_a_case() {
        let err = bind_one("(kyc-grammar X)").unwrap_err();
        assert!(matches!(err, BindError::NotACase { .. }));
    }

    #[test]
    fn test_parse_percent() {
        assert_eq!(parse_percent("60"), Some(60.0));
        assert_eq!(parse_percent("12.5%"), Some(12.5));
        assert_eq!(parse_percent("abc"), None);
        assert_eq!(parse_percent("inf"), None);
    }
}
