//! Canonical serializer: `Case` to DSL text
//!
//! Clause order is fixed and every collection is emitted in model order, so
//! structurally equal cases render to byte-identical text. The content hash of
//! a case version is taken over this text.
//!
//! Order: nature-purpose, client-business-unit, policy*, obligation*,
//! function*, ownership-structure, data-dictionary, document-requirements*,
//! derived-attributes, kyc-token.

use crate::error::SerializationError;
use crate::model::*;
use crate::token::is_delimiter;

const INDENT: &str = "  ";

/// Render a case as canonical DSL text (always newline-terminated)
pub fn serialize(case: &Case) -> Result<String, SerializationError> {
    if case.name.trim().is_empty() {
        return Err(SerializationError::EmptyCaseName);
    }

    let mut lines: Vec<Line> = Vec::new();

    if let Some(np) = &case.nature_purpose {
        lines.push(Line::open(1, "nature-purpose"));
        if let Some(nature) = &np.nature {
            lines.push(Line::leaf(2, format!("(nature {})", quote(nature))));
        }
        if let Some(purpose) = &np.purpose {
            lines.push(Line::leaf(2, format!("(purpose {})", quote(purpose))));
        }
    }
    if let Some(cbu) = &case.client_business_unit {
        lines.push(Line::leaf(1, format!("(client-business-unit {})", render_atom(cbu))));
    }
    for policy in &case.policies {
        lines.push(Line::leaf(1, format!("(policy {})", render_atom(policy))));
    }
    for obligation in &case.obligations {
        lines.push(Line::leaf(1, format!("(obligation {})", render_atom(obligation))));
    }
    for function in &case.functions {
        lines.push(Line::leaf(1, format!("(function {})", render_atom(function))));
    }
    if let Some(ownership) = &case.ownership {
        write_ownership(&mut lines, ownership)?;
    }
    if !case.data_dictionary.is_empty() {
        write_data_dictionary(&mut lines, &case.data_dictionary);
    }
    for requirement in &case.document_requirements {
        write_document_requirement(&mut lines, requirement);
    }
    if !case.derived_attributes.is_empty() {
        write_derived_attributes(&mut lines, &case.derived_attributes);
    }
    if let Some(token) = &case.token {
        lines.push(Line::leaf(1, format!("(kyc-token {})", quote(token))));
    }

    Ok(render(&case.name, &lines))
}

// =============================================================================
// Clause writers
// =============================================================================

fn write_ownership(
    lines: &mut Vec<Line>,
    ownership: &OwnershipStructure,
) -> Result<(), SerializationError> {
    lines.push(Line::open(1, "ownership-structure"));
    if let Some(entity) = &ownership.entity {
        lines.push(Line::leaf(2, format!("(entity {})", render_atom(entity))));
    }
    let stake_lists = [
        ("owner", &ownership.owners),
        ("beneficial-owner", &ownership.beneficial_owners),
    ];
    for (kind, stakes) in stake_lists {
        for stake in stakes {
            lines.push(Line::leaf(
                2,
                format!("({} {} {})", kind, render_atom(&stake.name), percent(stake)?),
            ));
        }
    }
    for controller in &ownership.controllers {
        lines.push(Line::leaf(
            2,
            format!("(controller {} {})", render_atom(&controller.name), quote(&controller.role)),
        ));
    }
    Ok(())
}

fn write_data_dictionary(lines: &mut Vec<Line>, entries: &[AttributeSources]) {
    lines.push(Line::open(1, "data-dictionary"));
    for entry in entries {
        lines.push(Line::open(2, &format!("attribute {}", render_atom(&entry.attribute))));
        for source in &entry.sources {
            lines.push(Line::leaf(
                3,
                format!("({} (document {}))", source.tier.keyword(), render_atom(&source.document)),
            ));
        }
    }
}

fn write_document_requirement(lines: &mut Vec<Line>, requirement: &DocumentRequirement) {
    lines.push(Line::open(1, "document-requirements"));
    lines.push(Line::leaf(2, format!("(jurisdiction {})", render_atom(&requirement.jurisdiction))));
    if requirement.documents.is_empty() {
        return;
    }
    lines.push(Line::open(2, "required"));
    for doc in &requirement.documents {
        let text = match &doc.name {
            Some(name) => format!("(document {} {})", render_atom(&doc.code), quote(name)),
            None => format!("(document {})", render_atom(&doc.code)),
        };
        lines.push(Line::leaf(3, text));
    }
}

fn write_derived_attributes(lines: &mut Vec<Line>, defs: &[DerivedAttributeDefinition]) {
    lines.push(Line::open(1, "derived-attributes"));
    for def in defs {
        lines.push(Line::open(2, &format!("attribute {}", render_atom(&def.derived_code))));
        if !def.sources.is_empty() {
            let sources: Vec<String> = def.sources.iter().map(|s| render_atom(s)).collect();
            lines.push(Line::leaf(3, format!("(sources {})", sources.join(" "))));
        }
        lines.push(Line::leaf(3, format!("(rule {})", quote(&def.rule))));
        if let Some(jurisdiction) = &def.jurisdiction {
            lines.push(Line::leaf(3, format!("(jurisdiction {})", render_atom(jurisdiction))));
        }
        if let Some(regulation) = &def.regulation {
            lines.push(Line::leaf(3, format!("(regulation {})", render_atom(regulation))));
        }
    }
}

fn percent(stake: &OwnershipStake) -> Result<String, SerializationError> {
    if !stake.percent.is_finite() {
        return Err(SerializationError::NonFinitePercent {
            name: stake.name.clone(),
            value: stake.percent,
        });
    }
    // Display for f64 is the shortest text that parses back to the same value
    Ok(format!("{}", stake.percent))
}

// =============================================================================
// Layout
// =============================================================================

/// One output line: either a complete leaf form or the opening of a nested
/// form whose closing paren is emitted when a line at the same or a shallower
/// depth follows.
struct Line {
    depth: usize,
    text: String,
    opens: bool,
}

impl Line {
    fn open(depth: usize, head: &str) -> Self {
        Self {
            depth,
            text: format!("({}", head),
            opens: true,
        }
    }

    fn leaf(depth: usize, text: String) -> Self {
        Self {
            depth,
            text,
            opens: false,
        }
    }
}

fn render(name: &str, lines: &[Line]) -> String {
    let mut out = format!("(kyc-case {}", render_atom(name));
    // Depths of forms opened but not yet closed; the case form itself is depth 0
    let mut open: Vec<usize> = vec![0];

    for line in lines {
        while open.last().is_some_and(|d| *d >= line.depth) {
            open.pop();
            out.push(')');
        }
        out.push('\n');
        for _ in 0..line.depth {
            out.push_str(INDENT);
        }
        out.push_str(&line.text);
        if line.opens {
            open.push(line.depth);
        }
    }

    for _ in open {
        out.push(')');
    }
    out.push('\n');
    out
}

// =============================================================================
// Atoms
// =============================================================================

/// Bare atom when it round-trips through the tokenizer unchanged, otherwise a
/// quoted string
pub fn render_atom(text: &str) -> String {
    if !text.is_empty() && !text.chars().any(is_delimiter) {
        text.to_string()
    } else {
        quote(text)
    }
}

/// Always-quoted string with escapes
pub fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind;
    use crate::parser::parse_source;
    use pretty_assertions::assert_eq;

    fn full_case() -> Case {
        Case {
            name: "AVIVA-EU-EQUITY-FUND".into(),
            nature_purpose: Some(NaturePurpose {
                nature: Some("UCITS equity fund".into()),
                purpose: Some("Onboard \"EU\" fund".into()),
            }),
            client_business_unit: Some("AVIVA-EU-EQUITY-FUND".into()),
            policies: vec!["KYCPOL-UK-2025".into(), "AMLPOL-EU-2024".into()],
            obligations: vec!["OBL-AML".into()],
            functions: vec!["DISCOVER-POLICIES".into(), "ASSESS-RISK".into()],
            ownership: Some(OwnershipStructure {
                entity: Some("Aviva Investors".into()),
                owners: vec![OwnershipStake::new("HOLDCO", 75.5)],
                beneficial_owners: vec![OwnershipStake::new("J SMITH", 24.5)],
                controllers: vec![Controller::new("J-SMITH", "Managing Director")],
            }),
            data_dictionary: vec![AttributeSources {
                attribute: "LEGAL_NAME".into(),
                sources: vec![
                    AttributeSource {
                        tier: SourceTier::Primary,
                        document: "CERT_INCORP".into()
                    },
                    AttributeSource {
                        tier: SourceTier::Tertiary,
                        document: "Public registry".into()
                    },
                ],
            }],
            document_requirements: vec![DocumentRequirement {
                jurisdiction: "EU".into(),
                documents: vec![
                    DocumentRef::new("PASSPORT", Some("Passport")),
                    DocumentRef::new("W8BENE", None),
                ],
            }],
            derived_attributes: vec![DerivedAttributeDefinition::new(
                "PEP_FLAG",
                "PEP_STATUS == true",
            )
            .with_sources(&["PEP_STATUS"])
            .with_regulation("GLOBAL", "FATF")],
            token: Some("pending".into()),
        }
    }

    #[test]
    fn test_canonical_layout() {
        let text = serialize(&full_case()).unwrap();
        let expected = r#"(kyc-case AVIVA-EU-EQUITY-FUND
  (nature-purpose
    (nature "UCITS equity fund")
    (purpose "Onboard \"EU\" fund"))
  (client-business-unit AVIVA-EU-EQUITY-FUND)
  (policy KYCPOL-UK-2025)
  (policy AMLPOL-EU-2024)
  (obligation OBL-AML)
  (function DISCOVER-POLICIES)
  (function ASSESS-RISK)
  (ownership-structure
    (entity "Aviva Investors")
    (owner HOLDCO 75.5)
    (beneficial-owner "J SMITH" 24.5)
    (controller J-SMITH "Managing Director"))
  (data-dictionary
    (attribute LEGAL_NAME
      (primary-source (document CERT_INCORP))
      (tertiary-source (document "Public registry"))))
  (document-requirements
    (jurisdiction EU)
    (required
      (document PASSPORT "Passport")
      (document W8BENE)))
  (derived-attributes
    (attribute PEP_FLAG
      (sources PEP_STATUS)
      (rule "PEP_STATUS == true")
      (jurisdiction GLOBAL)
      (regulation FATF)))
  (kyc-token "pending"))
"#;
        assert_eq!(text, expected);
    }

    #[test]
    fn test_round_trip_full_case() {
        let case = full_case();
        let text = serialize(&case).unwrap();
        let forms = parse_source(&text).unwrap();
        assert_eq!(forms.len(), 1);
        assert_eq!(bind(&forms[0]).unwrap().case, case);
    }

    #[test]
    fn test_minimal_case() {
        assert_eq!(serialize(&Case::new("X")).unwrap(), "(kyc-case X)\n");
    }

    #[test]
    fn test_empty_ownership_structure_kept() {
        let mut case = Case::new("X");
        case.ownership = Some(OwnershipStructure::default());
        assert_eq!(serialize(&case).unwrap(), "(kyc-case X\n  (ownership-structure))\n");
    }

    #[test]
    fn test_deterministic() {
        let case = full_case();
        assert_eq!(serialize(&case).unwrap(), serialize(&case.clone()).unwrap());
    }

    #[test]
    fn test_non_finite_percent_rejected() {
        let mut case = Case::new("X");
        case.ownership = Some(OwnershipStructure {
            owners: vec![OwnershipStake::new("A", f64::NAN)],
            ..Default::default()
        });
        assert!(matches!(
            serialize(&case),
            Err(SerializationError::NonFinitePercent { .. })
        ));
    }

    #[test]
    fn test_empty_name_rejected() {
        assert_eq!(serialize(&Case::new(" ")), Err(SerializationError::EmptyCaseName));
    }

    #[test]
    fn test_render_atom() {
        assert_eq!(render_atom("EU"), "EU");
        assert_eq!(render_atom("two words"), "\"two words\"");
        assert_eq!(render_atom(""), "\"\"");
        assert_eq!(render_atom("a;b"), "\"a;b\"");
        assert_eq!(render_atom("(x)"), "\"(x)\"");
    }
}
