//! Grammar phase: clause shape and arity on the raw AST
//!
//! Unknown top-level clause keys are left alone (the binder already warned
//! about them); inside known clauses every entry must have its expected shape.

use crate::ast::AstNode;
use crate::binder::{clause_path, parse_percent, CASE_HEAD, KNOWN_CLAUSES};
use crate::diagnostics::{arity_error, Diagnostic, DiagnosticCode};
use crate::model::SourceTier;

/// Revision of [`KYC_GRAMMAR_EBNF`], recorded with every validation
pub const GRAMMAR_VERSION: &str = "1.0";

/// Published grammar of the case notation
pub const KYC_GRAMMAR_EBNF: &str = r#"
case                  = "(" "kyc-case" IDENT clause* ")" ;
clause                = nature-purpose | client-business-unit | policy | obligation
                      | function | ownership-structure | data-dictionary
                      | document-requirements | derived-attributes | kyc-token ;
nature-purpose        = "(" "nature-purpose" ( "(" "nature" STRING ")" )?
                        ( "(" "purpose" STRING ")" )? ")" ;
client-business-unit  = "(" "client-business-unit" IDENT ")" ;
policy                = "(" "policy" IDENT ")" ;
obligation            = "(" "obligation" IDENT ")" ;
function              = "(" "function" IDENT ")" ;
ownership-structure   = "(" "ownership-structure" ownership-entry* ")" ;
ownership-entry       = "(" "entity" IDENT ")"
                      | "(" "owner" IDENT PERCENT ")"
                      | "(" "beneficial-owner" IDENT PERCENT ")"
                      | "(" "controller" IDENT STRING ")" ;
data-dictionary       = "(" "data-dictionary" attribute-sources* ")" ;
attribute-sources     = "(" "attribute" IDENT source* ")" ;
source                = "(" ( "primary-source" | "secondary-source" | "tertiary-source" )
                            ( "(" "document" IDENT ")" | STRING ) ")" ;
document-requirements = "(" "document-requirements" "(" "jurisdiction" IDENT ")"
                            ( "(" "required" document* ")" )? ")" ;
document              = "(" "document" IDENT STRING? ")" ;
derived-attributes    = "(" "derived-attributes" derived-attribute* ")" ;
derived-attribute     = "(" "attribute" IDENT ( "(" "sources" IDENT* ")" )? "(" "rule" STRING ")"
                            ( "(" "jurisdiction" IDENT ")" )? ( "(" "regulation" IDENT ")" )? ")" ;
kyc-token             = "(" "kyc-token" STRING ")" ;
PERCENT               = NUMBER "%"? ;
"#;

pub(super) fn check(node: &AstNode) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    let mut counts: Vec<(&str, usize)> = Vec::new();

    for clause in node.args().iter().skip(1) {
        let Some(head) = clause.head() else {
            if clause.as_list().is_some_and(|items| items.is_empty()) {
                let diag = Diagnostic::error(DiagnosticCode::EmptyClause, "empty clause '()'");
                out.push(diag.at(CASE_HEAD));
            }
            continue;
        };
        if !KNOWN_CLAUSES.contains(&head) {
            continue;
        }
        let index = match counts.iter_mut().find(|(h, _)| *h == head) {
            Some((_, n)) => {
                *n += 1;
                *n - 1
            }
            None => {
                counts.push((head, 1));
                0
            }
        };
        let path = clause_path(CASE_HEAD, head, index);

        match head {
            "nature-purpose" => check_nature_purpose(clause, &path, &mut out),
            "client-business-unit" | "policy" | "obligation" | "function" | "kyc-token" => {
                expect_atoms(clause, head, 1, "exactly one value", &path, &mut out);
            }
            "ownership-structure" => check_ownership(clause, &path, &mut out),
            "data-dictionary" => check_data_dictionary(clause, &path, &mut out),
            "document-requirements" => check_document_requirements(clause, &path, &mut out),
            "derived-attributes" => check_derived_attributes(clause, &path, &mut out),
            _ => {}
        }
    }

    out
}

// =============================================================================
// Clause checks
// =============================================================================

fn check_nature_purpose(clause: &AstNode, path: &str, out: &mut Vec<Diagnostic>) {
    for (i, entry) in clause.args().iter().enumerate() {
        match entry.head() {
            Some(key @ ("nature" | "purpose")) => {
                let entry_path = format!("{}/{}", path, key);
                expect_atoms(entry, key, 1, "exactly one value", &entry_path, out);
            }
            _ => out.push(unexpected(entry, "nature-purpose", &format!("{}[{}]", path, i))),
        }
    }
}

fn check_ownership(clause: &AstNode, path: &str, out: &mut Vec<Diagnostic>) {
    for_each_entry(clause, path, out, |entry, head, entry_path, out| match head {
        "entity" => {
            expect_atoms(entry, head, 1, "exactly one name", entry_path, out);
        }
        "owner" | "beneficial-owner" => {
            if expect_atoms(entry, head, 2, "exactly a name and a percentage", entry_path, out) {
                let percent = entry.args()[1].as_atom().unwrap_or_default();
                if parse_percent(percent).is_none() {
                    out.push(
                        Diagnostic::error(
                            DiagnosticCode::InvalidPercent,
                            format!("'{}' is not a valid percentage", percent),
                        )
                        .at(entry_path),
                    );
                }
            }
        }
        "controller" => {
            expect_atoms(entry, head, 2, "exactly a name and a role", entry_path, out);
        }
        _ => out.push(unexpected(entry, "ownership-structure", entry_path)),
    });
}

fn check_data_dictionary(clause: &AstNode, path: &str, out: &mut Vec<Diagnostic>) {
    for_each_entry(clause, path, out, |entry, head, entry_path, out| {
        if head != "attribute" {
            out.push(unexpected(entry, "data-dictionary", entry_path));
            return;
        }
        if !leading_atom(entry, head, "an attribute code", entry_path, out) {
            return;
        }
        for (i, source) in entry.args().iter().skip(1).enumerate() {
            let source_path = format!("{}/source[{}]", entry_path, i);
            let Some(tier) = source.head().and_then(SourceTier::from_keyword) else {
                out.push(unexpected(source, "attribute", &source_path));
                continue;
            };
            let well_formed = match source.args() {
                [AstNode::Atom(_)] => true,
                [doc] => {
                    doc.head() == Some("document")
                        && doc.args().len() == 1
                        && doc.args()[0].as_atom().is_some()
                }
                _ => false,
            };
            if !well_formed {
                out.push(arity_error(
                    tier.keyword(),
                    "one (document CODE)",
                    source.args().len(),
                    &source_path,
                ));
            }
        }
    });
}

fn check_document_requirements(clause: &AstNode, path: &str, out: &mut Vec<Diagnostic>) {
    let jurisdictions = clause.clauses("jurisdiction").count();
    if jurisdictions != 1 {
        out.push(arity_error(
            "document-requirements",
            "exactly one (jurisdiction J)",
            jurisdictions,
            path,
        ));
    }

    for_each_entry(clause, path, out, |entry, head, entry_path, out| match head {
        "jurisdiction" => {
            expect_atoms(entry, head, 1, "exactly one code", entry_path, out);
        }
        "required" => {
            for (i, doc) in entry.args().iter().enumerate() {
                let doc_path = format!("{}/document[{}]", entry_path, i);
                if doc.head() != Some("document") {
                    out.push(unexpected(doc, "required", &doc_path));
                    continue;
                }
                let n = doc.args().len();
                if !(1..=2).contains(&n) || doc.args().iter().any(|a| a.as_atom().is_none()) {
                    out.push(arity_error("document", "a code and an optional name", n, &doc_path));
                }
            }
        }
        _ => out.push(unexpected(entry, "document-requirements", entry_path)),
    });
}

fn check_derived_attributes(clause: &AstNode, path: &str, out: &mut Vec<Diagnostic>) {
    for_each_entry(clause, path, out, |entry, head, entry_path, out| {
        if head != "attribute" {
            out.push(unexpected(entry, "derived-attributes", entry_path));
            return;
        }
        if !leading_atom(entry, head, "a derived attribute code", entry_path, out) {
            return;
        }
        for part in entry.args().iter().skip(1) {
            match part.head() {
                Some(key @ ("rule" | "jurisdiction" | "regulation")) => {
                    let part_path = format!("{}/{}", entry_path, key);
                    expect_atoms(part, key, 1, "exactly one value", &part_path, out);
                }
                Some("sources") => {}
                _ => out.push(unexpected(part, "attribute", entry_path)),
            }
        }
    });
}

// =============================================================================
// Helpers
// =============================================================================

/// Visit list entries of a clause, flagging non-list entries
fn for_each_entry<F>(clause: &AstNode, path: &str, out: &mut Vec<Diagnostic>, mut visit: F)
where
    F: FnMut(&AstNode, &str, &str, &mut Vec<Diagnostic>),
{
    for (i, entry) in clause.args().iter().enumerate() {
        match entry.head() {
            Some(head) => {
                let entry_path = format!("{}/{}[{}]", path, head, i);
                visit(entry, head, &entry_path, out);
            }
            None => out.push(
                Diagnostic::error(
                    DiagnosticCode::ExpectedList,
                    format!("expected a (key ...) entry, found {}", entry.to_dsl_string()),
                )
                .at(format!("{}[{}]", path, i)),
            ),
        }
    }
}

/// Entry must carry exactly `n` atom arguments
fn expect_atoms(
    entry: &AstNode,
    head: &str,
    n: usize,
    expected: &str,
    path: &str,
    out: &mut Vec<Diagnostic>,
) -> bool {
    let args = entry.args();
    if args.len() != n {
        out.push(arity_error(head, expected, args.len(), path));
        return false;
    }
    if let Some(list) = args.iter().find(|a| a.as_atom().is_none()) {
        out.push(
            Diagnostic::error(
                DiagnosticCode::ExpectedAtom,
                format!("'{}' expects plain values, found {}", head, list.to_dsl_string()),
            )
            .at(path),
        );
        return false;
    }
    true
}

fn leading_atom(
    entry: &AstNode,
    head: &str,
    what: &str,
    path: &str,
    out: &mut Vec<Diagnostic>,
) -> bool {
    if entry.args().first().and_then(AstNode::as_atom).is_some() {
        return true;
    }
    let message = format!("'{}' must start with {}", head, what);
    out.push(Diagnostic::error(DiagnosticCode::ExpectedAtom, message).at(path));
    false
}

fn unexpected(entry: &AstNode, parent: &str, path: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::UnexpectedClause,
        format!("unexpected {} inside '{}'", entry.to_dsl_string(), parent),
    )
    .at(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn findings(source: &str) -> Vec<Diagnostic> {
        let forms = parse_source(source).unwrap();
        check(&forms[0])
    }

    fn codes(source: &str) -> Vec<DiagnosticCode> {
        findings(source).into_iter().map(|d| d.code).collect()
    }

    #[test]
    fn test_well_formed_case_has_no_findings() {
        let source = r#"
(kyc-case OK
  (nature-purpose (nature "n") (purpose "p"))
  (client-business-unit CBU)
  (policy P)
  (function ASSESS-RISK)
  (ownership-structure (entity E) (owner A 60%) (beneficial-owner B 40) (controller C "CEO"))
  (data-dictionary
    (attribute LEGAL_NAME (primary-source (document CERT_INCORP)) (tertiary-source "registry")))
  (document-requirements
    (jurisdiction EU)
    (required (document PASSPORT "Passport") (document W8BENE)))
  (derived-attributes
    (attribute FLAG (sources A B) (rule "A == B") (jurisdiction EU) (regulation AMLD5)))
  (kyc-token "pending"))
"#;
        assert_eq!(findings(source), vec![]);
    }

    #[test]
    fn test_owner_arity() {
        let found = findings("(kyc-case X (ownership-structure (owner A)))");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, DiagnosticCode::WrongArity);
        assert_eq!(found[0].path, "kyc-case/ownership-structure[0]/owner[0]");
        assert!(found[0].message.contains("exactly a name and a percentage"));
    }

    #[test]
    fn test_owner_bad_percent() {
        assert_eq!(
            codes("(kyc-case X (ownership-structure (owner A lots)))"),
            vec![DiagnosticCode::InvalidPercent]
        );
    }

    #[test]
    fn test_policy_arity() {
        assert_eq!(
            codes("(kyc-case X (policy) (policy A B))"),
            vec![DiagnosticCode::WrongArity, DiagnosticCode::WrongArity]
        );
    }

    #[test]
    fn test_nested_list_where_atom_expected() {
        assert_eq!(
            codes("(kyc-case X (client-business-unit (CBU)))"),
            vec![DiagnosticCode::ExpectedAtom]
        );
    }

    #[test]
    fn test_missing_jurisdiction_clause() {
        assert_eq!(
            codes("(kyc-case X (document-requirements (required (document PASSPORT))))"),
            vec![DiagnosticCode::WrongArity]
        );
    }

    #[test]
    fn test_bad_source_tier() {
        assert_eq!(
            codes("(kyc-case X (data-dictionary (attribute A (quaternary-source (document D)))))"),
            vec![DiagnosticCode::UnexpectedClause]
        );
    }

    #[test]
    fn test_unknown_top_level_clause_ignored() {
        assert!(findings("(kyc-case X (risk-rating HIGH))").is_empty());
    }

    #[test]
    fn test_empty_clause() {
        assert_eq!(codes("(kyc-case X ())"), vec![DiagnosticCode::EmptyClause]);
    }

    #[test]
    fn test_grammar_text_mentions_every_clause() {
        for clause in KNOWN_CLAUSES {
            assert!(KYC_GRAMMAR_EBNF.contains(clause), "{} missing", clause);
        }
    }
}
