//! Ontology phase: cross-reference codes against the ontology repository

use super::OntologyResolver;
use crate::binder::SourceIndex;
use crate::diagnostics::{unresolved_error, Diagnostic, DiagnosticCode};
use crate::model::Case;

pub(super) fn check(
    case: &Case,
    sources: &SourceIndex,
    ontology: &dyn OntologyResolver,
) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    for (i, entry) in case.data_dictionary.iter().enumerate() {
        let path = sources.path("data-dictionary/attribute", i);
        if !ontology.resolve_attribute(&entry.attribute) {
            out.push(unresolved_error(
                DiagnosticCode::UnknownAttribute,
                "attribute",
                &entry.attribute,
                &path,
            ));
        }
        for source in &entry.sources {
            if !ontology.resolve_document(&source.document) {
                out.push(unresolved_error(
                    DiagnosticCode::UnknownDocument,
                    "document",
                    &source.document,
                    &format!("{}/{}", path, source.tier.keyword()),
                ));
            }
        }
    }

    for (i, requirement) in case.document_requirements.iter().enumerate() {
        let path = sources.path("document-requirements", i);
        if requirement.jurisdiction.trim().is_empty() {
            out.push(missing_jurisdiction(&path));
        }
        for (j, doc) in requirement.documents.iter().enumerate() {
            if !ontology.resolve_document(&doc.code) {
                out.push(unresolved_error(
                    DiagnosticCode::UnknownDocument,
                    "document",
                    &doc.code,
                    &format!("{}/required/document[{}]", path, j),
                ));
            }
        }
    }

    for (i, def) in case.derived_attributes.iter().enumerate() {
        let path = sources.path("derived-attributes/attribute", i);
        if !ontology.resolve_attribute(&def.derived_code) {
            out.push(unresolved_error(
                DiagnosticCode::UnknownAttribute,
                "attribute",
                &def.derived_code,
                &path,
            ));
        }
        for source in &def.sources {
            if !ontology.resolve_attribute(source) {
                out.push(unresolved_error(
                    DiagnosticCode::UnknownAttribute,
                    "source attribute",
                    source,
                    &format!("{}/sources", path),
                ));
            }
        }
        if def.jurisdiction.as_deref().is_some_and(|j| j.trim().is_empty()) {
            out.push(missing_jurisdiction(&path));
        }
        if let Some(regulation) = &def.regulation {
            if !ontology.resolve_regulation(regulation) {
                out.push(unresolved_error(
                    DiagnosticCode::UnknownRegulation,
                    "regulation",
                    regulation,
                    &format!("{}/regulation", path),
                ));
            }
        }
    }

    out
}

fn missing_jurisdiction(path: &str) -> Diagnostic {
    Diagnostic::error(
        DiagnosticCode::MissingJurisdiction,
        "jurisdiction must not be empty",
    )
    .at(path)
}
