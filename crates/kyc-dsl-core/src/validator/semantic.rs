//! Semantic phase: closed enumerations and ownership rules on the bound case

use crate::binder::{SourceIndex, CASE_HEAD};
use crate::diagnostics::{Diagnostic, DiagnosticCode};
use crate::model::{Case, CaseFunction, OwnershipStructure, TokenState};

pub(super) fn check(case: &Case, sources: &SourceIndex, tolerance: f64) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    for (i, function) in case.functions.iter().enumerate() {
        if function.parse::<CaseFunction>().is_err() {
            let allowed: Vec<&str> = CaseFunction::ALL.iter().map(|f| f.as_str()).collect();
            let message = format!(
                "unknown function '{}' (expected one of {})",
                function,
                allowed.join(", ")
            );
            out.push(
                Diagnostic::error(DiagnosticCode::UnknownFunction, message)
                    .at(sources.path("function", i)),
            );
        }
    }

    match &case.token {
        Some(token) if token.parse::<TokenState>().is_err() => out.push(
            Diagnostic::error(
                DiagnosticCode::InvalidTokenState,
                format!("kyc-token '{}' must be one of pending, approved, declined, review", token),
            )
            .at(sources.last_path("kyc-token")),
        ),
        Some(_) => {}
        None => out.push(
            Diagnostic::warning(DiagnosticCode::MissingKycToken, "case has no kyc-token")
                .at(CASE_HEAD),
        ),
    }

    if let Some(ownership) = &case.ownership {
        let path = sources.last_path("ownership-structure");
        check_ownership(ownership, &path, tolerance, &mut out);
    }

    if case.nature_purpose.is_none() {
        out.push(
            Diagnostic::warning(DiagnosticCode::MissingNaturePurpose, "case has no nature-purpose")
                .at(CASE_HEAD),
        );
    }
    if case.client_business_unit.is_none() {
        out.push(
            Diagnostic::warning(
                DiagnosticCode::MissingClientBusinessUnit,
                "case has no client-business-unit",
            )
            .at(CASE_HEAD),
        );
    }

    for (key, values) in [
        ("policy", &case.policies),
        ("obligation", &case.obligations),
        ("function", &case.functions),
    ] {
        for (i, value) in values.iter().enumerate() {
            if values[..i].contains(value) {
                out.push(
                    Diagnostic::warning(
                        DiagnosticCode::DuplicateEntry,
                        format!("{} '{}' is listed more than once", key, value),
                    )
                    .at(sources.path(key, i)),
                );
            }
        }
    }

    out
}

fn check_ownership(
    ownership: &OwnershipStructure,
    path: &str,
    tolerance: f64,
    out: &mut Vec<Diagnostic>,
) {
    for stake in ownership.owners.iter().chain(ownership.beneficial_owners.iter()) {
        if !(0.0..=100.0).contains(&stake.percent) {
            out.push(
                Diagnostic::error(
                    DiagnosticCode::PercentOutOfRange,
                    format!("percentage {} for '{}' is outside 0..100", stake.percent, stake.name),
                )
                .at(path),
            );
        }
    }

    let total = ownership.total_percent();
    if (total - 100.0).abs() > tolerance {
        out.push(
            Diagnostic::error(
                DiagnosticCode::OwnershipSumMismatch,
                format!("ownership percentages must sum to 100 (found {})", total),
            )
            .at(path),
        );
    }

    if ownership.controllers.is_empty() {
        out.push(
            Diagnostic::error(
                DiagnosticCode::MissingController,
                "ownership structure requires at least one controller",
            )
            .at(path),
        );
    }
}
