//! Named amendment steps and their change-type classification

use std::fmt;

use serde::{Deserialize, Serialize};

use kyc_dsl_core::TokenState;

/// Audit classification of an amendment, derived from its step name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Initialization,
    PolicyInjection,
    ObligationAddition,
    DocumentMapping,
    OwnershipTree,
    RiskAssessment,
    RegulatorNotification,
    TokenUpdate(TokenState),
    Generic,
}

impl ChangeType {
    /// Classify a step name; unknown names are generic amendments
    pub fn classify(step: &str) -> Self {
        match step.trim().to_ascii_lowercase().as_str() {
            "case-creation" => ChangeType::Initialization,
            "policy-discovery" => ChangeType::PolicyInjection,
            "document-solicitation" => ChangeType::ObligationAddition,
            "document-discovery" => ChangeType::DocumentMapping,
            "ownership-discovery" => ChangeType::OwnershipTree,
            "risk-assessment" => ChangeType::RiskAssessment,
            "regulator-notification" => ChangeType::RegulatorNotification,
            "approve" => ChangeType::TokenUpdate(TokenState::Approved),
            "decline" => ChangeType::TokenUpdate(TokenState::Declined),
            "review" => ChangeType::TokenUpdate(TokenState::Review),
            _ => ChangeType::Generic,
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Initialization => f.write_str("initialization"),
            ChangeType::PolicyInjection => f.write_str("policy-injection"),
            ChangeType::ObligationAddition => f.write_str("obligation-addition"),
            ChangeType::DocumentMapping => f.write_str("document-mapping"),
            ChangeType::OwnershipTree => f.write_str("ownership-tree"),
            ChangeType::RiskAssessment => f.write_str("risk-assessment"),
            ChangeType::RegulatorNotification => f.write_str("regulator-notification"),
            ChangeType::TokenUpdate(state) => write!(f, "token-update:{}", state),
            ChangeType::Generic => f.write_str("generic-amendment"),
        }
    }
}

/// A step with a built-in local mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepInfo {
    pub name: &'static str,
    pub description: &'static str,
}

impl StepInfo {
    pub fn change_type(&self) -> ChangeType {
        ChangeType::classify(self.name)
    }
}

const CATALOGUE: &[StepInfo] = &[
    StepInfo {
        name: "policy-discovery",
        description: "Add policy discovery function and applicable policies",
    },
    StepInfo {
        name: "document-solicitation",
        description: "Add document solicitation function and obligations",
    },
    StepInfo {
        name: "document-discovery",
        description: "Add EU document requirements and data dictionary sources",
    },
    StepInfo {
        name: "ownership-discovery",
        description: "Add ownership tree building and verification functions",
    },
    StepInfo {
        name: "risk-assessment",
        description: "Add risk assessment function",
    },
    StepInfo {
        name: "regulator-notification",
        description: "Add regulator notification function",
    },
    StepInfo {
        name: "approve",
        description: "Finalize case as approved",
    },
    StepInfo {
        name: "decline",
        description: "Finalize case as declined",
    },
    StepInfo {
        name: "review",
        description: "Send case to manual review",
    },
];

/// Every step with a built-in mutation
pub fn catalogue() -> &'static [StepInfo] {
    CATALOGUE
}

pub fn find_step(name: &str) -> Option<&'static StepInfo> {
    CATALOGUE.iter().find(|s| s.name.eq_ignore_ascii_case(name.trim()))
}
