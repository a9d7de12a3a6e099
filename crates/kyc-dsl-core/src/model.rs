//! Typed KYC case model
//!
//! Produced by the binder, consumed by the validator and serializer. Optional
//! clauses that are absent bind to `None` (scalars) or empty `Vec`s
//! (collections); collections keep source order.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub name: String,
    pub nature_purpose: Option<NaturePurpose>,
    pub client_business_unit: Option<String>,
    pub policies: Vec<String>,
    pub obligations: Vec<String>,
    pub functions: Vec<String>,
    pub ownership: Option<OwnershipStructure>,
    pub data_dictionary: Vec<AttributeSources>,
    pub document_requirements: Vec<DocumentRequirement>,
    pub derived_attributes: Vec<DerivedAttributeDefinition>,
    pub token: Option<String>,
}

impl Case {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Append a function unless it is already listed
    pub fn add_function(&mut self, function: CaseFunction) {
        push_unique(&mut self.functions, function.as_str());
    }

    pub fn add_policy(&mut self, code: &str) {
        push_unique(&mut self.policies, code);
    }

    pub fn add_obligation(&mut self, code: &str) {
        push_unique(&mut self.obligations, code);
    }

    pub fn set_token(&mut self, state: TokenState) {
        self.token = Some(state.as_str().to_string());
    }

    /// Parsed token state, if present and recognised
    pub fn token_state(&self) -> Option<TokenState> {
        self.token.as_deref().and_then(|t| t.parse().ok())
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaturePurpose {
    pub nature: Option<String>,
    pub purpose: Option<String>,
}

// =============================================================================
// Ownership
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OwnershipStructure {
    pub entity: Option<String>,
    pub owners: Vec<OwnershipStake>,
    pub beneficial_owners: Vec<OwnershipStake>,
    pub controllers: Vec<Controller>,
}

impl OwnershipStructure {
    /// Sum of owner and beneficial-owner percentages
    pub fn total_percent(&self) -> f64 {
        self.owners
            .iter()
            .chain(self.beneficial_owners.iter())
            .map(|s| s.percent)
            .sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OwnershipStake {
    pub name: String,
    pub percent: f64,
}

impl OwnershipStake {
    pub fn new(name: impl Into<String>, percent: f64) -> Self {
        Self {
            name: name.into(),
            percent,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub role: String,
}

impl Controller {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

// =============================================================================
// Data dictionary and document requirements
// =============================================================================

/// How strongly a document proves an attribute
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SourceTier {
    Primary,
    Secondary,
    Tertiary,
}

impl SourceTier {
    pub const ALL: [SourceTier; 3] =
        [SourceTier::Primary, SourceTier::Secondary, SourceTier::Tertiary];

    /// Clause keyword in the DSL
    pub fn keyword(&self) -> &'static str {
        match self {
            SourceTier::Primary => "primary-source",
            SourceTier::Secondary => "secondary-source",
            SourceTier::Tertiary => "tertiary-source",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.keyword() == keyword)
    }
}

/// Document sources for one attribute, in source order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSources {
    pub attribute: String,
    pub sources: Vec<AttributeSource>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeSource {
    pub tier: SourceTier,
    pub document: String,
}

/// Documents required in one jurisdiction
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequirement {
    pub jurisdiction: String,
    pub documents: Vec<DocumentRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub code: String,
    pub name: Option<String>,
}

impl DocumentRef {
    pub fn new(code: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            code: code.into(),
            name: name.map(str::to_string),
        }
    }
}

// =============================================================================
// Derived attributes
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAttributeDefinition {
    pub derived_code: String,
    pub sources: Vec<String>,
    pub rule: String,
    pub jurisdiction: Option<String>,
    pub regulation: Option<String>,
}

impl DerivedAttributeDefinition {
    pub fn new(derived_code: impl Into<String>, rule: impl Into<String>) -> Self {
        Self {
            derived_code: derived_code.into(),
            sources: Vec::new(),
            rule: rule.into(),
            jurisdiction: None,
            regulation: None,
        }
    }

    pub fn with_sources(mut self, sources: &[&str]) -> Self {
        self.sources = sources.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_regulation(mut self, jurisdiction: &str, regulation: &str) -> Self {
        self.jurisdiction = Some(jurisdiction.to_string());
        self.regulation = Some(regulation.to_string());
        self
    }
}

// =============================================================================
// Closed enumerations
// =============================================================================

/// Token states a case may carry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenState {
    Pending,
    Approved,
    Declined,
    Review,
}

impl TokenState {
    pub const ALL: [TokenState; 4] = [
        TokenState::Pending,
        TokenState::Approved,
        TokenState::Declined,
        TokenState::Review,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Pending => "pending",
            TokenState::Approved => "approved",
            TokenState::Declined => "declined",
            TokenState::Review => "review",
        }
    }
}

impl FromStr for TokenState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        TokenState::ALL
            .into_iter()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown token state '{}'", s))
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Functions a case may invoke
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseFunction {
    DiscoverPolicies,
    SolicitDocuments,
    ExtractData,
    VerifyOwnership,
    BuildOwnershipTree,
    AssessRisk,
    RegulatorNotify,
}

impl CaseFunction {
    pub const ALL: [CaseFunction; 7] = [
        CaseFunction::DiscoverPolicies,
        CaseFunction::SolicitDocuments,
        CaseFunction::ExtractData,
        CaseFunction::VerifyOwnership,
        CaseFunction::BuildOwnershipTree,
        CaseFunction::AssessRisk,
        CaseFunction::RegulatorNotify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseFunction::DiscoverPolicies => "DISCOVER-POLICIES",
            CaseFunction::SolicitDocuments => "SOLICIT-DOCUMENTS",
            CaseFunction::ExtractData => "EXTRACT-DATA",
            CaseFunction::VerifyOwnership => "VERIFY-OWNERSHIP",
            CaseFunction::BuildOwnershipTree => "BUILD-OWNERSHIP-TREE",
            CaseFunction::AssessRisk => "ASSESS-RISK",
            CaseFunction::RegulatorNotify => "REGULATOR-NOTIFY",
        }
    }
}

impl FromStr for CaseFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaseFunction::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown function '{}'", s))
    }
}
